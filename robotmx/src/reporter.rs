//! Fan-out of operation lifecycle and value updates to subscribers.

use std::sync::Arc;

use shared_types::{OperationUpdate, ServerUpdate};
use tokio::sync::broadcast;

pub type SharedOperationReporter = Arc<dyn OperationReporter>;

/// Receives everything the server publishes.
pub trait OperationReporter: Send + Sync {
    fn operation_update(&self, update: OperationUpdate);

    /// Changed server attributes, keyed by attribute name.
    fn values_update(&self, values: serde_json::Map<String, serde_json::Value>);
}

/// Publishes onto a tokio broadcast channel read by the WebSocket handlers.
#[derive(Debug, Clone)]
pub struct BroadcastReporter {
    tx: broadcast::Sender<ServerUpdate>,
}

impl BroadcastReporter {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerUpdate> {
        self.tx.subscribe()
    }

    fn publish(&self, update: ServerUpdate) {
        // No subscribers is fine: updates are fire-and-forget.
        if self.tx.send(update).is_err() {
            tracing::trace!("No update subscribers");
        }
    }
}

impl OperationReporter for BroadcastReporter {
    fn operation_update(&self, update: OperationUpdate) {
        tracing::debug!(
            handle = %update.handle,
            stage = ?update.stage,
            error = update.error.as_deref().unwrap_or(""),
            "Operation update"
        );
        self.publish(ServerUpdate::Operation(update));
    }

    fn values_update(&self, values: serde_json::Map<String, serde_json::Value>) {
        self.publish(ServerUpdate::Values { values });
    }
}
