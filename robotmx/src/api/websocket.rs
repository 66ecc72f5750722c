//! WebSocket handler for the live update stream.
//!
//! Every `ServerUpdate` published after the client connects goes out as one
//! JSON text frame.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use shared_types::ServerUpdate;
use tokio::sync::{broadcast, mpsc};

use crate::api::ApiState;

pub async fn updates_websocket(
    ws: WebSocketUpgrade,
    State(state): State<ApiState>,
) -> impl IntoResponse {
    let updates = state.updates.subscribe();
    ws.on_upgrade(move |socket| handle_updates_socket(socket, updates))
}

async fn handle_updates_socket(socket: WebSocket, mut updates: broadcast::Receiver<ServerUpdate>) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(msg).await.is_err() {
                break;
            }
        }
    });

    let _ = tx.send(Message::Text(json!({"type": "connected"}).to_string().into()));

    loop {
        tokio::select! {
            maybe_msg = receiver.next() => {
                match maybe_msg {
                    Some(Ok(Message::Text(text))) => {
                        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap_or_else(|_| json!({}));
                        if parsed.get("type").and_then(|v| v.as_str()) == Some("ping") {
                            let _ = tx.send(Message::Text(json!({"type": "pong"}).to_string().into()));
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = tx.send(Message::Pong(data));
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "updates websocket receive error");
                        break;
                    }
                }
            }
            update = updates.recv() => {
                match update {
                    Ok(update) => match serde_json::to_string(&update) {
                        Ok(text) => {
                            if tx.send(Message::Text(text.into())).is_err() {
                                break;
                            }
                        }
                        Err(e) => tracing::warn!(error = %e, "failed to encode update"),
                    },
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "updates websocket lagging, updates dropped");
                        let _ = tx.send(Message::Text(
                            json!({"type": "lagged", "skipped": skipped}).to_string().into(),
                        ));
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    writer.abort();
}
