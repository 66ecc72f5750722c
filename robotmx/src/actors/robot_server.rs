//! RobotServerActor - front door for every client operation
//!
//! The actor is responsible for:
//! - Issuing operation handles (monotonic, starting at 1)
//! - Classifying requests through the operation registry
//! - Answering queries inline and spawning background/foreground work
//! - Applying controller telemetry to server state
//!
//! It never waits for an operation to finish: the caller gets its handle
//! back immediately and follows progress on the update stream.

use async_trait::async_trait;
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use shared_types::{OperationHandle, OperationKind, OperationRequest, ServerSnapshot};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::hardware::HardwareUpdate;
use crate::orchestrator::SharedMountOrchestrator;

/// Messages handled by RobotServerActor
#[derive(Debug)]
pub enum RobotServerMsg {
    /// Accept a client operation
    Submit {
        request: OperationRequest,
        reply: RpcReplyPort<SubmittedOperation>,
    },
    /// Current server state, outside of any operation
    GetSnapshot { reply: RpcReplyPort<ServerSnapshot> },
    /// Telemetry pushed by the controller
    Hardware(HardwareUpdate),
}

/// What the caller learns when an operation is accepted.
#[derive(Debug, Clone)]
pub struct SubmittedOperation {
    pub handle: OperationHandle,
    pub operation: &'static str,
    pub kind: OperationKind,
    /// Present for queries, which complete before the reply
    pub state: Option<ServerSnapshot>,
}

#[derive(Debug, Default)]
pub struct RobotServerActor;

#[derive(Clone)]
pub struct RobotServerArguments {
    pub orchestrator: SharedMountOrchestrator,
}

pub struct RobotServerState {
    orchestrator: SharedMountOrchestrator,
    next_handle: u64,
}

impl RobotServerState {
    fn issue_handle(&mut self) -> OperationHandle {
        self.next_handle += 1;
        OperationHandle(self.next_handle)
    }
}

#[async_trait]
impl Actor for RobotServerActor {
    type Msg = RobotServerMsg;
    type State = RobotServerState;
    type Arguments = RobotServerArguments;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!(actor_id = %myself.get_id(), "RobotServerActor starting");
        Ok(RobotServerState {
            orchestrator: args.orchestrator,
            next_handle: 0,
        })
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            RobotServerMsg::Submit { request, reply } => {
                let submitted = self.handle_submit(state, request).await;
                let _ = reply.send(submitted);
            }
            RobotServerMsg::GetSnapshot { reply } => {
                let _ = reply.send(state.orchestrator.snapshot());
            }
            RobotServerMsg::Hardware(update) => {
                tracing::trace!(update = ?update, "Hardware update");
                state.orchestrator.apply_hardware_update(update);
            }
        }
        Ok(())
    }

    async fn post_stop(
        &self,
        myself: ActorRef<Self::Msg>,
        _state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        tracing::info!(actor_id = %myself.get_id(), "RobotServerActor stopped");
        Ok(())
    }
}

impl RobotServerActor {
    async fn handle_submit(
        &self,
        state: &mut RobotServerState,
        request: OperationRequest,
    ) -> SubmittedOperation {
        let handle = state.issue_handle();
        let operation = request.name();
        let kind = request.kind();
        tracing::info!(handle = %handle, operation, kind = ?kind, "Operation submitted");

        match kind {
            OperationKind::Query => {
                state.orchestrator.run(handle, request).await;
                SubmittedOperation {
                    handle,
                    operation,
                    kind,
                    state: Some(state.orchestrator.snapshot()),
                }
            }
            OperationKind::Background | OperationKind::Foreground => {
                let orchestrator = state.orchestrator.clone();
                tokio::spawn(async move {
                    orchestrator.run(handle, request).await;
                });
                SubmittedOperation {
                    handle,
                    operation,
                    kind,
                    state: None,
                }
            }
        }
    }
}

/// Forward controller telemetry into the actor until either side goes away.
pub fn spawn_telemetry_forwarder(
    mut updates: mpsc::UnboundedReceiver<HardwareUpdate>,
    server: ActorRef<RobotServerMsg>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(update) = updates.recv().await {
            if let Err(e) = server.send_message(RobotServerMsg::Hardware(update)) {
                tracing::warn!(error = %e, "Robot server gone, dropping telemetry");
                break;
            }
        }
    })
}
