//! Drop guards for operations that never reach their normal cleanup.
//!
//! A spawned operation can be aborted, or unwind through a panicking
//! collaborator. Both guards stay armed until the normal path has done its
//! own cleanup; if they are dropped while armed they do it instead.

use shared_types::{OperationHandle, OperationUpdate};

use super::protocol::OrchestratorError;
use super::state::ServerState;
use crate::hardware::SharedHardwareRobot;
use crate::reporter::SharedOperationReporter;

/// Restores the motor lock and auto heat/cool if a saga is dropped midway.
///
/// Published state is reset immediately. The robot calls need an executor,
/// so they are spawned onto the current runtime when there is one.
pub(super) struct MotionGuard<'a> {
    handle: OperationHandle,
    operation: &'static str,
    robot: SharedHardwareRobot,
    state: &'a ServerState,
    armed: bool,
}

impl<'a> MotionGuard<'a> {
    pub(super) fn new(
        handle: OperationHandle,
        operation: &'static str,
        robot: SharedHardwareRobot,
        state: &'a ServerState,
    ) -> Self {
        Self {
            handle,
            operation,
            robot,
            state,
            armed: true,
        }
    }

    pub(super) fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for MotionGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let handle = self.handle;
        let operation = self.operation;
        tracing::error!(handle = %handle, operation, "Saga dropped before release, restoring motion guard");
        self.state.set_motors_locked(false);
        self.state.set_auto_heat_cool_allowed(true);

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::error!(handle = %handle, operation, "No runtime to restore robot motor lock");
            return;
        };
        let robot = self.robot.clone();
        runtime.spawn(async move {
            if let Err(e) = robot.set_motors_locked(false).await {
                tracing::error!(handle = %handle, operation, error = %e, "Failed to unlock motors");
            }
            if let Err(e) = robot.set_auto_heat_cool_allowed(true).await {
                tracing::error!(handle = %handle, operation, error = %e, "Failed to re-enable auto heat/cool");
            }
        });
    }
}

/// Sends the terminal `end` update if an operation is dropped after `begin`.
pub(super) struct PendingEnd {
    handle: OperationHandle,
    operation: &'static str,
    reporter: SharedOperationReporter,
    armed: bool,
}

impl PendingEnd {
    pub(super) fn new(
        handle: OperationHandle,
        operation: &'static str,
        reporter: SharedOperationReporter,
    ) -> Self {
        Self {
            handle,
            operation,
            reporter,
            armed: true,
        }
    }

    /// The caller sends `end` itself from here on.
    pub(super) fn complete(mut self) {
        self.armed = false;
    }
}

impl Drop for PendingEnd {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let error = OrchestratorError::Aborted;
        tracing::error!(handle = %self.handle, operation = self.operation, error = %error, "Operation dropped before finishing");
        self.reporter.operation_update(OperationUpdate::end(
            self.handle,
            None,
            Some(error.to_string()),
        ));
    }
}
