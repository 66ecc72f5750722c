//! Two-phase make-safe saga shared by the mount-family operations.
//!
//! ```text
//! engage guard -> entry { R: prepare + return placer/prefetch | S: make safe }
//!              -> action
//!              -> exit  { R': return placer/prefetch + standby | S': return positions }
//!              -> release guard
//! ```
//!
//! Each phase joins exactly two futures and inspects both results before
//! branching. The guard is released whatever happens inside, including when
//! the saga future is dropped before it completes.

use std::future::Future;

use shared_types::{OperationHandle, Port};

use super::guard::MotionGuard;
use super::{MountOrchestrator, OrchestratorError};
use crate::hardware::{RobotError, RobotResult};

/// What the robot does around the action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct SagaPlan {
    /// Port to prefetch while the safety service clears the path
    pub entry_prefetch: Option<Port>,
    /// Port to prefetch while the safety service restores positions
    pub exit_prefetch: Option<Port>,
    pub standby_on_exit: bool,
}

impl SagaPlan {
    pub(super) fn new(entry_prefetch: Option<Port>, exit_prefetch: Option<Port>) -> Self {
        Self {
            entry_prefetch,
            exit_prefetch,
            standby_on_exit: true,
        }
    }

    pub(super) fn without_standby(mut self) -> Self {
        self.standby_on_exit = false;
        self
    }
}

impl MountOrchestrator {
    pub(super) async fn run_saga<A>(
        &self,
        handle: OperationHandle,
        operation: &'static str,
        plan: SagaPlan,
        action: A,
    ) -> Result<Option<String>, OrchestratorError>
    where
        A: Future<Output = RobotResult>,
    {
        self.with_motion_guard(
            handle,
            operation,
            self.saga_body(handle, operation, plan, action),
        )
        .await
    }

    async fn saga_body<A>(
        &self,
        handle: OperationHandle,
        operation: &'static str,
        plan: SagaPlan,
        action: A,
    ) -> Result<Option<String>, OrchestratorError>
    where
        A: Future<Output = RobotResult>,
    {
        self.entry_phase(handle, operation, plan.entry_prefetch.as_ref())
            .await?;
        tracing::info!(handle = %handle, operation, "Path clear, running action");

        let action_result = action.await;
        if let Err(e) = &action_result {
            tracing::warn!(handle = %handle, operation, error = %e, "Action failed, still undoing");
        }
        self.exit_phase(handle, operation, &plan, action_result).await
    }

    async fn entry_phase(
        &self,
        handle: OperationHandle,
        operation: &'static str,
        prefetch: Option<&Port>,
    ) -> Result<(), OrchestratorError> {
        tracing::info!(handle = %handle, operation, "Entry phase started");
        let robot_task = async {
            self.robot.prepare_for_mount().await?;
            self.robot.return_placer_and_prefetch(prefetch).await?;
            Ok::<(), RobotError>(())
        };
        let (robot_result, safety_result) =
            tokio::join!(robot_task, self.safety.move_to_safe_position());

        // Safety failure is checked first: standby is the recovery whatever
        // the robot task did.
        match (safety_result, robot_result) {
            (Err(safety_err), robot_result) => {
                tracing::warn!(handle = %handle, operation, error = %safety_err, "Make safe failed, sending robot to standby");
                if let Err(robot_err) = robot_result {
                    tracing::warn!(handle = %handle, operation, error = %robot_err, "Robot also failed to prepare");
                    self.report_progress(handle, robot_err.to_string());
                }
                if let Err(e) = self.robot.go_to_standby().await {
                    tracing::warn!(handle = %handle, operation, error = %e, "Standby after make safe failure failed");
                }
                Err(OrchestratorError::MakeSafeFailed(safety_err))
            }
            (Ok(()), Err(robot_err)) => {
                tracing::warn!(handle = %handle, operation, error = %robot_err, "Robot failed to prepare");
                Err(OrchestratorError::Robot(robot_err))
            }
            (Ok(()), Ok(())) => Ok(()),
        }
    }

    async fn exit_phase(
        &self,
        handle: OperationHandle,
        operation: &'static str,
        plan: &SagaPlan,
        action_result: RobotResult,
    ) -> Result<Option<String>, OrchestratorError> {
        tracing::info!(handle = %handle, operation, "Exit phase started");
        let robot_task = async {
            self.robot
                .return_placer_and_prefetch(plan.exit_prefetch.as_ref())
                .await?;
            if plan.standby_on_exit {
                self.robot.go_to_standby().await?;
            }
            Ok::<(), RobotError>(())
        };
        let (robot_result, undo_result) =
            tokio::join!(robot_task, self.safety.return_positions());

        if let Err(e) = &undo_result {
            tracing::warn!(handle = %handle, operation, error = %e, "Undo make safe failed");
        }

        let robot_error = match (action_result, robot_result) {
            (Ok(message), Ok(())) => {
                return match undo_result {
                    Ok(()) => Ok(Some(message)),
                    Err(e) => Err(OrchestratorError::UndoMakeSafeFailed(e)),
                };
            }
            (Err(action_err), Err(exit_err)) => {
                tracing::warn!(handle = %handle, operation, error = %exit_err, "Exit robot task failed after action failure");
                self.report_progress(handle, exit_err.to_string());
                action_err
            }
            (Err(e), Ok(())) | (Ok(_), Err(e)) => e,
        };

        // The robot error is what the client needs to act on; the safety
        // failure still goes out as an intermediate update.
        if let Err(undo_err) = undo_result {
            self.report_progress(handle, undo_err.to_string());
        }
        Err(OrchestratorError::Robot(robot_error))
    }

    async fn with_motion_guard<F>(
        &self,
        handle: OperationHandle,
        operation: &'static str,
        body: F,
    ) -> Result<Option<String>, OrchestratorError>
    where
        F: Future<Output = Result<Option<String>, OrchestratorError>>,
    {
        let guard = MotionGuard::new(handle, operation, self.robot.clone(), &self.state);
        let result = match self.engage_motion_guard().await {
            Ok(()) => body.await,
            Err(e) => {
                tracing::error!(handle = %handle, operation, error = %e, "Failed to lock motors");
                Err(OrchestratorError::Robot(e))
            }
        };
        self.release_motion_guard(handle, operation).await;
        guard.disarm();
        result
    }

    async fn engage_motion_guard(&self) -> Result<(), RobotError> {
        self.robot.set_auto_heat_cool_allowed(false).await?;
        self.state.set_auto_heat_cool_allowed(false);
        self.robot.set_motors_locked(true).await?;
        self.state.set_motors_locked(true);
        Ok(())
    }

    async fn release_motion_guard(&self, handle: OperationHandle, operation: &'static str) {
        if let Err(e) = self.robot.set_motors_locked(false).await {
            tracing::error!(handle = %handle, operation, error = %e, "Failed to unlock motors");
        }
        self.state.set_motors_locked(false);
        if let Err(e) = self.robot.set_auto_heat_cool_allowed(true).await {
            tracing::error!(handle = %handle, operation, error = %e, "Failed to re-enable auto heat/cool");
        }
        self.state.set_auto_heat_cool_allowed(true);
    }
}
