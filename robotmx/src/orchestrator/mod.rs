//! Mount orchestrator - coordinates the robot with the safety service
//!
//! The orchestrator owns everything an operation can touch:
//! - the foreground slot (at most one motion at a time)
//! - the motor lock and auto heat/cool flags, restored after every saga
//! - the server attributes published to clients
//! - the prepare watchdog
//!
//! Each public operation reports `begin` and exactly one `end` for its handle
//! and returns the same outcome it reported.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use shared_types::{
    CalibrationTarget, OperationHandle, OperationRequest, OperationUpdate, Port, PortState,
    Position, ProbeRequest, ServerSnapshot,
};

use crate::hardware::{HardwareUpdate, SharedHardwareRobot};
use crate::reporter::SharedOperationReporter;
use crate::safety::SharedSafetyGateway;

mod guard;
pub mod protocol;
mod saga;
pub mod state;
pub mod watchdog;

#[cfg(test)]
mod tests;

pub use protocol::{OperationOutcome, OrchestratorError};
pub use state::{ForegroundSlot, ServerState};
pub use watchdog::PrepareWatchdog;

use guard::PendingEnd;
use saga::SagaPlan;

pub type SharedMountOrchestrator = Arc<MountOrchestrator>;

type OperationResult = Result<Option<String>, OrchestratorError>;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub robot_name: String,
    /// How long a standalone prepare may wait for its follow-up operation
    pub prepare_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            robot_name: "ROBOT_MX".to_string(),
            prepare_timeout: Duration::from_secs(120),
        }
    }
}

pub struct MountOrchestrator {
    robot: SharedHardwareRobot,
    safety: SharedSafetyGateway,
    reporter: SharedOperationReporter,
    state: ServerState,
    slot: ForegroundSlot,
    watchdog: PrepareWatchdog,
}

impl MountOrchestrator {
    pub fn new(
        config: OrchestratorConfig,
        robot: SharedHardwareRobot,
        safety: SharedSafetyGateway,
        reporter: SharedOperationReporter,
    ) -> Self {
        let slot = ForegroundSlot::new();
        let watchdog = PrepareWatchdog::new(robot.clone(), slot.clone(), config.prepare_timeout);
        Self {
            state: ServerState::new(config.robot_name, reporter.clone()),
            robot,
            safety,
            reporter,
            slot,
            watchdog,
        }
    }

    pub fn state(&self) -> &ServerState {
        &self.state
    }

    pub fn foreground_slot(&self) -> &ForegroundSlot {
        &self.slot
    }

    pub fn watchdog(&self) -> &PrepareWatchdog {
        &self.watchdog
    }

    pub fn snapshot(&self) -> ServerSnapshot {
        self.state.snapshot(self.watchdog.prepared_state())
    }

    pub fn apply_hardware_update(&self, update: HardwareUpdate) {
        self.state.apply(update);
    }

    /// Dispatch a registry request to its operation.
    pub async fn run(&self, handle: OperationHandle, request: OperationRequest) -> OperationOutcome {
        match request {
            OperationRequest::Refresh => {
                self.reporter.operation_update(OperationUpdate::begin(handle));
                self.finish(handle, Ok(None))
            }
            OperationRequest::SetGripper { value } => self.set_gripper(handle, value).await,
            OperationRequest::SetLid { value } => self.set_lid(handle, value).await,
            OperationRequest::SetHeater { value } => self.set_heater(handle, value).await,
            OperationRequest::ResetMountCounters => self.reset_mount_counters(handle).await,
            OperationRequest::SetPortState { port, state } => {
                self.set_port_state(handle, port, state).await
            }
            OperationRequest::ResetPorts { ports } => self.reset_ports(handle, ports).await,
            OperationRequest::Probe { ports } => self.probe(handle, ports).await,
            OperationRequest::Calibrate { target, run_args } => {
                self.calibrate(handle, &target, run_args).await
            }
            OperationRequest::CalibrateGoniometer { initial, run_args } => {
                self.calibrate_goniometer(handle, initial, run_args).await
            }
            OperationRequest::PrepareForMount => self.prepare_for_mount(handle).await,
            OperationRequest::Mount { port } => self.mount(handle, port).await,
            OperationRequest::Dismount { port } => self.dismount(handle, port).await,
            OperationRequest::MountAndPrefetch {
                port,
                prefetch_port,
            } => self.mount_and_prefetch(handle, port, prefetch_port).await,
            OperationRequest::Prefetch { port } => self.prefetch(handle, port).await,
            OperationRequest::ReturnPrefetch => self.return_prefetch(handle).await,
            OperationRequest::ParkRobot { dismount } => self.park_robot(handle, dismount).await,
        }
    }

    // ========================================================================
    // Mount family
    // ========================================================================

    pub async fn mount(&self, handle: OperationHandle, port: Port) -> OperationOutcome {
        tracing::info!(handle = %handle, port = %port, "mount requested");
        self.run_foreground(handle, "mount", self.mount_saga(handle, port))
            .await
    }

    async fn mount_saga(&self, handle: OperationHandle, port: Port) -> OperationResult {
        self.watchdog.abort();
        self.run_saga(
            handle,
            "mount",
            SagaPlan::new(Some(port), None),
            self.robot.mount(&port),
        )
        .await
    }

    /// Dismount `port`, or whatever the robot reports on the goniometer.
    pub async fn dismount(&self, handle: OperationHandle, port: Option<Port>) -> OperationOutcome {
        tracing::info!(handle = %handle, port = ?port.map(|p| p.code()), "dismount requested");
        self.run_foreground(handle, "dismount", self.dismount_saga(handle, port))
            .await
    }

    async fn dismount_saga(&self, handle: OperationHandle, port: Option<Port>) -> OperationResult {
        self.watchdog.abort();
        let port = match port {
            Some(port) => port,
            None => match self.robot.mounted_sample().await? {
                Some(port) => port,
                None => {
                    tracing::info!(handle = %handle, "Nothing mounted, dismount skipped");
                    return Ok(Some("no sample mounted".to_string()));
                }
            },
        };
        self.run_saga(
            handle,
            "dismount",
            SagaPlan::new(None, None),
            self.robot.dismount(&port),
        )
        .await
    }

    pub async fn mount_and_prefetch(
        &self,
        handle: OperationHandle,
        port: Port,
        prefetch_port: Port,
    ) -> OperationOutcome {
        tracing::info!(
            handle = %handle,
            port = %port,
            prefetch_port = %prefetch_port,
            "mount_and_prefetch requested"
        );
        self.run_foreground(
            handle,
            "mount_and_prefetch",
            self.mount_and_prefetch_saga(handle, port, prefetch_port),
        )
        .await
    }

    async fn mount_and_prefetch_saga(
        &self,
        handle: OperationHandle,
        port: Port,
        prefetch_port: Port,
    ) -> OperationResult {
        self.watchdog.abort();
        self.run_saga(
            handle,
            "mount_and_prefetch",
            SagaPlan::new(Some(port), Some(prefetch_port)),
            self.robot.mount(&port),
        )
        .await
    }

    pub async fn prefetch(&self, handle: OperationHandle, port: Port) -> OperationOutcome {
        tracing::info!(handle = %handle, port = %port, "prefetch requested");
        self.run_foreground(handle, "prefetch", self.prefetch_saga(handle, port))
            .await
    }

    async fn prefetch_saga(&self, handle: OperationHandle, port: Port) -> OperationResult {
        self.watchdog.abort();
        self.run_saga(
            handle,
            "prefetch",
            SagaPlan::new(None, None),
            self.robot.prefetch(&port),
        )
        .await
    }

    pub async fn return_prefetch(&self, handle: OperationHandle) -> OperationOutcome {
        tracing::info!(handle = %handle, "return_prefetch requested");
        self.run_foreground(handle, "return_prefetch", self.return_prefetch_saga(handle))
            .await
    }

    async fn return_prefetch_saga(&self, handle: OperationHandle) -> OperationResult {
        self.watchdog.abort();
        self.run_saga(
            handle,
            "return_prefetch",
            SagaPlan::new(None, None),
            self.robot.return_prefetch(),
        )
        .await
    }

    /// Park the arm. Only `dismount = true` needs the safety service.
    pub async fn park_robot(&self, handle: OperationHandle, dismount: bool) -> OperationOutcome {
        tracing::info!(handle = %handle, dismount, "park_robot requested");
        self.run_foreground(handle, "park_robot", self.park(handle, dismount))
            .await
    }

    async fn park(&self, handle: OperationHandle, dismount: bool) -> OperationResult {
        self.watchdog.abort();
        if !dismount {
            return Ok(Some(self.robot.park_robot(false).await?));
        }
        self.run_saga(
            handle,
            "park_robot",
            SagaPlan::new(None, None).without_standby(),
            self.robot.park_robot(true),
        )
        .await
    }

    /// Move to the cooling point and wait there for a mount or dismount.
    pub async fn prepare_for_mount(&self, handle: OperationHandle) -> OperationOutcome {
        tracing::info!(handle = %handle, "prepare_for_mount requested");
        self.run_foreground(handle, "prepare_for_mount", self.prepare())
            .await
    }

    async fn prepare(&self) -> OperationResult {
        let message = self.robot.prepare_for_mount().await?;
        self.watchdog.arm();
        Ok(Some(message))
    }

    // ========================================================================
    // Calibration and probing
    // ========================================================================

    pub async fn calibrate(
        &self,
        handle: OperationHandle,
        target: &str,
        run_args: String,
    ) -> OperationOutcome {
        tracing::info!(handle = %handle, target, run_args = %run_args, "calibrate requested");
        let target = match target.parse::<CalibrationTarget>() {
            Ok(target) => target,
            Err(unknown) => {
                tracing::warn!(handle = %handle, target = %unknown, "Unknown calibration target");
                return self.finish(handle, Err(OrchestratorError::invalid_calibration_target()));
            }
        };
        match target {
            CalibrationTarget::Goniometer => {
                self.calibrate_goniometer(handle, false, run_args).await
            }
            target => {
                self.run_foreground(handle, "calibrate", self.calibrate_target(target, run_args))
                    .await
            }
        }
    }

    async fn calibrate_target(&self, target: CalibrationTarget, run_args: String) -> OperationResult {
        Ok(Some(self.robot.calibrate(target, &run_args).await?))
    }

    /// Goniometer calibration. After the first one the arm has to reach into
    /// the sample area, so the safety service clears it first.
    pub async fn calibrate_goniometer(
        &self,
        handle: OperationHandle,
        initial: bool,
        run_args: String,
    ) -> OperationOutcome {
        tracing::info!(handle = %handle, initial, "calibrate_goniometer requested");
        self.run_foreground(
            handle,
            "calibrate_goniometer",
            self.goniometer_calibration(handle, initial, run_args),
        )
        .await
    }

    async fn goniometer_calibration(
        &self,
        handle: OperationHandle,
        initial: bool,
        run_args: String,
    ) -> OperationResult {
        if initial {
            return Ok(Some(
                self.robot
                    .calibrate(CalibrationTarget::Goniometer, &run_args)
                    .await?,
            ));
        }

        self.safety
            .move_to_safe_position()
            .await
            .map_err(OrchestratorError::MakeSafeFailed)?;
        let calibration = self
            .robot
            .calibrate(CalibrationTarget::Goniometer, &run_args)
            .await;
        let undo = self.safety.return_positions().await;

        match (calibration, undo) {
            (Ok(message), Ok(())) => Ok(Some(message)),
            (Ok(_), Err(undo_err)) => Err(OrchestratorError::UndoMakeSafeFailed(undo_err)),
            (Err(robot_err), undo) => {
                if let Err(undo_err) = undo {
                    self.report_progress(handle, undo_err.to_string());
                }
                Err(OrchestratorError::Robot(robot_err))
            }
        }
    }

    pub async fn probe(&self, handle: OperationHandle, ports: ProbeRequest) -> OperationOutcome {
        tracing::info!(
            handle = %handle,
            left = %ports.flags(Position::Left),
            middle = %ports.flags(Position::Middle),
            right = %ports.flags(Position::Right),
            "probe requested"
        );
        self.run_foreground(handle, "probe", self.probe_ports(ports))
            .await
    }

    async fn probe_ports(&self, ports: ProbeRequest) -> OperationResult {
        Ok(Some(self.robot.probe(&ports).await?))
    }

    // ========================================================================
    // Background operations
    // ========================================================================

    pub async fn set_gripper(&self, handle: OperationHandle, closed: bool) -> OperationOutcome {
        self.run_background(handle, "set_gripper", async move {
            self.robot.set_gripper(closed).await.map(|()| None).map_err(Into::into)
        })
        .await
    }

    pub async fn set_lid(&self, handle: OperationHandle, open: bool) -> OperationOutcome {
        self.run_background(handle, "set_lid", async move {
            self.robot.set_lid(open).await.map(|()| None).map_err(Into::into)
        })
        .await
    }

    pub async fn set_heater(&self, handle: OperationHandle, on: bool) -> OperationOutcome {
        self.run_background(handle, "set_heater", async move {
            self.robot.set_heater(on).await.map(|()| None).map_err(Into::into)
        })
        .await
    }

    pub async fn reset_mount_counters(&self, handle: OperationHandle) -> OperationOutcome {
        self.run_background(handle, "reset_mount_counters", async move {
            self.state.set_mount_counters(0, 0);
            Ok(None)
        })
        .await
    }

    pub async fn set_port_state(
        &self,
        handle: OperationHandle,
        port: Port,
        state: PortState,
    ) -> OperationOutcome {
        self.run_background(handle, "set_port_state", async move {
            self.robot
                .set_port_state(&port, state)
                .await
                .map(Some)
                .map_err(Into::into)
        })
        .await
    }

    pub async fn reset_ports(&self, handle: OperationHandle, ports: ProbeRequest) -> OperationOutcome {
        self.run_background(handle, "reset_ports", async move {
            self.robot
                .reset_ports(&ports)
                .await
                .map(Some)
                .map_err(Into::into)
        })
        .await
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    async fn run_foreground<F>(
        &self,
        handle: OperationHandle,
        operation: &'static str,
        body: F,
    ) -> OperationOutcome
    where
        F: Future<Output = OperationResult>,
    {
        let Some(permit) = self.slot.try_acquire() else {
            tracing::warn!(handle = %handle, operation, "Foreground slot busy");
            return self.finish(handle, Err(OrchestratorError::Busy));
        };
        let pending = PendingEnd::new(handle, operation, self.reporter.clone());
        self.reporter.operation_update(OperationUpdate::begin(handle));
        let result = body.await;
        pending.complete();
        drop(permit);
        self.finish(handle, result)
    }

    async fn run_background<F>(
        &self,
        handle: OperationHandle,
        operation: &'static str,
        body: F,
    ) -> OperationOutcome
    where
        F: Future<Output = OperationResult>,
    {
        tracing::debug!(handle = %handle, operation, "Background operation started");
        let pending = PendingEnd::new(handle, operation, self.reporter.clone());
        self.reporter.operation_update(OperationUpdate::begin(handle));
        let result = body.await;
        pending.complete();
        self.finish(handle, result)
    }

    fn report_progress(&self, handle: OperationHandle, error: String) {
        self.reporter
            .operation_update(OperationUpdate::progress(handle, None, Some(error)));
    }

    fn finish(&self, handle: OperationHandle, result: OperationResult) -> OperationOutcome {
        match &result {
            Ok(_) => tracing::info!(handle = %handle, "Operation finished"),
            Err(e) => tracing::warn!(handle = %handle, error = %e, "Operation failed"),
        }
        let outcome = OperationOutcome::from(result);
        self.reporter.operation_update(OperationUpdate::end(
            handle,
            outcome.message.clone(),
            outcome.error.clone(),
        ));
        outcome
    }
}
