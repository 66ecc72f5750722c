//! In-process robot used when no controller is attached.
//!
//! Tracks where samples are between picker, placer, cavity and goniometer,
//! waits `task_delay` per task, and pushes the same telemetry the controller
//! would (`SampleLocations`, `MountCounters`, `Calibration`).

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use shared_types::{CalibrationTarget, Port, PortState, ProbeRequest, SampleLocations};
use tokio::sync::mpsc;

use super::{HardwareRobot, HardwareUpdate, RobotError, RobotResult};

#[derive(Debug, Clone)]
pub struct SimulatedRobotConfig {
    pub name: String,
    pub task_delay: Duration,
}

impl Default for SimulatedRobotConfig {
    fn default() -> Self {
        Self {
            name: "ROBOT_MX".to_string(),
            task_delay: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Default)]
struct SimState {
    locations: SampleLocations,
    pins_mounted: u32,
    motors_locked: bool,
    auto_heat_cool_allowed: bool,
    gripper_closed: bool,
    lid_open: bool,
    heater_on: bool,
}

pub struct SimulatedRobot {
    config: SimulatedRobotConfig,
    state: Mutex<SimState>,
    updates: Option<mpsc::UnboundedSender<HardwareUpdate>>,
}

impl SimulatedRobot {
    pub fn new(config: SimulatedRobotConfig) -> Self {
        Self {
            config,
            state: Mutex::new(SimState {
                auto_heat_cool_allowed: true,
                ..SimState::default()
            }),
            updates: None,
        }
    }

    /// Forward telemetry to `tx`, the way the controller's monitor PVs would.
    pub fn with_updates(mut self, tx: mpsc::UnboundedSender<HardwareUpdate>) -> Self {
        self.updates = Some(tx);
        self
    }

    pub fn sample_locations(&self) -> SampleLocations {
        self.lock_state().locations.clone()
    }

    pub fn motors_locked(&self) -> bool {
        self.lock_state().motors_locked
    }

    pub fn auto_heat_cool_allowed(&self) -> bool {
        self.lock_state().auto_heat_cool_allowed
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, update: HardwareUpdate) {
        if let Some(tx) = &self.updates {
            let _ = tx.send(update);
        }
    }

    async fn run_task(&self, task: &str) {
        tracing::debug!(robot = %self.config.name, task, "simulated task started");
        if !self.config.task_delay.is_zero() {
            tokio::time::sleep(self.config.task_delay).await;
        }
    }

    /// Apply `change` to the sample locations and publish the result.
    fn move_samples<F>(&self, change: F) -> Result<(), RobotError>
    where
        F: FnOnce(&mut SampleLocations) -> Result<(), RobotError>,
    {
        let locations = {
            let mut state = self.lock_state();
            change(&mut state.locations)?;
            state.locations.clone()
        };
        self.emit(HardwareUpdate::SampleLocations(locations));
        Ok(())
    }
}

#[async_trait]
impl HardwareRobot for SimulatedRobot {
    async fn prepare_for_mount(&self) -> RobotResult {
        self.run_task("PrepareForMountDismount").await;
        Ok("at cooling point".to_string())
    }

    async fn mount(&self, port: &Port) -> RobotResult {
        self.run_task("MountSamplePort").await;
        let port = *port;
        self.move_samples(|locations| {
            if let Some(current) = locations.goniometer {
                return Err(RobotError::Failed(format!(
                    "goniometer already holds {current}"
                )));
            }
            if locations.picker == Some(port) {
                locations.picker = None;
            }
            locations.goniometer = Some(port);
            Ok(())
        })?;
        let (pins_mounted, pins_lost) = {
            let mut state = self.lock_state();
            state.pins_mounted += 1;
            (state.pins_mounted, 0)
        };
        self.emit(HardwareUpdate::MountCounters {
            pins_mounted,
            pins_lost,
        });
        Ok(format!("mounted {port}"))
    }

    async fn dismount(&self, port: &Port) -> RobotResult {
        self.run_task("DismountSample").await;
        let port = *port;
        self.move_samples(|locations| match locations.goniometer {
            Some(current) if current == port => {
                locations.goniometer = None;
                locations.placer = Some(current);
                Ok(())
            }
            Some(current) => Err(RobotError::Failed(format!(
                "goniometer holds {current}, not {port}"
            ))),
            None => Err(RobotError::Failed("no sample on goniometer".to_string())),
        })?;
        Ok(format!("dismounted {port}"))
    }

    async fn prefetch(&self, port: &Port) -> RobotResult {
        self.run_task("PrefetchSample").await;
        let port = *port;
        self.move_samples(|locations| {
            if let Some(current) = locations.picker {
                return Err(RobotError::Failed(format!(
                    "picker already holds {current}"
                )));
            }
            locations.picker = Some(port);
            Ok(())
        })?;
        Ok(format!("prefetched {port}"))
    }

    async fn return_prefetch(&self) -> RobotResult {
        self.run_task("ReturnPrefetch").await;
        let mut returned = None;
        self.move_samples(|locations| {
            returned = locations.picker.take();
            Ok(())
        })?;
        Ok(match returned {
            Some(port) => format!("returned {port}"),
            None => "no prefetched sample".to_string(),
        })
    }

    async fn return_placer_and_prefetch(&self, port: Option<&Port>) -> RobotResult {
        self.run_task("ReturnPlacerAndPrefetch").await;
        let port = port.copied();
        self.move_samples(|locations| {
            locations.placer = None;
            if let Some(port) = port {
                if locations.picker.is_some_and(|current| current != port) {
                    return Err(RobotError::Failed(
                        "picker already holds another sample".to_string(),
                    ));
                }
                locations.picker = Some(port);
            }
            Ok(())
        })?;
        Ok("placer clear".to_string())
    }

    async fn go_to_standby(&self) -> RobotResult {
        self.run_task("GoStandby").await;
        Ok("at standby".to_string())
    }

    async fn go_to_home(&self) -> RobotResult {
        self.run_task("GoHome").await;
        Ok("at home".to_string())
    }

    async fn park_robot(&self, dismount: bool) -> RobotResult {
        self.run_task("ParkRobot").await;
        if dismount {
            self.move_samples(|locations| {
                locations.goniometer = None;
                locations.placer = None;
                Ok(())
            })?;
        }
        Ok("parked".to_string())
    }

    async fn calibrate(&self, target: CalibrationTarget, run_args: &str) -> RobotResult {
        self.run_task("Calibrate").await;
        self.emit(HardwareUpdate::Calibration {
            name: target.as_str().to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        });
        Ok(format!("{} calibrated ({run_args})", target.as_str()))
    }

    async fn probe(&self, ports: &ProbeRequest) -> RobotResult {
        self.run_task("ProbeCassettes").await;
        let requested: usize = [&ports.left, &ports.middle, &ports.right]
            .iter()
            .map(|flags| flags.iter().filter(|flag| **flag != 0).count())
            .sum();
        Ok(format!("probed {requested} ports"))
    }

    async fn reset_ports(&self, ports: &ProbeRequest) -> RobotResult {
        self.run_task("ResetCassettePorts").await;
        let requested: usize = [&ports.left, &ports.middle, &ports.right]
            .iter()
            .map(|flags| flags.iter().filter(|flag| **flag != 0).count())
            .sum();
        Ok(format!("reset {requested} ports"))
    }

    async fn set_port_state(&self, port: &Port, state: PortState) -> RobotResult {
        self.run_task("SetPortState").await;
        Ok(format!("{} {}", port.code(), state.code()))
    }

    async fn set_gripper(&self, closed: bool) -> Result<(), RobotError> {
        self.lock_state().gripper_closed = closed;
        Ok(())
    }

    async fn set_lid(&self, open: bool) -> Result<(), RobotError> {
        self.lock_state().lid_open = open;
        Ok(())
    }

    async fn set_heater(&self, on: bool) -> Result<(), RobotError> {
        self.lock_state().heater_on = on;
        Ok(())
    }

    async fn set_auto_heat_cool_allowed(&self, allowed: bool) -> Result<(), RobotError> {
        self.lock_state().auto_heat_cool_allowed = allowed;
        Ok(())
    }

    async fn set_motors_locked(&self, locked: bool) -> Result<(), RobotError> {
        self.lock_state().motors_locked = locked;
        Ok(())
    }

    async fn mounted_sample(&self) -> Result<Option<Port>, RobotError> {
        Ok(self.lock_state().locations.goniometer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::Position;

    fn instant_robot() -> SimulatedRobot {
        SimulatedRobot::new(SimulatedRobotConfig {
            name: "SIM".to_string(),
            task_delay: Duration::ZERO,
        })
    }

    #[tokio::test]
    async fn test_mount_then_dismount_leaves_sample_on_placer() {
        let robot = instant_robot();
        let port = Port::new(Position::Left, 'A', 1).unwrap();

        robot.mount(&port).await.unwrap();
        assert_eq!(robot.mounted_sample().await.unwrap(), Some(port));

        robot.dismount(&port).await.unwrap();
        let locations = robot.sample_locations();
        assert_eq!(locations.goniometer, None);
        assert_eq!(locations.placer, Some(port));

        robot.return_placer_and_prefetch(None).await.unwrap();
        assert_eq!(robot.sample_locations(), SampleLocations::default());
    }

    #[tokio::test]
    async fn test_mount_refuses_occupied_goniometer() {
        let robot = instant_robot();
        let first = Port::new(Position::Left, 'A', 1).unwrap();
        let second = Port::new(Position::Right, 'B', 2).unwrap();

        robot.mount(&first).await.unwrap();
        let err = robot.mount(&second).await.unwrap_err();
        assert_eq!(err, RobotError::Failed("goniometer already holds L A 1".to_string()));
    }

    #[tokio::test]
    async fn test_telemetry_follows_sample_moves() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let robot = instant_robot().with_updates(tx);
        let port = Port::new(Position::Middle, 'C', 4).unwrap();

        robot.prefetch(&port).await.unwrap();
        robot.mount(&port).await.unwrap();

        let mut last_locations = None;
        let mut counters = None;
        while let Ok(update) = rx.try_recv() {
            match update {
                HardwareUpdate::SampleLocations(locations) => last_locations = Some(locations),
                HardwareUpdate::MountCounters { pins_mounted, .. } => counters = Some(pins_mounted),
                _ => {}
            }
        }
        let locations = last_locations.expect("locations update");
        assert_eq!(locations.picker, None);
        assert_eq!(locations.goniometer, Some(port));
        assert_eq!(counters, Some(1));
    }
}
