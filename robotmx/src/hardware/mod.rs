//! Hardware robot port.
//!
//! The orchestrator only talks to the robot through [`HardwareRobot`]. Each
//! call blocks until the controller reports the task complete and returns its
//! completion message, or fails with a [`RobotError`]. How the controller
//! runs a named task is the implementation's concern.

use std::sync::Arc;

use async_trait::async_trait;
use shared_types::{
    CalibrationTarget, DumbbellState, HolderType, Port, PortState, Position, ProbeRequest,
    PuckState, RobotStatus, SampleLocations,
};

pub mod sim;

pub use sim::{SimulatedRobot, SimulatedRobotConfig};

pub type SharedHardwareRobot = Arc<dyn HardwareRobot>;

/// Completion message of a robot task.
pub type RobotResult = Result<String, RobotError>;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum RobotError {
    /// The controller rejected or aborted the task
    #[error("{0}")]
    Failed(String),
    /// The task did not report completion in time
    #[error("timeout waiting for {task} after {seconds}s")]
    Timeout { task: String, seconds: u64 },
    /// The controller could not be reached
    #[error("robot unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait HardwareRobot: Send + Sync {
    async fn prepare_for_mount(&self) -> RobotResult;

    async fn mount(&self, port: &Port) -> RobotResult;

    async fn dismount(&self, port: &Port) -> RobotResult;

    async fn prefetch(&self, port: &Port) -> RobotResult;

    async fn return_prefetch(&self) -> RobotResult;

    /// Return whatever is on the placer, then prefetch `port` if given.
    async fn return_placer_and_prefetch(&self, port: Option<&Port>) -> RobotResult;

    async fn go_to_standby(&self) -> RobotResult;

    /// Send the arm back to its home position.
    async fn go_to_home(&self) -> RobotResult;

    async fn park_robot(&self, dismount: bool) -> RobotResult;

    async fn calibrate(&self, target: CalibrationTarget, run_args: &str) -> RobotResult;

    async fn probe(&self, ports: &ProbeRequest) -> RobotResult;

    async fn reset_ports(&self, ports: &ProbeRequest) -> RobotResult;

    async fn set_port_state(&self, port: &Port, state: PortState) -> RobotResult;

    async fn set_gripper(&self, closed: bool) -> Result<(), RobotError>;

    async fn set_lid(&self, open: bool) -> Result<(), RobotError>;

    async fn set_heater(&self, on: bool) -> Result<(), RobotError>;

    async fn set_auto_heat_cool_allowed(&self, allowed: bool) -> Result<(), RobotError>;

    async fn set_motors_locked(&self, locked: bool) -> Result<(), RobotError>;

    /// Sample currently on the goniometer, as reported by the controller.
    async fn mounted_sample(&self) -> Result<Option<Port>, RobotError>;
}

/// Telemetry pushed by the controller outside of any operation.
#[derive(Debug, Clone, PartialEq)]
pub enum HardwareUpdate {
    CassetteType {
        position: Position,
        holder_type: HolderType,
        min_height_error: Option<f64>,
    },
    PuckStates {
        position: Position,
        start: usize,
        values: Vec<PuckState>,
    },
    PortStates {
        position: Position,
        start: usize,
        values: Vec<PortState>,
    },
    SampleDistances {
        position: Position,
        start: usize,
        values: Vec<Option<f64>>,
    },
    SampleLocations(SampleLocations),
    MountCounters {
        pins_mounted: u32,
        pins_lost: u32,
    },
    Calibration {
        name: String,
        timestamp: String,
    },
    Dumbbell(DumbbellState),
    Status(RobotStatus),
}
