//! Shared types between the robot server and its clients
//!
//! These types are used by both:
//! - The `robotmx` server (orchestrator, actors, HTTP API)
//! - Clients that issue operations and follow the update stream
//!
//! Serializable with serde for JSON over WebSocket/HTTP

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod codes;

pub use codes::{DumbbellState, HolderType, PortState, PuckState, RobotStatus};

/// Number of sample ports tracked per dewar position.
pub const PORTS_PER_POSITION: usize = 96;
/// Puck slots of a superpuck adaptor.
pub const PUCK_SLOTS: [char; 4] = ['A', 'B', 'C', 'D'];
/// Highest port number inside a single column.
pub const MAX_PORT_NUMBER: u16 = 16;

// ============================================================================
// Ports
// ============================================================================

/// Dewar position holding a cassette or adaptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Position {
    Left,
    Middle,
    Right,
}

impl Position {
    pub const ALL: [Position; 3] = [Position::Left, Position::Middle, Position::Right];

    pub fn as_str(self) -> &'static str {
        match self {
            Position::Left => "left",
            Position::Middle => "middle",
            Position::Right => "right",
        }
    }

    /// Upper-case initial used in port codes.
    pub fn initial(self) -> char {
        match self {
            Position::Left => 'L',
            Position::Middle => 'M',
            Position::Right => 'R',
        }
    }

    fn from_initial(initial: &str) -> Option<Self> {
        match initial.to_ascii_uppercase().as_str() {
            "L" => Some(Position::Left),
            "M" => Some(Position::Middle),
            "R" => Some(Position::Right),
            _ => None,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Position {
    type Err = PortCodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "left" => Ok(Position::Left),
            "middle" => Ok(Position::Middle),
            "right" => Ok(Position::Right),
            other => Err(PortCodeError::InvalidPosition(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PortCodeError {
    #[error("invalid position: {0}")]
    InvalidPosition(String),
    #[error("invalid column: {0}")]
    InvalidColumn(String),
    #[error("invalid port number: {0}")]
    InvalidPortNumber(String),
    #[error("malformed port code: {0}")]
    Malformed(String),
}

/// A sample slot: dewar position, column letter and port number.
///
/// The column is always stored upper-case so `from_code(code())` returns
/// the same port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawPort")]
pub struct Port {
    position: Position,
    column: char,
    #[serde(rename = "port")]
    port_number: u16,
}

#[derive(Deserialize)]
struct RawPort {
    position: Position,
    column: String,
    port: u16,
}

impl TryFrom<RawPort> for Port {
    type Error = PortCodeError;

    fn try_from(raw: RawPort) -> Result<Self, Self::Error> {
        let mut chars = raw.column.chars();
        match (chars.next(), chars.next()) {
            (Some(column), None) => Port::new(raw.position, column, raw.port),
            _ => Err(PortCodeError::InvalidColumn(raw.column)),
        }
    }
}

impl Port {
    pub fn new(position: Position, column: char, port_number: u16) -> Result<Self, PortCodeError> {
        if !column.is_ascii_alphabetic() {
            return Err(PortCodeError::InvalidColumn(column.to_string()));
        }
        if port_number == 0 || port_number > MAX_PORT_NUMBER {
            return Err(PortCodeError::InvalidPortNumber(port_number.to_string()));
        }
        Ok(Self {
            position,
            column: column.to_ascii_uppercase(),
            port_number,
        })
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn column(&self) -> char {
        self.column
    }

    pub fn port_number(&self) -> u16 {
        self.port_number
    }

    /// Canonical controller code, e.g. `L A 1`.
    pub fn code(&self) -> String {
        format!(
            "{} {} {}",
            self.position.initial(),
            self.column,
            self.port_number
        )
    }

    pub fn from_code(code: &str) -> Result<Self, PortCodeError> {
        let parts: Vec<&str> = code.split_whitespace().collect();
        let [position, column, port_number] = parts.as_slice() else {
            return Err(PortCodeError::Malformed(code.to_string()));
        };
        let position = Position::from_initial(position)
            .ok_or_else(|| PortCodeError::InvalidPosition(position.to_string()))?;
        let mut chars = column.chars();
        let column = match (chars.next(), chars.next()) {
            (Some(c), None) => c,
            _ => return Err(PortCodeError::InvalidColumn(column.to_string())),
        };
        let port_number = port_number
            .parse::<u16>()
            .map_err(|_| PortCodeError::InvalidPortNumber(port_number.to_string()))?;
        Port::new(position, column, port_number)
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.code())
    }
}

impl FromStr for Port {
    type Err = PortCodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Port::from_code(s)
    }
}

// ============================================================================
// Operation lifecycle
// ============================================================================

/// Correlates a client request with its lifecycle updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationHandle(pub u64);

impl fmt::Display for OperationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStage {
    Begin,
    Update,
    End,
}

/// One lifecycle update for an operation handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationUpdate {
    pub handle: OperationHandle,
    pub stage: OperationStage,
    pub message: Option<String>,
    pub error: Option<String>,
}

impl OperationUpdate {
    pub fn begin(handle: OperationHandle) -> Self {
        Self {
            handle,
            stage: OperationStage::Begin,
            message: None,
            error: None,
        }
    }

    pub fn progress(handle: OperationHandle, message: Option<String>, error: Option<String>) -> Self {
        Self {
            handle,
            stage: OperationStage::Update,
            message,
            error,
        }
    }

    pub fn end(handle: OperationHandle, message: Option<String>, error: Option<String>) -> Self {
        Self {
            handle,
            stage: OperationStage::End,
            message,
            error,
        }
    }

    pub fn is_end(&self) -> bool {
        self.stage == OperationStage::End
    }
}

/// Everything published on the update channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerUpdate {
    /// Lifecycle of a single operation
    Operation(OperationUpdate),
    /// Changed server values, keyed by attribute name
    Values {
        values: serde_json::Map<String, serde_json::Value>,
    },
}

// ============================================================================
// Operation registry
// ============================================================================

/// How an operation is scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// Answered inline from server state
    Query,
    /// Runs without the foreground slot
    Background,
    /// Causes motion; at most one at a time
    Foreground,
}

/// Port selection for probing and resetting, one flag per port.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeRequest {
    #[serde(default)]
    pub left: Vec<u8>,
    #[serde(default)]
    pub middle: Vec<u8>,
    #[serde(default)]
    pub right: Vec<u8>,
}

impl ProbeRequest {
    pub fn ports(&self, position: Position) -> &[u8] {
        match position {
            Position::Left => &self.left,
            Position::Middle => &self.middle,
            Position::Right => &self.right,
        }
    }

    /// Flags for one position as the controller expects them, e.g. `"0110"`.
    pub fn flags(&self, position: Position) -> String {
        self.ports(position)
            .iter()
            .map(|flag| if *flag == 0 { '0' } else { '1' })
            .collect()
    }
}

/// Calibration routines the controller can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalibrationTarget {
    Toolset,
    Cassette,
    Goniometer,
}

impl CalibrationTarget {
    pub fn as_str(self) -> &'static str {
        match self {
            CalibrationTarget::Toolset => "toolset",
            CalibrationTarget::Cassette => "cassette",
            CalibrationTarget::Goniometer => "goniometer",
        }
    }
}

impl FromStr for CalibrationTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "toolset" => Ok(CalibrationTarget::Toolset),
            "cassette" => Ok(CalibrationTarget::Cassette),
            "goniometer" => Ok(CalibrationTarget::Goniometer),
            other => Err(other.to_string()),
        }
    }
}

/// A client request, tagged by operation name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum OperationRequest {
    Refresh,
    SetGripper {
        value: bool,
    },
    SetLid {
        value: bool,
    },
    SetHeater {
        value: bool,
    },
    ResetMountCounters,
    SetPortState {
        port: Port,
        state: PortState,
    },
    ResetPorts {
        ports: ProbeRequest,
    },
    Probe {
        ports: ProbeRequest,
    },
    Calibrate {
        target: String,
        #[serde(default)]
        run_args: String,
    },
    CalibrateGoniometer {
        initial: bool,
        #[serde(default)]
        run_args: String,
    },
    PrepareForMount,
    Mount {
        port: Port,
    },
    Dismount {
        #[serde(default)]
        port: Option<Port>,
    },
    MountAndPrefetch {
        port: Port,
        prefetch_port: Port,
    },
    Prefetch {
        port: Port,
    },
    ReturnPrefetch,
    ParkRobot {
        #[serde(default)]
        dismount: bool,
    },
}

impl OperationRequest {
    pub fn name(&self) -> &'static str {
        match self {
            OperationRequest::Refresh => "refresh",
            OperationRequest::SetGripper { .. } => "set_gripper",
            OperationRequest::SetLid { .. } => "set_lid",
            OperationRequest::SetHeater { .. } => "set_heater",
            OperationRequest::ResetMountCounters => "reset_mount_counters",
            OperationRequest::SetPortState { .. } => "set_port_state",
            OperationRequest::ResetPorts { .. } => "reset_ports",
            OperationRequest::Probe { .. } => "probe",
            OperationRequest::Calibrate { .. } => "calibrate",
            OperationRequest::CalibrateGoniometer { .. } => "calibrate_goniometer",
            OperationRequest::PrepareForMount => "prepare_for_mount",
            OperationRequest::Mount { .. } => "mount",
            OperationRequest::Dismount { .. } => "dismount",
            OperationRequest::MountAndPrefetch { .. } => "mount_and_prefetch",
            OperationRequest::Prefetch { .. } => "prefetch",
            OperationRequest::ReturnPrefetch => "return_prefetch",
            OperationRequest::ParkRobot { .. } => "park_robot",
        }
    }

    pub fn kind(&self) -> OperationKind {
        match self {
            OperationRequest::Refresh => OperationKind::Query,
            OperationRequest::SetGripper { .. }
            | OperationRequest::SetLid { .. }
            | OperationRequest::SetHeater { .. }
            | OperationRequest::ResetMountCounters
            | OperationRequest::SetPortState { .. }
            | OperationRequest::ResetPorts { .. } => OperationKind::Background,
            OperationRequest::Probe { .. }
            | OperationRequest::Calibrate { .. }
            | OperationRequest::CalibrateGoniometer { .. }
            | OperationRequest::PrepareForMount
            | OperationRequest::Mount { .. }
            | OperationRequest::Dismount { .. }
            | OperationRequest::MountAndPrefetch { .. }
            | OperationRequest::Prefetch { .. }
            | OperationRequest::ReturnPrefetch
            | OperationRequest::ParkRobot { .. } => OperationKind::Foreground,
        }
    }
}

// ============================================================================
// Server state
// ============================================================================

/// Samples held at each named location of the exchange sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleLocations {
    pub cavity: Option<Port>,
    pub picker: Option<Port>,
    pub placer: Option<Port>,
    pub goniometer: Option<Port>,
}

/// Whether a standalone prepare is waiting for its follow-up operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreparedState {
    pub prepared: bool,
    pub deadline: Option<DateTime<Utc>>,
}

/// Full server state as returned by `refresh`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerSnapshot {
    pub robot_name: String,
    pub motors_locked: bool,
    pub auto_heat_cool_allowed: bool,
    pub status: RobotStatus,
    pub pins_mounted: u32,
    pub pins_lost: u32,
    pub sample_locations: SampleLocations,
    pub dumbbell_state: DumbbellState,
    pub holder_types: BTreeMap<Position, HolderType>,
    pub height_errors: BTreeMap<Position, Option<f64>>,
    pub puck_states: BTreeMap<Position, BTreeMap<String, PuckState>>,
    pub port_states: BTreeMap<Position, Vec<PortState>>,
    pub port_distances: BTreeMap<Position, Vec<Option<f64>>>,
    pub last_calibrations: BTreeMap<String, String>,
    pub prepared: PreparedState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_code_is_uppercase() {
        let port = Port::new(Position::Left, 'a', 1).unwrap();
        assert_eq!(port.code(), "L A 1");
        assert_eq!(port.to_string(), "L A 1");
    }

    #[test]
    fn test_port_code_round_trip() {
        for position in Position::ALL {
            for column in ['A', 'D', 'L'] {
                for number in [1, 8, MAX_PORT_NUMBER] {
                    let port = Port::new(position, column, number).unwrap();
                    assert_eq!(Port::from_code(&port.code()).unwrap(), port);
                }
            }
        }
    }

    #[test]
    fn test_port_from_code_rejects_garbage() {
        assert!(matches!(
            Port::from_code("X A 1"),
            Err(PortCodeError::InvalidPosition(_))
        ));
        assert!(matches!(
            Port::from_code("L AB 1"),
            Err(PortCodeError::InvalidColumn(_))
        ));
        assert!(matches!(
            Port::from_code("L A 0"),
            Err(PortCodeError::InvalidPortNumber(_))
        ));
        assert!(matches!(
            Port::from_code("L A"),
            Err(PortCodeError::Malformed(_))
        ));
    }

    #[test]
    fn test_port_json_uses_controller_field_names() {
        let port: Port =
            serde_json::from_str(r#"{"position":"middle","column":"b","port":3}"#).unwrap();
        assert_eq!(port.code(), "M B 3");

        let json = serde_json::to_value(port).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"position": "middle", "column": "B", "port": 3})
        );

        let bad = serde_json::from_str::<Port>(r#"{"position":"left","column":"1","port":3}"#);
        assert!(bad.is_err());
    }

    #[test]
    fn test_operation_request_registry() {
        let request: OperationRequest = serde_json::from_str(
            r#"{"operation":"mount","port":{"position":"left","column":"A","port":1}}"#,
        )
        .unwrap();
        assert_eq!(request.name(), "mount");
        assert_eq!(request.kind(), OperationKind::Foreground);

        let request: OperationRequest =
            serde_json::from_str(r#"{"operation":"dismount"}"#).unwrap();
        assert_eq!(request, OperationRequest::Dismount { port: None });

        let request: OperationRequest =
            serde_json::from_str(r#"{"operation":"reset_mount_counters"}"#).unwrap();
        assert_eq!(request.kind(), OperationKind::Background);

        let request: OperationRequest =
            serde_json::from_str(r#"{"operation":"refresh"}"#).unwrap();
        assert_eq!(request.kind(), OperationKind::Query);
    }

    #[test]
    fn test_server_update_wire_shape() {
        let update = ServerUpdate::Operation(OperationUpdate::end(
            OperationHandle(101),
            None,
            Some("busy".to_string()),
        ));
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "operation",
                "handle": 101,
                "stage": "end",
                "message": null,
                "error": "busy",
            })
        );
    }

    #[test]
    fn test_probe_request_flags() {
        let request = ProbeRequest {
            left: vec![0, 1, 1, 0],
            ..ProbeRequest::default()
        };
        assert_eq!(request.flags(Position::Left), "0110");
        assert_eq!(request.flags(Position::Right), "");
    }
}
