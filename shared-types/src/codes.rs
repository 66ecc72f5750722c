//! Status codes reported by the robot controller.
//!
//! The integer values match what the controller publishes, so the
//! `from_code` / `code` pairs are the only place the raw numbers appear.

use serde::{Deserialize, Serialize};

/// Kind of sample holder sitting at a dewar position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HolderType {
    /// Unknown, absent, or in error.
    #[default]
    Unknown,
    Calibration,
    Normal,
    Superpuck,
}

impl HolderType {
    pub fn code(self) -> u8 {
        match self {
            HolderType::Unknown => 0,
            HolderType::Calibration => 1,
            HolderType::Normal => 2,
            HolderType::Superpuck => 3,
        }
    }

    /// Parse the holder name used in controller `cassette_type` messages.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "unknown" => Some(HolderType::Unknown),
            "calibration" => Some(HolderType::Calibration),
            "normal" => Some(HolderType::Normal),
            "superpuck" => Some(HolderType::Superpuck),
            _ => None,
        }
    }
}

/// Occupancy of a single sample port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortState {
    Full,
    #[default]
    Unknown,
    Empty,
    Error,
}

impl PortState {
    pub fn code(self) -> i8 {
        match self {
            PortState::Full => -1,
            PortState::Unknown => 0,
            PortState::Empty => 1,
            PortState::Error => 2,
        }
    }

    pub fn from_code(code: i8) -> Option<Self> {
        match code {
            -1 => Some(PortState::Full),
            0 => Some(PortState::Unknown),
            1 => Some(PortState::Empty),
            2 => Some(PortState::Error),
            _ => None,
        }
    }
}

/// Occupancy of a puck slot in a superpuck adaptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PuckState {
    Full,
    #[default]
    Unknown,
    Empty,
    Error,
}

impl PuckState {
    pub fn from_code(code: i8) -> Option<Self> {
        match code {
            -1 => Some(PuckState::Full),
            0 => Some(PuckState::Unknown),
            1 => Some(PuckState::Empty),
            2 => Some(PuckState::Error),
            _ => None,
        }
    }
}

/// Where the calibration dumbbell currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DumbbellState {
    #[default]
    Unknown,
    InCradle,
    InGripper,
    Missing,
}

impl DumbbellState {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(DumbbellState::Unknown),
            1 => Some(DumbbellState::InCradle),
            2 => Some(DumbbellState::InGripper),
            3 => Some(DumbbellState::Missing),
            _ => None,
        }
    }
}

/// Controller status word: "need" bits, "reason" bits and "in" bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RobotStatus(pub u32);

impl RobotStatus {
    pub const NEED_ALL: u32 = 0x0000_007f;
    pub const NEED_CAL_ALL: u32 = 0x0000_003c;
    pub const NEED_CLEAR: u32 = 0x0000_0001;
    pub const NEED_RESET: u32 = 0x0000_0002;
    pub const NEED_CAL_MAGNET: u32 = 0x0000_0004;
    pub const NEED_CAL_CASSETTE: u32 = 0x0000_0008;
    pub const NEED_CAL_GONIO: u32 = 0x0000_0010;
    pub const NEED_CAL_BASIC: u32 = 0x0000_0020;
    pub const NEED_USER_ACTION: u32 = 0x0000_0040;
    pub const REASON_ALL: u32 = 0x0fff_ff80;
    pub const REASON_PORT_JAM: u32 = 0x0000_0080;
    pub const REASON_ESTOP: u32 = 0x0000_0100;
    pub const REASON_SAFEGUARD: u32 = 0x0000_0200;
    pub const REASON_NOT_HOME: u32 = 0x0000_0400;
    pub const REASON_CMD_ERROR: u32 = 0x0000_0800;
    pub const REASON_LID_JAM: u32 = 0x0000_1000;
    pub const REASON_GRIPPER_JAM: u32 = 0x0000_2000;
    pub const REASON_LOST_MAGNET: u32 = 0x0000_4000;
    pub const REASON_COLLISION: u32 = 0x0000_8000;
    pub const REASON_INIT: u32 = 0x0001_0000;
    pub const REASON_TOLERANCE: u32 = 0x0002_0000;
    pub const REASON_LN2LEVEL: u32 = 0x0004_0000;
    pub const REASON_HEATER_FAIL: u32 = 0x0008_0000;
    pub const REASON_CASSETTE: u32 = 0x0010_0000;
    pub const REASON_PIN_LOST: u32 = 0x0020_0000;
    pub const REASON_WRONG_STATE: u32 = 0x0040_0000;
    pub const REASON_BAD_ARG: u32 = 0x0080_0000;
    pub const REASON_SAMPLE_IN_PORT: u32 = 0x0100_0000;
    pub const REASON_ABORT: u32 = 0x0200_0000;
    pub const REASON_UNREACHABLE: u32 = 0x0400_0000;
    pub const REASON_EXTERNAL: u32 = 0x0800_0000;
    pub const IN_ALL: u32 = 0xf000_0000;
    pub const IN_RESET: u32 = 0x1000_0000;
    pub const IN_CALIBRATION: u32 = 0x2000_0000;
    pub const IN_TOOL: u32 = 0x4000_0000;
    pub const IN_MANUAL: u32 = 0x8000_0000;

    const REASON_NAMES: [(u32, &'static str); 21] = [
        (Self::REASON_PORT_JAM, "port_jam"),
        (Self::REASON_ESTOP, "estop"),
        (Self::REASON_SAFEGUARD, "safeguard"),
        (Self::REASON_NOT_HOME, "not_home"),
        (Self::REASON_CMD_ERROR, "cmd_error"),
        (Self::REASON_LID_JAM, "lid_jam"),
        (Self::REASON_GRIPPER_JAM, "gripper_jam"),
        (Self::REASON_LOST_MAGNET, "lost_magnet"),
        (Self::REASON_COLLISION, "collision"),
        (Self::REASON_INIT, "init"),
        (Self::REASON_TOLERANCE, "tolerance"),
        (Self::REASON_LN2LEVEL, "ln2level"),
        (Self::REASON_HEATER_FAIL, "heater_fail"),
        (Self::REASON_CASSETTE, "cassette"),
        (Self::REASON_PIN_LOST, "pin_lost"),
        (Self::REASON_WRONG_STATE, "wrong_state"),
        (Self::REASON_BAD_ARG, "bad_arg"),
        (Self::REASON_SAMPLE_IN_PORT, "sample_in_port"),
        (Self::REASON_ABORT, "abort"),
        (Self::REASON_UNREACHABLE, "unreachable"),
        (Self::REASON_EXTERNAL, "external"),
    ];

    pub fn contains(self, mask: u32) -> bool {
        self.0 & mask != 0
    }

    pub fn needs_calibration(self) -> bool {
        self.contains(Self::NEED_CAL_ALL)
    }

    pub fn needs_user_action(self) -> bool {
        self.contains(Self::NEED_USER_ACTION)
    }

    /// Names of every reason bit that is set, lowest bit first.
    pub fn reasons(self) -> Vec<&'static str> {
        Self::REASON_NAMES
            .iter()
            .filter(|(mask, _)| self.contains(*mask))
            .map(|(_, name)| *name)
            .collect()
    }
}
