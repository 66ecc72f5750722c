//! Orchestrator error type and operation outcome.

use crate::hardware::RobotError;
use crate::safety::SafetyError;

/// Errors an operation can finish with.
///
/// `Display` is the exact text clients see in the terminal update.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum OrchestratorError {
    /// Another foreground operation holds the slot
    #[error("busy")]
    Busy,
    #[error("{0}")]
    InvalidArgument(String),
    /// The safety service could not clear the arm's path
    #[error("make safe failed: {0}")]
    MakeSafeFailed(SafetyError),
    /// The safety service could not restore its equipment
    #[error("undo make safe failed: {0}")]
    UndoMakeSafeFailed(SafetyError),
    #[error("{0}")]
    Robot(#[from] RobotError),
    /// The operation's task was cancelled or panicked before it finished
    #[error("operation aborted")]
    Aborted,
}

impl OrchestratorError {
    pub fn invalid_calibration_target() -> Self {
        OrchestratorError::InvalidArgument("invalid target for calibration".to_string())
    }
}

/// Terminal result of one operation, as carried by its `end` update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationOutcome {
    pub message: Option<String>,
    pub error: Option<String>,
}

impl From<Result<Option<String>, OrchestratorError>> for OperationOutcome {
    fn from(result: Result<Option<String>, OrchestratorError>) -> Self {
        match result {
            Ok(message) => Self {
                message,
                error: None,
            },
            Err(err) => Self {
                message: None,
                error: Some(err.to_string()),
            },
        }
    }
}
