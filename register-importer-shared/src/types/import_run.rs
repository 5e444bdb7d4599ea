use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of one import-command execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i16)]
pub enum RunStatus {
    Pending = 0,
    Running = 1,
    Completed = 2,
    Failed = 3,
}

impl RunStatus {
    pub fn from_i16(value: i16) -> Option<Self> {
        match value {
            0 => Some(RunStatus::Pending),
            1 => Some(RunStatus::Running),
            2 => Some(RunStatus::Completed),
            3 => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

/// Operational record of one import-command execution.
///
/// Created when the command starts, appended to as log lines arrive, and
/// finalized as completed or failed. Used for observability, not business
/// logic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportRun {
    pub id: i64,
    pub command: String,
    pub cmd_options: Option<String>,
    pub started: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub completed: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub log: String,
}
