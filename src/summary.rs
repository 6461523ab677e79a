/// Session summary: the single-slot JSON record explaining why a run ended.
///
/// Each termination overwrites the previous record.
use crate::json_file::{JsonFile, JsonFileError};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Why the supervisor loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    ContainerStopped,
    TimeLimit,
    ApiQuotaExhausted,
    Inactivity,
    ManualInterrupt,
    Error,
}

impl TerminationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminationReason::ContainerStopped => "container_stopped",
            TerminationReason::TimeLimit => "time_limit",
            TerminationReason::ApiQuotaExhausted => "api_quota_exhausted",
            TerminationReason::Inactivity => "inactivity",
            TerminationReason::ManualInterrupt => "manual_interrupt",
            TerminationReason::Error => "error",
        }
    }

    /// Every reason except an already-stopped environment forces a stop.
    pub fn requires_stop(&self) -> bool {
        !matches!(self, TerminationReason::ContainerStopped)
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The JSON payload written to the summary file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub end_time: DateTime<Local>,
    pub reason: TerminationReason,
    /// Last commit in the environment workdir; `null` when unknown.
    pub last_activity_time: Option<DateTime<Local>>,
    pub started_at: DateTime<Local>,
    /// Fault description on the `error` path.
    pub detail: Option<String>,
}

/// Errors from summary file operations.
pub type SummaryError = JsonFileError;

pub struct SummaryFile {
    file: JsonFile,
}

impl SummaryFile {
    pub fn new(path: PathBuf) -> Self {
        Self {
            file: JsonFile::new(path),
        }
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Atomically replace the summary file with `summary`.
    pub fn write(&self, summary: &SessionSummary) -> Result<(), SummaryError> {
        self.file.write(summary)
    }

    /// Read the last summary, if one has been written.
    pub fn read(&self) -> Result<Option<SessionSummary>, SummaryError> {
        self.file.read()
    }
}
