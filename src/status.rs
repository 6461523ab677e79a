/// Status file: writes `warden.status` as JSON on every tick and state change.
///
/// Read back by `--status`.
use crate::json_file::{JsonFile, JsonFileError};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Watcher states written to the status file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatcherState {
    WaitingForEnvironment,
    Polling,
    Launching,
    ShuttingDown,
    Terminated,
}

/// The JSON payload written to `warden.status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusData {
    pub pid: u32,
    pub state: WatcherState,
    pub environment: String,
    pub tick: u64,
    pub session_active: bool,
    pub inactivity_count: u32,
    pub sessions_launched: u32,
    pub last_quota: Option<u64>,
    pub started_at: DateTime<Local>,
    pub last_update: DateTime<Local>,
}

/// Errors from status file operations.
pub type StatusError = JsonFileError;

/// Manages the status file lifecycle.
pub struct StatusFile {
    file: JsonFile,
}

impl StatusFile {
    pub fn new(path: PathBuf) -> Self {
        Self {
            file: JsonFile::new(path),
        }
    }

    /// Atomically write status data to the status file.
    pub fn write(&self, data: &StatusData) -> Result<(), StatusError> {
        self.file.write(data)
    }

    /// Read the current status, if a watcher has written one.
    pub fn read(&self) -> Result<Option<StatusData>, StatusError> {
        self.file.read()
    }
}

/// Mutable state tracker that builds StatusData for each update.
pub struct StatusTracker {
    file: StatusFile,
    pid: u32,
    environment: String,
    tick: u64,
    session_active: bool,
    inactivity_count: u32,
    sessions_launched: u32,
    last_quota: Option<u64>,
    started_at: DateTime<Local>,
}

impl StatusTracker {
    pub fn new(status_path: PathBuf, environment: &str, started_at: DateTime<Local>) -> Self {
        Self {
            file: StatusFile::new(status_path),
            pid: std::process::id(),
            environment: environment.to_string(),
            tick: 0,
            session_active: false,
            inactivity_count: 0,
            sessions_launched: 0,
            last_quota: None,
            started_at,
        }
    }

    /// Update and write the status file with the given state.
    pub fn update(&self, state: WatcherState) {
        let data = StatusData {
            pid: self.pid,
            state,
            environment: self.environment.clone(),
            tick: self.tick,
            session_active: self.session_active,
            inactivity_count: self.inactivity_count,
            sessions_launched: self.sessions_launched,
            last_quota: self.last_quota,
            started_at: self.started_at,
            last_update: Local::now(),
        };

        if let Err(e) = self.file.write(&data) {
            tracing::warn!(error = %e, "failed to write status file");
        }
    }

    pub fn set_tick(&mut self, tick: u64) {
        self.tick = tick;
    }

    pub fn set_session(&mut self, active: bool, inactivity_count: u32, sessions_launched: u32) {
        self.session_active = active;
        self.inactivity_count = inactivity_count;
        self.sessions_launched = sessions_launched;
    }

    pub fn set_last_quota(&mut self, quota: Option<u64>) {
        self.last_quota = quota;
    }
}
