use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration loaded from warden.toml.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
#[derive(Default)]
pub struct WatcherConfig {
    pub environment: EnvironmentConfig,
    pub runtime: RuntimeConfig,
    pub schedule: ScheduleConfig,
    pub quota: QuotaConfig,
    pub watch: WatchConfig,
    pub agent: AgentConfig,
    pub output: OutputConfig,
    pub shutdown: ShutdownConfig,
}

/// Which sandbox to supervise and where the agent works inside it.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EnvironmentConfig {
    pub name: String,
    pub workdir: String,
}

/// Argv templates for the sandbox runtime. `{name}` expands to the
/// environment name.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub status: Vec<String>,
    /// Substring of the status output that means the environment is up.
    pub running_marker: String,
    /// Prefix for running a command inside the environment.
    pub exec: Vec<String>,
    pub stop: Vec<String>,
}

/// Daily stop window in local time: `[stop_hour, resume_hour)`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub stop_hour: u32,
    pub resume_hour: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QuotaConfig {
    pub command: Vec<String>,
    pub min_remaining: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WatchConfig {
    pub poll_interval_secs: u64,
    pub warmup_secs: u64,
    pub max_inactive_ticks: u32,
    /// Log the age of the last commit every N consecutive active ticks (0 disables).
    pub activity_log_every: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AgentConfig {
    pub command: String,
    pub args: Vec<String>,
    /// Pattern searched for in `ps aux` inside the environment.
    pub process_pattern: String,
    pub prompt_file: PathBuf,
    /// Session log, relative to the environment workdir.
    pub session_log: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OutputConfig {
    pub log_file: PathBuf,
    pub summary_file: PathBuf,
    pub status_file: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShutdownConfig {
    pub stop_file: PathBuf,
}

impl WatcherConfig {
    /// Load config from a TOML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                source: e,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source: e,
            }),
        }
    }

    /// Check the merged configuration for values the supervisor cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.environment.name.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "environment.name must not be empty".to_string(),
            ));
        }
        if self.schedule.stop_hour > 23 {
            return Err(ConfigError::Invalid(format!(
                "schedule.stop_hour must be 0-23, got {}",
                self.schedule.stop_hour
            )));
        }
        if self.schedule.resume_hour > 23 {
            return Err(ConfigError::Invalid(format!(
                "schedule.resume_hour must be 0-23, got {}",
                self.schedule.resume_hour
            )));
        }
        if self.watch.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "watch.poll_interval_secs must be greater than 0".to_string(),
            ));
        }
        if self.watch.max_inactive_ticks == 0 {
            return Err(ConfigError::Invalid(
                "watch.max_inactive_ticks must be at least 1".to_string(),
            ));
        }
        let templates = [
            ("runtime.status", &self.runtime.status),
            ("runtime.exec", &self.runtime.exec),
            ("runtime.stop", &self.runtime.stop),
            ("quota.command", &self.quota.command),
        ];
        for (key, argv) in templates {
            if argv.is_empty() {
                return Err(ConfigError::Invalid(format!("{key} must not be empty")));
            }
        }
        if self.agent.command.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "agent.command must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl ScheduleConfig {
    /// Whether `hour` falls inside the stop window. The window wraps past
    /// midnight when `stop_hour > resume_hour` and is empty when they match.
    pub fn in_stop_window(&self, hour: u32) -> bool {
        let (start, end) = (self.stop_hour, self.resume_hour);
        if start <= end {
            hour >= start && hour < end
        } else {
            hour >= start || hour < end
        }
    }
}

/// Errors from loading or validating the configuration.
#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {source}", path.display())
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config {}: {source}", path.display())
            }
            ConfigError::Invalid(msg) => write!(f, "invalid config: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::Invalid(_) => None,
        }
    }
}

// --- Default implementations ---

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            name: "ai-agent".to_string(),
            workdir: "/home/ai-agent/ai-sandbox".to_string(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            status: argv(&["lxc", "info", "{name}"]),
            running_marker: "Status: RUNNING".to_string(),
            exec: argv(&["lxc", "exec", "{name}", "--"]),
            stop: argv(&["lxc", "stop", "{name}", "-f"]),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            stop_hour: 4,
            resume_hour: 12,
        }
    }
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            command: argv(&["claude", "code", "/glm-plan-usage:usage-query"]),
            min_remaining: 1000,
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 60,
            warmup_secs: 10,
            max_inactive_ticks: 30,
            activity_log_every: 10,
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: "claude".to_string(),
            args: argv(&["code", "--prompt", "{prompt}"]),
            process_pattern: "claude".to_string(),
            prompt_file: PathBuf::from("config/system_prompt_runtime.txt"),
            session_log: "logs/session.log".to_string(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            log_file: PathBuf::from("controller.log"),
            summary_file: PathBuf::from("last_session_summary.json"),
            status_file: PathBuf::from("warden.status"),
        }
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            stop_file: PathBuf::from("STOP"),
        }
    }
}
