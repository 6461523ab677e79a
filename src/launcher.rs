/// Session launcher: start one agent run inside the environment and return
/// immediately. Completion is never observed here; the supervisor learns
/// about it by polling the activity monitor.
use crate::config::{AgentConfig, EnvironmentConfig};
use crate::environment::EnvironmentProbe;
use crate::executor::{CommandExecutor, ExecError};
use std::path::{Path, PathBuf};

/// Positional args: $1 workdir, $2 session log, then the agent argv.
const LAUNCH_SCRIPT: &str = r#"cd "$1" || exit 1
log="$2"
shift 2
mkdir -p "$(dirname "$log")"
echo "Starting autonomous agent session at $(date)" >> "$log"
exec "$@" >> "$log" 2>&1"#;

/// Errors that prevent a launch attempt.
#[derive(Debug)]
pub enum LaunchError {
    /// The instruction payload file does not exist.
    MissingPrompt { path: PathBuf },
    /// The instruction payload file exists but is blank.
    EmptyPrompt { path: PathBuf },
    ReadPrompt {
        path: PathBuf,
        source: std::io::Error,
    },
    Spawn { source: ExecError },
}

impl std::fmt::Display for LaunchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LaunchError::MissingPrompt { path } => {
                write!(f, "prompt file not found: {}", path.display())
            }
            LaunchError::EmptyPrompt { path } => {
                write!(f, "prompt file is empty: {}", path.display())
            }
            LaunchError::ReadPrompt { path, source } => {
                write!(f, "failed to read prompt file {}: {source}", path.display())
            }
            LaunchError::Spawn { source } => {
                write!(f, "failed to launch agent session: {source}")
            }
        }
    }
}

impl std::error::Error for LaunchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LaunchError::ReadPrompt { source, .. } => Some(source),
            LaunchError::Spawn { source } => Some(source),
            LaunchError::MissingPrompt { .. } | LaunchError::EmptyPrompt { .. } => None,
        }
    }
}

/// Read the instruction payload. Re-read on every attempt so a file created
/// after startup is picked up on the next tick.
pub fn load_prompt(path: &Path) -> Result<String, LaunchError> {
    let prompt = std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            LaunchError::MissingPrompt {
                path: path.to_path_buf(),
            }
        } else {
            LaunchError::ReadPrompt {
                path: path.to_path_buf(),
                source: e,
            }
        }
    })?;
    if prompt.trim().is_empty() {
        return Err(LaunchError::EmptyPrompt {
            path: path.to_path_buf(),
        });
    }
    Ok(prompt)
}

/// Build the agent arguments, replacing `{prompt}` placeholders with the payload.
fn build_args(agent_config: &AgentConfig, prompt: &str) -> Vec<String> {
    agent_config
        .args
        .iter()
        .map(|arg| arg.replace("{prompt}", prompt))
        .collect()
}

pub struct SessionLauncher<E> {
    environment: EnvironmentProbe<E>,
    agent: AgentConfig,
    workdir: String,
}

impl<E: CommandExecutor> SessionLauncher<E> {
    pub fn new(
        environment: EnvironmentProbe<E>,
        env_config: &EnvironmentConfig,
        agent: &AgentConfig,
    ) -> Self {
        Self {
            environment,
            agent: agent.clone(),
            workdir: env_config.workdir.clone(),
        }
    }

    /// Command run inside the environment for a given payload. The prompt is
    /// passed as an argument, never spliced into the script text.
    fn launch_command(&self, prompt: &str) -> Vec<String> {
        let mut command = vec![
            "bash".to_string(),
            "-c".to_string(),
            LAUNCH_SCRIPT.to_string(),
            "warden".to_string(),
            self.workdir.clone(),
            self.agent.session_log.clone(),
            self.agent.command.clone(),
        ];
        command.extend(build_args(&self.agent, prompt));
        command
    }

    /// Start a new agent session in the background and return its local PID.
    pub fn start_session(&self) -> Result<u32, LaunchError> {
        let prompt = load_prompt(&self.agent.prompt_file)?;
        tracing::info!(
            environment = %self.environment.name(),
            command = %self.agent.command,
            prompt_bytes = prompt.len(),
            "starting agent session"
        );
        let pid = self
            .environment
            .spawn(&self.launch_command(&prompt))
            .map_err(|e| LaunchError::Spawn { source: e })?;
        tracing::info!(pid, "agent session started");
        Ok(pid)
    }
}
