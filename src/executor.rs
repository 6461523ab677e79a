/// Command execution capability shared by every probe.
///
/// Probes never spawn processes themselves; they go through a
/// `CommandExecutor` so the supervisor can be driven by scripted output.
use std::future::Future;
use std::process::Stdio;
use tokio::process::Command;

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// Process exit code (None if killed by signal).
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Errors from running an external command.
#[derive(Debug)]
pub enum ExecError {
    /// The program could not be started at all.
    Spawn {
        program: String,
        source: std::io::Error,
    },
}

impl std::fmt::Display for ExecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecError::Spawn { program, source } => {
                write!(f, "failed to spawn {program}: {source}")
            }
        }
    }
}

impl std::error::Error for ExecError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ExecError::Spawn { source, .. } => Some(source),
        }
    }
}

/// Runs external programs on behalf of the supervisor.
pub trait CommandExecutor: Send + Sync + 'static {
    /// Run a program to completion and capture its output.
    fn run(
        &self,
        program: &str,
        args: &[String],
    ) -> impl Future<Output = Result<CommandOutput, ExecError>> + Send;

    /// Start a program in the background and return its PID without waiting.
    fn spawn_detached(&self, program: &str, args: &[String]) -> Result<u32, ExecError>;
}

/// Executor backed by real OS processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessExecutor;

impl CommandExecutor for ProcessExecutor {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, ExecError> {
        tracing::debug!(program, ?args, "running command");

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| ExecError::Spawn {
                program: program.to_string(),
                source: e,
            })?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
        })
    }

    /// The child runs in its own process group so an interrupt aimed at the
    /// watcher does not reach it. The handle is dropped, never awaited.
    fn spawn_detached(&self, program: &str, args: &[String]) -> Result<u32, ExecError> {
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .process_group(0)
            .spawn()
            .map_err(|e| ExecError::Spawn {
                program: program.to_string(),
                source: e,
            })?;

        Ok(child.id().unwrap_or(0))
    }
}
