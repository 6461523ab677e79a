/// Activity monitor: is the agent process alive inside the environment, and
/// when did it last commit?
use crate::config::{AgentConfig, EnvironmentConfig};
use crate::environment::{shell_quote, EnvironmentProbe};
use crate::executor::CommandExecutor;
use chrono::{DateTime, Local, TimeZone};

pub struct ActivityMonitor<E> {
    environment: EnvironmentProbe<E>,
    workdir: String,
    process_pattern: String,
}

impl<E> Clone for ActivityMonitor<E> {
    fn clone(&self) -> Self {
        Self {
            environment: self.environment.clone(),
            workdir: self.workdir.clone(),
            process_pattern: self.process_pattern.clone(),
        }
    }
}

impl<E: CommandExecutor> ActivityMonitor<E> {
    pub fn new(
        environment: EnvironmentProbe<E>,
        env_config: &EnvironmentConfig,
        agent: &AgentConfig,
    ) -> Self {
        Self {
            environment,
            workdir: env_config.workdir.clone(),
            process_pattern: agent.process_pattern.clone(),
        }
    }

    /// True iff an agent process is visible inside the environment.
    pub async fn is_session_active(&self) -> bool {
        let script = format!(
            "ps aux | grep -i {} | grep -v grep",
            shell_quote(&self.process_pattern)
        );
        match self.environment.exec(&script).await {
            Ok(output) => output.success(),
            Err(e) => {
                tracing::warn!(error = %e, "process check failed, treating session as inactive");
                false
            }
        }
    }

    /// Time of the most recent commit in the environment workdir, if any.
    pub async fn last_activity_time(&self) -> Option<DateTime<Local>> {
        let script = format!(
            "cd {} && git log -1 --format=%ct 2>/dev/null",
            shell_quote(&self.workdir)
        );
        match self.environment.exec(&script).await {
            Ok(output) if output.success() => parse_commit_timestamp(&output.stdout),
            Ok(output) => {
                tracing::debug!(exit_code = ?output.exit_code, "no commit activity available");
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to query last commit time");
                None
            }
        }
    }
}

/// Parse `git log --format=%ct` output (unix seconds) into local time.
pub fn parse_commit_timestamp(stdout: &str) -> Option<DateTime<Local>> {
    let secs: i64 = stdout.trim().parse().ok()?;
    Local.timestamp_opt(secs, 0).single()
}
