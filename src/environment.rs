/// Environment probe and shutdown: status, exec, and forced stop against the
/// sandbox runtime, built from the `{name}` argv templates in `[runtime]`.
use crate::config::{EnvironmentConfig, RuntimeConfig};
use crate::executor::{CommandExecutor, CommandOutput, ExecError};
use std::sync::Arc;

pub struct EnvironmentProbe<E> {
    executor: Arc<E>,
    name: String,
    runtime: RuntimeConfig,
}

impl<E> Clone for EnvironmentProbe<E> {
    fn clone(&self) -> Self {
        Self {
            executor: Arc::clone(&self.executor),
            name: self.name.clone(),
            runtime: self.runtime.clone(),
        }
    }
}

impl<E: CommandExecutor> EnvironmentProbe<E> {
    pub fn new(executor: Arc<E>, environment: &EnvironmentConfig, runtime: &RuntimeConfig) -> Self {
        Self {
            executor,
            name: environment.name.clone(),
            runtime: runtime.clone(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the runtime reports the environment as running.
    ///
    /// A failed or non-zero status query counts as not running.
    pub async fn is_running(&self) -> bool {
        let argv = expand(&self.runtime.status, &self.name);
        match self.executor.run(&argv[0], &argv[1..]).await {
            Ok(output) if output.success() => output.stdout.contains(&self.runtime.running_marker),
            Ok(output) => {
                tracing::warn!(
                    environment = %self.name,
                    exit_code = ?output.exit_code,
                    stderr = %output.stderr.trim(),
                    "environment status query failed"
                );
                false
            }
            Err(e) => {
                tracing::error!(environment = %self.name, error = %e, "environment status query failed");
                false
            }
        }
    }

    /// Run a shell script inside the environment and capture its output.
    pub async fn exec(&self, script: &str) -> Result<CommandOutput, ExecError> {
        let argv = self.exec_argv(&["bash".to_string(), "-c".to_string(), script.to_string()]);
        self.executor.run(&argv[0], &argv[1..]).await
    }

    /// Start a command inside the environment without waiting for it.
    pub fn spawn(&self, command: &[String]) -> Result<u32, ExecError> {
        let argv = self.exec_argv(command);
        self.executor.spawn_detached(&argv[0], &argv[1..])
    }

    /// Forcefully stop the environment.
    ///
    /// Stopping an environment that is already down is not an error; failures
    /// are logged and the caller carries on.
    pub async fn stop(&self) {
        tracing::info!(environment = %self.name, "stopping environment");
        let argv = expand(&self.runtime.stop, &self.name);
        match self.executor.run(&argv[0], &argv[1..]).await {
            Ok(output) if output.success() => {
                tracing::info!(environment = %self.name, "environment stopped");
            }
            Ok(output) => {
                tracing::warn!(
                    environment = %self.name,
                    exit_code = ?output.exit_code,
                    stderr = %output.stderr.trim(),
                    "stop command returned non-zero, environment may already be stopped"
                );
            }
            Err(e) => {
                tracing::error!(environment = %self.name, error = %e, "failed to run stop command");
            }
        }
    }

    fn exec_argv(&self, command: &[String]) -> Vec<String> {
        let mut argv = expand(&self.runtime.exec, &self.name);
        argv.extend(command.iter().cloned());
        argv
    }
}

/// Replace `{name}` placeholders in an argv template.
fn expand(template: &[String], name: &str) -> Vec<String> {
    template.iter().map(|arg| arg.replace("{name}", name)).collect()
}

/// Single-quote a value for safe interpolation into a shell script.
pub(crate) fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::fake::{exit, ok, FakeExecutor, Response};

    fn probe_with(fake: FakeExecutor) -> (Arc<FakeExecutor>, EnvironmentProbe<FakeExecutor>) {
        let fake = Arc::new(fake);
        let probe = EnvironmentProbe::new(
            Arc::clone(&fake),
            &EnvironmentConfig::default(),
            &RuntimeConfig::default(),
        );
        (fake, probe)
    }

    #[test]
    fn test_expand_replaces_name_placeholder() {
        let template = vec!["lxc".to_string(), "info".to_string(), "{name}".to_string()];
        assert_eq!(expand(&template, "box"), vec!["lxc", "info", "box"]);
    }

    #[test]
    fn test_shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("plain"), "'plain'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[tokio::test]
    async fn test_is_running_when_marker_present() {
        let (_, probe) = probe_with(FakeExecutor::new().on(
            "lxc info ai-agent",
            ok("Name: ai-agent\nStatus: RUNNING\nType: container\n"),
        ));
        assert!(probe.is_running().await);
    }

    #[tokio::test]
    async fn test_not_running_when_marker_absent() {
        let (_, probe) = probe_with(FakeExecutor::new().on("lxc info", ok("Status: STOPPED\n")));
        assert!(!probe.is_running().await);
    }

    #[tokio::test]
    async fn test_not_running_on_failed_query() {
        let (_, probe) = probe_with(FakeExecutor::new().on("lxc info", exit(1)));
        assert!(!probe.is_running().await);

        let (_, probe) = probe_with(FakeExecutor::new().on("lxc info", Response::Fail));
        assert!(!probe.is_running().await);
    }

    #[tokio::test]
    async fn test_exec_wraps_script_in_bash() {
        let (fake, probe) = probe_with(FakeExecutor::new().on("lxc exec ai-agent -- bash -c", ok("hi")));
        let output = probe.exec("echo hi").await.unwrap();
        assert_eq!(output.stdout, "hi");
        assert_eq!(fake.calls(), vec!["lxc exec ai-agent -- bash -c echo hi"]);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_on_failure() {
        let (fake, probe) = probe_with(FakeExecutor::new().on("lxc stop", exit(1)));
        probe.stop().await;
        probe.stop().await;
        assert_eq!(fake.calls_matching("lxc stop ai-agent -f"), 2);
    }

    #[tokio::test]
    async fn test_spawn_uses_exec_prefix() {
        let (fake, probe) = probe_with(FakeExecutor::new());
        let pid = probe.spawn(&["true".to_string()]).unwrap();
        assert_eq!(pid, 4242);
        assert_eq!(
            fake.spawned(),
            vec![vec!["lxc", "exec", "ai-agent", "--", "true"]]
        );
    }
}
