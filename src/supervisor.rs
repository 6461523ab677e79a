/// Supervisor loop: poll the environment on a fixed interval and turn each
/// round of observations into one transition (keep running, start a
/// session, stop the environment, or nothing this tick).
///
/// Checks run in a fixed order and the first terminal one wins:
/// environment down, stop window, quota floor, then agent activity.
/// Every way out of the loop (including operator interrupts and panics)
/// goes through [`Terminator::terminate`], which writes exactly one summary.
use crate::activity::ActivityMonitor;
use crate::config::WatcherConfig;
use crate::environment::EnvironmentProbe;
use crate::executor::CommandExecutor;
use crate::launcher::SessionLauncher;
use crate::quota::QuotaMonitor;
use crate::signals::ShutdownSignal;
use crate::status::{StatusTracker, WatcherState};
use crate::summary::{SessionSummary, SummaryError, SummaryFile, TerminationReason};
use chrono::{DateTime, Local, Timelike};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Loop bookkeeping, owned and mutated only by the supervisor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SupervisorState {
    /// Whether an agent session is believed to be running.
    pub session_active: bool,
    /// Consecutive inactive ticks since the session was last seen.
    pub inactivity_count: u32,
    /// Consecutive active ticks, for periodic activity logging.
    pub active_streak: u32,
    pub ticks: u64,
    pub sessions_launched: u32,
}

/// What the activity observation means for this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityStep {
    Active { streak: u32 },
    /// No session has been seen or launched yet.
    Launch,
    Idle { inactive: u32 },
    /// The inactivity ceiling was reached.
    Exhausted { inactive: u32 },
}

impl SupervisorState {
    /// Fold one activity observation into the state.
    ///
    /// The inactivity counter only moves while a session is believed active
    /// and is reset by any observed activity.
    pub fn observe(&mut self, active: bool, max_inactive: u32) -> ActivityStep {
        if active {
            self.session_active = true;
            self.inactivity_count = 0;
            self.active_streak += 1;
            return ActivityStep::Active {
                streak: self.active_streak,
            };
        }

        self.active_streak = 0;
        if !self.session_active {
            return ActivityStep::Launch;
        }

        self.inactivity_count += 1;
        if self.inactivity_count >= max_inactive {
            ActivityStep::Exhausted {
                inactive: self.inactivity_count,
            }
        } else {
            ActivityStep::Idle {
                inactive: self.inactivity_count,
            }
        }
    }

    /// A fresh launch counts as a session, not as inactivity.
    pub fn mark_launched(&mut self) {
        self.session_active = true;
        self.sessions_launched += 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Continue,
    Terminate(TerminationReason),
}

/// How long the termination path waits on the environment for the last
/// commit time before recording it as unknown.
const LAST_ACTIVITY_TIMEOUT: Duration = Duration::from_secs(15);

/// The single termination path: best-effort last activity, stop when the
/// reason calls for it, then write the summary.
pub struct Terminator<E> {
    environment: EnvironmentProbe<E>,
    activity: ActivityMonitor<E>,
    summary_path: PathBuf,
    started_at: DateTime<Local>,
}

impl<E> Clone for Terminator<E> {
    fn clone(&self) -> Self {
        Self {
            environment: self.environment.clone(),
            activity: self.activity.clone(),
            summary_path: self.summary_path.clone(),
            started_at: self.started_at,
        }
    }
}

impl<E: CommandExecutor> Terminator<E> {
    pub async fn terminate(
        &self,
        reason: TerminationReason,
        detail: Option<String>,
    ) -> Result<SessionSummary, SummaryError> {
        // Query before stopping; a stopped environment cannot answer. A hung
        // environment must not hold up the stop or the summary.
        let last_activity_time =
            match tokio::time::timeout(LAST_ACTIVITY_TIMEOUT, self.activity.last_activity_time())
                .await
            {
                Ok(last) => last,
                Err(_) => {
                    tracing::warn!(
                        timeout_secs = LAST_ACTIVITY_TIMEOUT.as_secs(),
                        "last activity query timed out, recording it as unknown"
                    );
                    None
                }
            };

        if reason.requires_stop() {
            self.environment.stop().await;
        }

        let summary = SessionSummary {
            end_time: Local::now(),
            reason,
            last_activity_time,
            started_at: self.started_at,
            detail,
        };
        let file = SummaryFile::new(self.summary_path.clone());
        file.write(&summary)?;
        tracing::info!(
            reason = %reason,
            path = %file.path().display(),
            "session summary saved"
        );
        Ok(summary)
    }
}

pub struct Supervisor<E> {
    config: WatcherConfig,
    environment: EnvironmentProbe<E>,
    quota: QuotaMonitor<E>,
    activity: ActivityMonitor<E>,
    launcher: SessionLauncher<E>,
    terminator: Terminator<E>,
    status: StatusTracker,
    signal: ShutdownSignal,
    state: SupervisorState,
    clock: fn() -> DateTime<Local>,
}

impl<E: CommandExecutor> Supervisor<E> {
    pub fn new(config: WatcherConfig, executor: Arc<E>, signal: ShutdownSignal) -> Self {
        let started_at = Local::now();
        let environment =
            EnvironmentProbe::new(Arc::clone(&executor), &config.environment, &config.runtime);
        let activity =
            ActivityMonitor::new(environment.clone(), &config.environment, &config.agent);
        let launcher =
            SessionLauncher::new(environment.clone(), &config.environment, &config.agent);
        let quota = QuotaMonitor::new(executor, &config.quota);
        let terminator = Terminator {
            environment: environment.clone(),
            activity: activity.clone(),
            summary_path: config.output.summary_file.clone(),
            started_at,
        };
        let status = StatusTracker::new(
            config.output.status_file.clone(),
            &config.environment.name,
            started_at,
        );

        Self {
            config,
            environment,
            quota,
            activity,
            launcher,
            terminator,
            status,
            signal,
            state: SupervisorState::default(),
            clock: Local::now,
        }
    }

    /// Replace the wall clock used for the stop window.
    pub fn with_clock(mut self, clock: fn() -> DateTime<Local>) -> Self {
        self.clock = clock;
        self
    }

    #[cfg(test)]
    pub fn state(&self) -> &SupervisorState {
        &self.state
    }

    /// Run until a terminal condition or an interrupt, then record the summary.
    pub async fn run(mut self) -> Result<SessionSummary, SummaryError> {
        tracing::info!(
            environment = %self.environment.name(),
            poll_interval_secs = self.config.watch.poll_interval_secs,
            stop_hour = self.config.schedule.stop_hour,
            resume_hour = self.config.schedule.resume_hour,
            min_quota = self.config.quota.min_remaining,
            max_inactive_ticks = self.config.watch.max_inactive_ticks,
            "warden started"
        );
        let schedule = &self.config.schedule;
        if schedule.stop_hour > schedule.resume_hour {
            tracing::warn!(
                stop_hour = schedule.stop_hour,
                resume_hour = schedule.resume_hour,
                "stop window wraps past midnight"
            );
        }
        self.publish(WatcherState::WaitingForEnvironment);

        let reason = self.watch().await;

        tracing::info!(reason = %reason, ticks = self.state.ticks, "terminating");
        self.publish(WatcherState::ShuttingDown);
        let result = self.terminator.terminate(reason, None).await;
        self.publish(WatcherState::Terminated);
        result
    }

    async fn watch(&mut self) -> TerminationReason {
        let signal = self.signal.clone();
        let warmup = Duration::from_secs(self.config.watch.warmup_secs);
        if !self.pause(warmup).await {
            return TerminationReason::ManualInterrupt;
        }

        let interval = Duration::from_secs(self.config.watch.poll_interval_secs);
        loop {
            let outcome = tokio::select! {
                biased;
                _ = signal.requested() => TickOutcome::Terminate(TerminationReason::ManualInterrupt),
                outcome = self.tick() => outcome,
            };
            if let TickOutcome::Terminate(reason) = outcome {
                return reason;
            }
            if !self.pause(interval).await {
                return TerminationReason::ManualInterrupt;
            }
        }
    }

    /// Sleep unless a stop is requested first. Returns false when interrupted.
    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.signal.requested() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }

    /// One poll: observe, decide, and act.
    pub async fn tick(&mut self) -> TickOutcome {
        self.state.ticks += 1;
        self.status.set_tick(self.state.ticks);
        tracing::debug!(tick = self.state.ticks, "polling");

        if self.signal.check_stop_file(&self.config.shutdown.stop_file) {
            return TickOutcome::Terminate(TerminationReason::ManualInterrupt);
        }

        if !self.environment.is_running().await {
            tracing::info!(environment = %self.environment.name(), "environment is not running");
            return TickOutcome::Terminate(TerminationReason::ContainerStopped);
        }

        let hour = (self.clock)().hour();
        if self.config.schedule.in_stop_window(hour) {
            tracing::info!(
                hour,
                stop_hour = self.config.schedule.stop_hour,
                resume_hour = self.config.schedule.resume_hour,
                "time limit reached"
            );
            return TickOutcome::Terminate(TerminationReason::TimeLimit);
        }

        let quota = self.quota.query().await;
        self.status.set_last_quota(quota.value());
        let floor = self.config.quota.min_remaining;
        if quota.is_below(floor) {
            tracing::warn!(quota = ?quota.value(), floor, "API quota too low");
            return TickOutcome::Terminate(TerminationReason::ApiQuotaExhausted);
        }

        let active = self.activity.is_session_active().await;
        let max_inactive = self.config.watch.max_inactive_ticks;
        match self.state.observe(active, max_inactive) {
            ActivityStep::Active { streak } => {
                let every = self.config.watch.activity_log_every;
                if every > 0 && streak % every == 0 {
                    self.log_last_activity().await;
                }
            }
            ActivityStep::Launch => {
                tracing::info!("agent session not active, starting");
                self.publish(WatcherState::Launching);
                match self.launcher.start_session() {
                    Ok(_) => self.state.mark_launched(),
                    Err(e) => {
                        tracing::error!(error = %e, "failed to start agent session, retrying next tick");
                    }
                }
            }
            ActivityStep::Idle { inactive } => {
                tracing::info!(inactive, max_inactive, "agent session has ended, waiting for activity");
            }
            ActivityStep::Exhausted { inactive } => {
                tracing::warn!(inactive, "no agent activity within the inactivity limit");
                return TickOutcome::Terminate(TerminationReason::Inactivity);
            }
        }

        self.publish(WatcherState::Polling);
        TickOutcome::Continue
    }

    async fn log_last_activity(&self) {
        match self.activity.last_activity_time().await {
            Some(last) => {
                let age = (self.clock)().signed_duration_since(last);
                tracing::info!(
                    last_activity = %last.to_rfc3339(),
                    minutes_ago = age.num_minutes(),
                    "last git activity"
                );
            }
            None => tracing::debug!("no git activity recorded yet"),
        }
    }

    fn publish(&mut self, state: WatcherState) {
        self.status.set_session(
            self.state.session_active,
            self.state.inactivity_count,
            self.state.sessions_launched,
        );
        self.status.update(state);
    }
}

/// Run the supervisor in its own task so a panic still ends in a defensive
/// stop and a summary with reason `error`.
pub async fn supervise<E: CommandExecutor>(
    supervisor: Supervisor<E>,
) -> Result<SessionSummary, SummaryError> {
    let terminator = supervisor.terminator.clone();
    match tokio::spawn(supervisor.run()).await {
        Ok(result) => result,
        Err(e) => {
            let detail = join_error_detail(e);
            tracing::error!(error = %detail, "unexpected error in supervisor loop");
            terminator
                .terminate(TerminationReason::Error, Some(detail))
                .await
        }
    }
}

fn join_error_detail(err: tokio::task::JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::fake::{exit, ok, FakeExecutor, Response};
    use crate::status::StatusFile;
    use chrono::TimeZone;
    use std::path::Path;
    use tempfile::{tempdir, TempDir};

    fn at(hour: u32, min: u32) -> DateTime<Local> {
        Local
            .with_ymd_and_hms(2026, 6, 15, hour, min, 0)
            .earliest()
            .unwrap()
    }

    fn at_night() -> DateTime<Local> {
        at(1, 0)
    }

    fn at_four() -> DateTime<Local> {
        at(4, 0)
    }

    fn before_noon() -> DateTime<Local> {
        at(11, 59)
    }

    fn config_in(dir: &Path) -> WatcherConfig {
        let mut config = WatcherConfig::default();
        config.output.summary_file = dir.join("summary.json");
        config.output.status_file = dir.join("warden.status");
        config.output.log_file = dir.join("controller.log");
        config.shutdown.stop_file = dir.join("STOP");
        config.agent.prompt_file = dir.join("prompt.txt");
        config
    }

    /// A healthy environment with plenty of quota; `ps` answers are scripted.
    fn healthy(ps: Vec<Response>) -> FakeExecutor {
        FakeExecutor::new()
            .on("lxc info", ok("Status: RUNNING\n"))
            .on("usage-query", ok("50000 tokens remaining"))
            .on("git log", ok("1700000000\n"))
            .script("ps aux", ps)
    }

    struct Fixture {
        dir: TempDir,
        fake: Arc<FakeExecutor>,
        signal: ShutdownSignal,
        supervisor: Supervisor<FakeExecutor>,
    }

    fn fixture(fake: FakeExecutor, tweak: impl FnOnce(&mut WatcherConfig)) -> Fixture {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("prompt.txt"), "keep building").unwrap();
        let mut config = config_in(dir.path());
        tweak(&mut config);
        let fake = Arc::new(fake);
        let signal = ShutdownSignal::new();
        let supervisor = Supervisor::new(config, Arc::clone(&fake), signal.clone()).with_clock(at_night);
        Fixture {
            dir,
            fake,
            signal,
            supervisor,
        }
    }

    fn read_summary(dir: &Path) -> SessionSummary {
        SummaryFile::new(dir.join("summary.json")).read().unwrap().unwrap()
    }

    #[test]
    fn test_inactivity_invariants_over_synthetic_sequence() {
        let pattern = [
            false, true, false, false, true, true, false, false, false, true, false,
        ];
        let mut state = SupervisorState::default();
        let mut launched = false;
        for active in pattern {
            let before = state.inactivity_count;
            let was_active = state.session_active;
            let step = state.observe(active, 100);
            if active {
                assert_eq!(state.inactivity_count, 0);
            } else if !was_active {
                assert_eq!(step, ActivityStep::Launch);
                assert_eq!(state.inactivity_count, before);
            } else {
                assert_eq!(state.inactivity_count, before + 1);
            }
            if step == ActivityStep::Launch && !launched {
                launched = true;
                state.mark_launched();
            }
        }
        assert_eq!(state.inactivity_count, 1);
    }

    #[test]
    fn test_inactivity_never_counts_without_session() {
        let mut state = SupervisorState::default();
        for _ in 0..50 {
            assert_eq!(state.observe(false, 3), ActivityStep::Launch);
            assert_eq!(state.inactivity_count, 0);
            assert!(!state.session_active);
        }
    }

    #[test]
    fn test_observe_reaches_ceiling() {
        let mut state = SupervisorState::default();
        state.mark_launched();
        assert_eq!(state.observe(false, 3), ActivityStep::Idle { inactive: 1 });
        assert_eq!(state.observe(false, 3), ActivityStep::Idle { inactive: 2 });
        assert_eq!(state.observe(false, 3), ActivityStep::Exhausted { inactive: 3 });
    }

    #[test]
    fn test_active_streak_counts_consecutive_active_ticks() {
        let mut state = SupervisorState::default();
        assert_eq!(state.observe(true, 3), ActivityStep::Active { streak: 1 });
        assert_eq!(state.observe(true, 3), ActivityStep::Active { streak: 2 });
        state.observe(false, 3);
        assert_eq!(state.observe(true, 3), ActivityStep::Active { streak: 1 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_environment_down_at_first_tick_skips_stop() {
        let fake = FakeExecutor::new().on("lxc info", ok("Status: STOPPED\n"));
        let Fixture { dir, fake, supervisor, .. } = fixture(fake, |_| {});

        let summary = supervisor.run().await.unwrap();
        assert_eq!(summary.reason, TerminationReason::ContainerStopped);
        assert_eq!(fake.calls_matching("lxc stop"), 0);
        assert_eq!(fake.calls_matching("usage-query"), 0);
        assert_eq!(read_summary(dir.path()).reason, TerminationReason::ContainerStopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_window_terminates_regardless_of_other_signals() {
        for clock in [at_four as fn() -> DateTime<Local>, before_noon] {
            let fake = FakeExecutor::new()
                .on("lxc info", ok("Status: RUNNING\n"))
                .on("usage-query", ok("5 remaining"))
                .on("ps aux", ok("claude"));
            let Fixture { dir, fake, supervisor, .. } = fixture(fake, |_| {});

            let summary = supervisor.with_clock(clock).run().await.unwrap();
            assert_eq!(summary.reason, TerminationReason::TimeLimit);
            assert_eq!(fake.calls_matching("lxc stop ai-agent -f"), 1);
            assert_eq!(fake.calls_matching("usage-query"), 0);
            assert_eq!(read_summary(dir.path()).reason, TerminationReason::TimeLimit);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_quota_below_floor_stops_environment() {
        let fake = FakeExecutor::new()
            .on("lxc info", ok("Status: RUNNING\n"))
            .on("usage-query", ok("999 remaining"))
            .on("ps aux", ok("claude"));
        let Fixture { dir, fake, supervisor, .. } = fixture(fake, |_| {});

        let summary = supervisor.run().await.unwrap();
        assert_eq!(summary.reason, TerminationReason::ApiQuotaExhausted);
        assert_eq!(fake.calls_matching("lxc stop"), 1);
        assert_eq!(fake.calls_matching("ps aux"), 0);
        assert_eq!(read_summary(dir.path()).reason, TerminationReason::ApiQuotaExhausted);
    }

    #[tokio::test]
    async fn test_unknown_quota_never_terminates() {
        for floor in [0, 1000, u64::MAX] {
            let fake = FakeExecutor::new()
                .on("lxc info", ok("Status: RUNNING\n"))
                .script("usage-query", vec![ok("service unavailable"), exit(1), Response::Fail])
                .on("ps aux", ok("claude"));
            let mut fx = fixture(fake, |c| c.quota.min_remaining = floor);

            for _ in 0..5 {
                assert_eq!(fx.supervisor.tick().await, TickOutcome::Continue);
            }
            assert_eq!(fx.fake.calls_matching("lxc stop"), 0);
        }
    }

    #[tokio::test]
    async fn test_inactivity_ceiling_terminates_on_exact_tick() {
        let Fixture { dir: _dir, fake, mut supervisor, .. } = fixture(healthy(vec![exit(1)]), |_| {});

        // First tick launches the session.
        assert_eq!(supervisor.tick().await, TickOutcome::Continue);
        assert!(supervisor.state().session_active);
        assert_eq!(supervisor.state().inactivity_count, 0);
        assert_eq!(fake.spawned().len(), 1);

        for n in 1..30 {
            assert_eq!(supervisor.tick().await, TickOutcome::Continue, "inactive tick {n}");
            assert_eq!(supervisor.state().inactivity_count, n);
        }
        assert_eq!(
            supervisor.tick().await,
            TickOutcome::Terminate(TerminationReason::Inactivity)
        );
        assert_eq!(supervisor.state().inactivity_count, 30);
        assert_eq!(fake.spawned().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inactivity_run_stops_before_summary() {
        let Fixture { dir, fake, supervisor, .. } =
            fixture(healthy(vec![exit(1)]), |c| c.watch.max_inactive_ticks = 3);

        let summary = supervisor.run().await.unwrap();
        assert_eq!(summary.reason, TerminationReason::Inactivity);
        assert_eq!(summary.last_activity_time.unwrap().timestamp(), 1_700_000_000);

        let calls = fake.calls();
        let stop_at = calls.iter().position(|c| c.contains("lxc stop")).unwrap();
        let git_at = calls.iter().rposition(|c| c.contains("git log")).unwrap();
        assert!(git_at < stop_at, "last activity is read before the stop");
        assert_eq!(calls.last().unwrap(), "lxc stop ai-agent -f");
        assert_eq!(read_summary(dir.path()).reason, TerminationReason::Inactivity);
    }

    #[tokio::test]
    async fn test_observed_activity_resets_inactivity() {
        let ps = vec![exit(1), exit(1), exit(1), ok("claude"), exit(1)];
        let Fixture { dir: _dir, mut supervisor, .. } = fixture(healthy(ps), |_| {});

        let mut counts = Vec::new();
        for _ in 0..5 {
            assert_eq!(supervisor.tick().await, TickOutcome::Continue);
            counts.push(supervisor.state().inactivity_count);
        }
        assert_eq!(counts, vec![0, 1, 2, 0, 1]);
        assert_eq!(supervisor.state().sessions_launched, 1);
    }

    #[tokio::test]
    async fn test_missing_prompt_retries_next_tick() {
        let Fixture { dir, fake, mut supervisor, .. } = fixture(healthy(vec![exit(1)]), |_| {});
        std::fs::remove_file(dir.path().join("prompt.txt")).unwrap();

        for _ in 0..3 {
            assert_eq!(supervisor.tick().await, TickOutcome::Continue);
            assert!(!supervisor.state().session_active);
            assert_eq!(supervisor.state().inactivity_count, 0);
        }
        assert!(fake.spawned().is_empty());

        std::fs::write(dir.path().join("prompt.txt"), "now with instructions").unwrap();
        assert_eq!(supervisor.tick().await, TickOutcome::Continue);
        assert!(supervisor.state().session_active);
        assert_eq!(fake.spawned().len(), 1);
    }

    #[tokio::test]
    async fn test_active_session_is_not_relaunched() {
        let Fixture { dir: _dir, fake, mut supervisor, .. } = fixture(healthy(vec![ok("claude")]), |_| {});
        for _ in 0..4 {
            assert_eq!(supervisor.tick().await, TickOutcome::Continue);
        }
        assert!(fake.spawned().is_empty());
        assert!(supervisor.state().session_active);
    }

    #[tokio::test]
    async fn test_periodic_activity_log_queries_git() {
        let Fixture { dir: _dir, fake, mut supervisor, .. } =
            fixture(healthy(vec![ok("claude")]), |c| c.watch.activity_log_every = 2);
        for _ in 0..4 {
            supervisor.tick().await;
        }
        assert_eq!(fake.calls_matching("git log"), 2);
    }

    #[tokio::test]
    async fn test_periodic_activity_log_disabled() {
        let Fixture { dir: _dir, fake, mut supervisor, .. } =
            fixture(healthy(vec![ok("claude")]), |c| c.watch.activity_log_every = 0);
        for _ in 0..20 {
            supervisor.tick().await;
        }
        assert_eq!(fake.calls_matching("git log"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_before_start_stops_and_records() {
        let Fixture { dir, fake, signal, supervisor } = fixture(healthy(vec![ok("claude")]), |_| {});
        signal.request("test");

        let summary = supervisor.run().await.unwrap();
        assert_eq!(summary.reason, TerminationReason::ManualInterrupt);
        assert_eq!(fake.calls_matching("lxc info"), 0);
        assert_eq!(fake.calls_matching("lxc stop"), 1);
        assert_eq!(read_summary(dir.path()).reason, TerminationReason::ManualInterrupt);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_during_poll_sleep() {
        let Fixture { dir, fake, signal, supervisor } = fixture(healthy(vec![ok("claude")]), |_| {});

        let run = tokio::spawn(supervisor.run());
        // Warm-up 10s, ticks at t=10 and t=70, interrupted while sleeping.
        tokio::time::sleep(Duration::from_secs(90)).await;
        signal.request("test");

        let summary = run.await.unwrap().unwrap();
        assert_eq!(summary.reason, TerminationReason::ManualInterrupt);
        assert_eq!(fake.calls_matching("lxc info"), 2);
        assert_eq!(fake.calls_matching("lxc stop"), 1);

        let status = StatusFile::new(dir.path().join("warden.status"))
            .read()
            .unwrap()
            .unwrap();
        assert_eq!(status.state, WatcherState::Terminated);
        assert_eq!(status.tick, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_mid_tick_abandons_pending_query() {
        let fake = FakeExecutor::new()
            .on("lxc info", ok("Status: RUNNING\n"))
            .on("usage-query", Response::Hang)
            .on("git log", ok("1700000000\n"));
        let Fixture { dir, fake, signal, supervisor } = fixture(fake, |_| {});

        let run = tokio::spawn(supervisor.run());
        // Warm-up ends at t=10; the first tick then waits on the quota query.
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(fake.calls_matching("usage-query"), 1);
        signal.request("test");

        let summary = run.await.unwrap().unwrap();
        assert_eq!(summary.reason, TerminationReason::ManualInterrupt);
        assert_eq!(summary.last_activity_time.unwrap().timestamp(), 1_700_000_000);
        assert_eq!(fake.calls_matching("lxc stop ai-agent -f"), 1);
        assert_eq!(fake.calls_matching("ps aux"), 0);
        assert_eq!(read_summary(dir.path()).reason, TerminationReason::ManualInterrupt);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_environment_still_stops_and_records() {
        let fake = FakeExecutor::new()
            .on("lxc info", ok("Status: RUNNING\n"))
            .on("usage-query", Response::Hang)
            .on("git log", Response::Hang);
        let Fixture { dir, fake, signal, supervisor } = fixture(fake, |_| {});

        let run = tokio::spawn(supervisor.run());
        tokio::time::sleep(Duration::from_secs(30)).await;
        signal.request("test");

        let summary = tokio::time::timeout(Duration::from_secs(3600), run)
            .await
            .expect("termination path must not wait on a hung environment")
            .unwrap()
            .unwrap();
        assert_eq!(summary.reason, TerminationReason::ManualInterrupt);
        assert!(summary.last_activity_time.is_none());
        assert_eq!(fake.calls_matching("lxc stop ai-agent -f"), 1);

        let recorded = read_summary(dir.path());
        assert_eq!(recorded.reason, TerminationReason::ManualInterrupt);
        assert!(recorded.last_activity_time.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_file_is_manual_interrupt() {
        let Fixture { dir, fake, supervisor, .. } = fixture(healthy(vec![ok("claude")]), |_| {});
        std::fs::write(dir.path().join("STOP"), "").unwrap();

        let summary = supervisor.run().await.unwrap();
        assert_eq!(summary.reason, TerminationReason::ManualInterrupt);
        assert_eq!(fake.calls_matching("lxc stop"), 1);
        assert!(!dir.path().join("STOP").exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_panic_routes_through_error_path() {
        let fake = FakeExecutor::new()
            .on("lxc info", ok("Status: RUNNING\n"))
            .on("usage-query", Response::Panic)
            .on("git log", ok(""));
        let Fixture { dir, fake, supervisor, .. } = fixture(fake, |_| {});

        let summary = supervise(supervisor).await.unwrap();
        assert_eq!(summary.reason, TerminationReason::Error);
        assert!(summary.detail.unwrap().contains("scripted panic"));
        assert!(summary.last_activity_time.is_none());
        assert_eq!(fake.calls_matching("lxc stop"), 1);
        assert_eq!(read_summary(dir.path()).reason, TerminationReason::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn test_supervise_passes_through_normal_termination() {
        let fake = FakeExecutor::new().on("lxc info", ok("Status: STOPPED\n"));
        let Fixture { dir: _dir, fake, supervisor, .. } = fixture(fake, |_| {});

        let summary = supervise(supervisor).await.unwrap();
        assert_eq!(summary.reason, TerminationReason::ContainerStopped);
        assert_eq!(fake.calls_matching("lxc stop"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unwritable_summary_is_reported() {
        let fake = FakeExecutor::new().on("lxc info", ok("Status: STOPPED\n"));
        let Fixture { dir: _dir, supervisor, .. } = fixture(fake, |c| {
            c.output.summary_file = PathBuf::from("/nonexistent/dir/summary.json");
        });

        assert!(supervisor.run().await.is_err());
    }
}
