mod activity;
mod config;
mod environment;
mod executor;
mod json_file;
mod launcher;
mod quota;
mod signals;
mod status;
mod summary;
mod supervisor;

use clap::Parser;
use config::WatcherConfig;
use executor::ProcessExecutor;
use signals::ShutdownSignal;
use status::StatusFile;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use summary::SummaryFile;
use supervisor::Supervisor;

/// Supervise an AI coding agent inside a sandboxed environment: start it,
/// watch it, and stop the environment when the daily window closes, the
/// quota runs low, or the agent goes quiet.
#[derive(Parser, Debug)]
#[command(name = "warden", version, about)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "warden.toml")]
    config: PathBuf,

    /// Environment (container) name (overrides config)
    #[arg(short, long)]
    environment: Option<String>,

    /// Hour (0-23) at which the stop window opens (overrides config)
    #[arg(long)]
    stop_hour: Option<u32>,

    /// Hour (0-23) at which the stop window closes; a window whose stop hour
    /// is later wraps past midnight (overrides config)
    #[arg(long)]
    resume_hour: Option<u32>,

    /// Minimum remaining quota before stopping (overrides config)
    #[arg(long)]
    min_quota: Option<u64>,

    /// Poll interval in seconds (overrides config)
    #[arg(long)]
    interval: Option<u64>,

    /// Inactive ticks before the environment is stopped (overrides config)
    #[arg(long)]
    max_inactive: Option<u32>,

    /// Prompt file path (overrides config)
    #[arg(short, long)]
    prompt: Option<PathBuf>,

    /// Validate config and print resolved settings, don't run
    #[arg(long)]
    dry_run: bool,

    /// Extra logging (probe commands, tick decisions)
    #[arg(short, long)]
    verbose: bool,

    /// Only warnings and errors
    #[arg(short, long)]
    quiet: bool,

    /// Print the current watcher status and last summary, then exit
    #[arg(long)]
    status: bool,
}

/// Merge CLI overrides into the loaded config.
fn apply_overrides(config: &mut WatcherConfig, cli: &Cli) {
    if let Some(ref name) = cli.environment {
        config.environment.name = name.clone();
    }
    if let Some(hour) = cli.stop_hour {
        config.schedule.stop_hour = hour;
    }
    if let Some(hour) = cli.resume_hour {
        config.schedule.resume_hour = hour;
    }
    if let Some(quota) = cli.min_quota {
        config.quota.min_remaining = quota;
    }
    if let Some(secs) = cli.interval {
        config.watch.poll_interval_secs = secs;
    }
    if let Some(ticks) = cli.max_inactive {
        config.watch.max_inactive_ticks = ticks;
    }
    if let Some(ref prompt) = cli.prompt {
        config.agent.prompt_file = prompt.clone();
    }
}

/// Console output plus a plaintext append-only log file.
fn init_logging(log_file: &Path, verbose: bool, quiet: bool) -> std::io::Result<()> {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{fmt, EnvFilter};

    let default_level = if verbose {
        "debug"
    } else if quiet {
        "warn"
    } else {
        "info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if let Some(parent) = log_file.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(
            fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(Mutex::new(file)),
        )
        .init();
    Ok(())
}

fn print_status(config: &WatcherConfig) -> ExitCode {
    match StatusFile::new(config.output.status_file.clone()).read() {
        Ok(Some(status)) => {
            println!("environment:       {}", status.environment);
            println!("state:             {:?}", status.state);
            println!("pid:               {}", status.pid);
            println!("tick:              {}", status.tick);
            println!("session active:    {}", status.session_active);
            println!("inactive ticks:    {}", status.inactivity_count);
            println!("sessions launched: {}", status.sessions_launched);
            match status.last_quota {
                Some(q) => println!("last quota:        {q}"),
                None => println!("last quota:        unknown"),
            }
            println!("started at:        {}", status.started_at.to_rfc3339());
            println!("last update:       {}", status.last_update.to_rfc3339());
        }
        Ok(None) => println!("No watcher status found at {}", config.output.status_file.display()),
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    }

    match SummaryFile::new(config.output.summary_file.clone()).read() {
        Ok(Some(summary)) => {
            println!();
            println!("last run ended:    {} ({})", summary.end_time.to_rfc3339(), summary.reason);
            match summary.last_activity_time {
                Some(t) => println!("last activity:     {}", t.to_rfc3339()),
                None => println!("last activity:     unknown"),
            }
            if let Some(detail) = summary.detail {
                println!("detail:            {detail}");
            }
        }
        Ok(None) => {}
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    }
    ExitCode::SUCCESS
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match WatcherConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };
    apply_overrides(&mut config, &cli);
    if let Err(e) = config.validate() {
        eprintln!("error: {e}");
        return ExitCode::FAILURE;
    }

    if cli.status {
        return print_status(&config);
    }

    if cli.dry_run {
        match toml::to_string_pretty(&config) {
            Ok(text) => {
                println!("# resolved from {}", cli.config.display());
                print!("{text}");
                return ExitCode::SUCCESS;
            }
            Err(e) => {
                eprintln!("error: failed to render config: {e}");
                return ExitCode::FAILURE;
            }
        }
    }

    if let Err(e) = init_logging(&config.output.log_file, cli.verbose, cli.quiet) {
        eprintln!(
            "error: failed to open log file {}: {e}",
            config.output.log_file.display()
        );
        return ExitCode::FAILURE;
    }
    tracing::debug!(?cli, "parsed CLI arguments");

    let signal = match ShutdownSignal::install() {
        Ok(signal) => signal,
        Err(e) => {
            tracing::error!(error = %e, "failed to install signal handlers");
            return ExitCode::FAILURE;
        }
    };

    let supervisor = Supervisor::new(config, Arc::new(ProcessExecutor), signal);
    match supervisor::supervise(supervisor).await {
        Ok(summary) => {
            tracing::info!(reason = %summary.reason, "watcher process terminated");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to record session summary");
            ExitCode::FAILURE
        }
    }
}
