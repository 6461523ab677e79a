/// Quota monitor: runs the external usage query and extracts the remaining
/// quota, e.g. `123456 tokens remaining`.
use crate::config::QuotaConfig;
use crate::executor::CommandExecutor;
use regex::Regex;
use std::sync::{Arc, LazyLock};

static REMAINING_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+).*remaining").unwrap());

/// A single point-in-time quota observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaReading {
    Known(u64),
    Unknown,
}

impl QuotaReading {
    pub fn value(&self) -> Option<u64> {
        match self {
            QuotaReading::Known(v) => Some(*v),
            QuotaReading::Unknown => None,
        }
    }

    /// Only a known reading can be below the floor.
    pub fn is_below(&self, floor: u64) -> bool {
        matches!(self, QuotaReading::Known(v) if *v < floor)
    }
}

/// Extract the first integer that precedes a "remaining" marker on the same line.
pub fn parse_remaining(text: &str) -> Option<u64> {
    let captures = REMAINING_PATTERN.captures(text)?;
    captures.get(1)?.as_str().parse().ok()
}

pub struct QuotaMonitor<E> {
    executor: Arc<E>,
    command: Vec<String>,
}

impl<E: CommandExecutor> QuotaMonitor<E> {
    pub fn new(executor: Arc<E>, config: &QuotaConfig) -> Self {
        Self {
            executor,
            command: config.command.clone(),
        }
    }

    /// Query the remaining quota. Never fails: any problem yields `Unknown`.
    pub async fn query(&self) -> QuotaReading {
        tracing::debug!("checking API quota");
        let output = match self.executor.run(&self.command[0], &self.command[1..]).await {
            Ok(output) if output.success() => output,
            Ok(output) => {
                tracing::error!(
                    exit_code = ?output.exit_code,
                    stderr = %output.stderr.trim(),
                    "quota command failed"
                );
                return QuotaReading::Unknown;
            }
            Err(e) => {
                tracing::error!(error = %e, "quota command failed");
                return QuotaReading::Unknown;
            }
        };

        match parse_remaining(&output.stdout) {
            Some(quota) => {
                tracing::info!(quota, "current API quota");
                QuotaReading::Known(quota)
            }
            None => {
                let excerpt: String = output.stdout.chars().take(200).collect();
                tracing::warn!(output = %excerpt, "could not parse API quota from output");
                QuotaReading::Unknown
            }
        }
    }
}
