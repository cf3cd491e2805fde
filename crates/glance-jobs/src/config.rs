//! Queue configuration.

use std::str::FromStr;
use std::time::Duration;

use glance_core::defaults;
use tracing::warn;

/// Configuration for the job queue manager and its workers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Number of workers started by the manager.
    pub worker_count: usize,
    /// Idle wait between empty polls, in milliseconds.
    pub poll_interval_ms: u64,
    /// Retry budget assigned to newly enqueued jobs.
    pub max_retries: i32,
    /// Upper bound on a single analysis call, in seconds.
    pub analysis_timeout_secs: u64,
    /// Pause after an error escapes a worker iteration, in milliseconds.
    pub error_backoff_ms: u64,
    /// Attempts for each status write that ends an attempt.
    pub terminal_write_attempts: u32,
    /// Pause between those attempts, in milliseconds.
    pub terminal_write_backoff_ms: u64,
    /// Processing jobs older than this are recovered by the sweeper.
    /// `None` disables the sweeper.
    pub stale_after_secs: Option<u64>,
    /// Interval between sweeps, in seconds.
    pub sweep_interval_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            worker_count: defaults::WORKER_COUNT,
            poll_interval_ms: defaults::POLL_INTERVAL_MS,
            max_retries: defaults::JOB_MAX_RETRIES,
            analysis_timeout_secs: defaults::ANALYSIS_TIMEOUT_SECS,
            error_backoff_ms: defaults::ERROR_BACKOFF_MS,
            terminal_write_attempts: defaults::TERMINAL_WRITE_ATTEMPTS,
            terminal_write_backoff_ms: defaults::TERMINAL_WRITE_BACKOFF_MS,
            stale_after_secs: None,
            sweep_interval_secs: defaults::SWEEP_INTERVAL_SECS,
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `GLANCE_WORKERS` | `2` | Worker pool size |
    /// | `GLANCE_POLL_INTERVAL_MS` | `250` | Idle wait when the queue is empty |
    /// | `GLANCE_MAX_RETRIES` | `3` | Retry budget for new jobs |
    /// | `GLANCE_ANALYSIS_TIMEOUT_SECS` | `120` | Per-call analysis timeout |
    /// | `GLANCE_ERROR_BACKOFF_MS` | `1000` | Pause after a loop error |
    /// | `GLANCE_TERMINAL_WRITE_ATTEMPTS` | `3` | Attempts per terminal status write |
    /// | `GLANCE_TERMINAL_WRITE_BACKOFF_MS` | `200` | Pause between those attempts |
    /// | `GLANCE_STALE_AFTER_SECS` | unset | Enables the stale-job sweeper |
    /// | `GLANCE_SWEEP_INTERVAL_SECS` | `60` | Sweeper interval |
    pub fn from_env() -> Self {
        let base = Self::default();
        Self {
            worker_count: env_parse("GLANCE_WORKERS")
                .unwrap_or(base.worker_count)
                .max(1),
            poll_interval_ms: env_parse("GLANCE_POLL_INTERVAL_MS").unwrap_or(base.poll_interval_ms),
            max_retries: env_parse("GLANCE_MAX_RETRIES")
                .unwrap_or(base.max_retries)
                .max(0),
            analysis_timeout_secs: env_parse("GLANCE_ANALYSIS_TIMEOUT_SECS")
                .unwrap_or(base.analysis_timeout_secs)
                .max(1),
            error_backoff_ms: env_parse("GLANCE_ERROR_BACKOFF_MS").unwrap_or(base.error_backoff_ms),
            terminal_write_attempts: env_parse("GLANCE_TERMINAL_WRITE_ATTEMPTS")
                .unwrap_or(base.terminal_write_attempts)
                .max(1),
            terminal_write_backoff_ms: env_parse("GLANCE_TERMINAL_WRITE_BACKOFF_MS")
                .unwrap_or(base.terminal_write_backoff_ms),
            stale_after_secs: env_parse("GLANCE_STALE_AFTER_SECS").filter(|secs| *secs > 0),
            sweep_interval_secs: env_parse("GLANCE_SWEEP_INTERVAL_SECS")
                .unwrap_or(base.sweep_interval_secs)
                .max(1),
        }
        .checked()
    }

    /// Warn about combinations that make the sweeper steal live jobs.
    fn checked(self) -> Self {
        if let Some(stale) = self.stale_after_secs {
            if stale <= self.analysis_timeout_secs {
                warn!(
                    subsystem = "queue",
                    stale_after_secs = stale,
                    analysis_timeout_secs = self.analysis_timeout_secs,
                    "Stale threshold does not exceed the analysis timeout; \
                     slow jobs may be recovered while still running"
                );
            }
        }
        self
    }

    pub fn with_workers(mut self, count: usize) -> Self {
        self.worker_count = count.max(1);
        self
    }

    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    pub fn with_max_retries(mut self, max_retries: i32) -> Self {
        self.max_retries = max_retries.max(0);
        self
    }

    pub fn with_analysis_timeout(mut self, secs: u64) -> Self {
        self.analysis_timeout_secs = secs.max(1);
        self
    }

    pub fn with_error_backoff(mut self, ms: u64) -> Self {
        self.error_backoff_ms = ms;
        self
    }

    /// Set attempts and backoff for terminal status writes.
    pub fn with_terminal_writes(mut self, attempts: u32, backoff_ms: u64) -> Self {
        self.terminal_write_attempts = attempts.max(1);
        self.terminal_write_backoff_ms = backoff_ms;
        self
    }

    /// Enable the stale-job sweeper. A zero threshold leaves it disabled.
    pub fn with_stale_recovery(mut self, stale_after_secs: u64, sweep_interval_secs: u64) -> Self {
        self.stale_after_secs = Some(stale_after_secs).filter(|secs| *secs > 0);
        self.sweep_interval_secs = sweep_interval_secs.max(1);
        self.checked()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn analysis_timeout(&self) -> Duration {
        Duration::from_secs(self.analysis_timeout_secs)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    pub fn terminal_write_backoff(&self) -> Duration {
        Duration::from_millis(self.terminal_write_backoff_ms)
    }

    pub fn stale_after(&self) -> Option<Duration> {
        self.stale_after_secs.map(Duration::from_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
