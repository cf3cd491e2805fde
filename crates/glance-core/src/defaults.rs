//! Centralized default constants for the glance capture pipeline.
//!
//! **This module is the single source of truth** for shared default values.
//! Configuration loaders fall back to these constants when an environment
//! variable is unset or unparseable.

// =============================================================================
// WORKER POOL
// =============================================================================

/// Default number of workers in the pool.
pub const WORKER_COUNT: usize = 2;

/// Idle wait between claim attempts when the queue is empty (milliseconds).
pub const POLL_INTERVAL_MS: u64 = 250;

/// Pause after a store error or a broken loop iteration (milliseconds).
pub const ERROR_BACKOFF_MS: u64 = 1_000;

// =============================================================================
// JOB PROCESSING
// =============================================================================

/// Default maximum number of re-queues before a job is permanently failed.
pub const JOB_MAX_RETRIES: i32 = 3;

/// Upper bound for a single analysis engine call, in seconds.
pub const ANALYSIS_TIMEOUT_SECS: u64 = 120;

/// Attempts made for a terminal-state write before giving up.
pub const TERMINAL_WRITE_ATTEMPTS: u32 = 3;

/// Delay between terminal-state write attempts (milliseconds).
pub const TERMINAL_WRITE_BACKOFF_MS: u64 = 200;

/// Period of the stale-job recovery sweep, when enabled (seconds).
pub const SWEEP_INTERVAL_SECS: u64 = 60;

// =============================================================================
// ENRICHMENT
// =============================================================================

/// Character budget for heuristic summaries.
pub const SUMMARY_MAX_CHARS: usize = 280;

/// Number of leading lines considered by the heuristic summarizer.
pub const SUMMARY_MAX_LINES: usize = 3;

/// Timeout for LLM summary requests in seconds.
pub const SUMMARY_TIMEOUT_SECS: u64 = 30;

/// Default Ollama base URL.
pub const OLLAMA_URL: &str = "http://localhost:11434";

// =============================================================================
// NOTIFICATIONS
// =============================================================================

/// Broadcast buffer for the event bus and worker events.
pub const EVENT_BUS_CAPACITY: usize = 256;

/// Timeout for webhook deliveries in seconds.
pub const WEBHOOK_TIMEOUT_SECS: u64 = 10;

// =============================================================================
// EXTERNAL TOOLS
// =============================================================================

/// Timeout for external OCR commands in seconds.
pub const OCR_CMD_TIMEOUT_SECS: u64 = 60;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_defaults_are_sane() {
        assert!(WORKER_COUNT >= 1);
        assert!(POLL_INTERVAL_MS > 0);
        assert!(TERMINAL_WRITE_ATTEMPTS >= 1);
    }

    #[test]
    fn test_analysis_timeout_exceeds_poll_interval() {
        assert!(ANALYSIS_TIMEOUT_SECS * 1000 > POLL_INTERVAL_MS);
    }
}
