//! Structured logging schema and field name constants.
//!
//! All crates use these constants for consistent structured logging fields,
//! so log aggregation can query by the same names across subsystems.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, automatic fallback applied |
//! | INFO  | Lifecycle events (startup, shutdown), job completions |
//! | DEBUG | Decision points, claim races, config choices |
//! | TRACE | Per-poll iteration |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "queue", "worker", "store", "enrichment", "notify"
pub const SUBSYSTEM: &str = "subsystem";

/// Logical operation name.
/// Examples: "claim", "complete", "requeue", "notify_completion"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Job UUID being processed.
pub const JOB_ID: &str = "job_id";

/// Worker identifier holding a job.
pub const WORKER_ID: &str = "worker_id";

/// Owning user of a job.
pub const USER_ID: &str = "user_id";

/// Capture session of a job.
pub const SESSION_ID: &str = "session_id";

/// Analysis engine name.
pub const ENGINE: &str = "engine";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Current retry count of a job.
pub const RETRY_COUNT: &str = "retry_count";

/// Payload size in bytes.
pub const PAYLOAD_BYTES: &str = "payload_bytes";

/// Number of lines produced by an engine.
pub const LINE_COUNT: &str = "line_count";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";
