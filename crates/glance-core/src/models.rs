//! Core data models for capture jobs and their analysis results.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::{Error, Result};

// =============================================================================
// PRIORITY & STATUS
// =============================================================================

/// Claim priority of a job. Higher priorities are always claimed first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
}

impl Priority {
    /// Integer rank used for ordering in the store (higher claims first).
    pub fn rank(self) -> i16 {
        match self {
            Priority::High => 2,
            Priority::Normal => 1,
            Priority::Low => 0,
        }
    }

    /// Inverse of [`Priority::rank`].
    pub fn from_rank(rank: i16) -> Option<Self> {
        match rank {
            2 => Some(Priority::High),
            1 => Some(Priority::Normal),
            0 => Some(Priority::Low),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        }
    }
}

impl FromStr for Priority {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Ok(Priority::High),
            "normal" => Ok(Priority::Normal),
            "low" => Ok(Priority::Low),
            other => Err(Error::Validation(format!("unknown priority: {other}"))),
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Flat projection of [`JobState`], used for counting and persistence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// `completed` and `failed` are never left once reached.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(Error::Store(format!("unknown job status: {other}"))),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// CONTEXT
// =============================================================================

/// Capture context as sent by a producer. Every field is optional on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureContext {
    pub app_name: Option<String>,
    pub window_title: Option<String>,
    pub bundle_id: Option<String>,
    pub session_id: Option<String>,
    pub user_id: Option<String>,
}

impl CaptureContext {
    /// Context for a user session; the remaining fields start empty.
    pub fn new(session_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            user_id: Some(user_id.into()),
            ..Default::default()
        }
    }

    pub fn with_app(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = Some(app_name.into());
        self
    }

    pub fn with_window_title(mut self, title: impl Into<String>) -> Self {
        self.window_title = Some(title.into());
        self
    }

    pub fn with_bundle_id(mut self, bundle_id: impl Into<String>) -> Self {
        self.bundle_id = Some(bundle_id.into());
        self
    }

    /// Check the mandatory identifiers and produce the persisted context.
    ///
    /// Blank identifiers count as missing.
    pub fn validate(self) -> Result<JobContext> {
        let session_id = required(self.session_id, "session_id")?;
        let user_id = required(self.user_id, "user_id")?;
        Ok(JobContext {
            app_name: self.app_name,
            window_title: self.window_title,
            bundle_id: self.bundle_id,
            session_id,
            user_id,
        })
    }
}

fn required(value: Option<String>, field: &str) -> Result<String> {
    match value.map(|v| v.trim().to_string()) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(Error::Validation(format!("{field} is required"))),
    }
}

/// Validated capture context stored on every job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobContext {
    pub app_name: Option<String>,
    pub window_title: Option<String>,
    pub bundle_id: Option<String>,
    pub session_id: String,
    pub user_id: String,
}

// =============================================================================
// ANALYSIS RESULTS
// =============================================================================

/// Raw output of an analysis engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    /// Name of the engine that produced this output.
    pub engine: String,
    /// Extracted text lines in reading order.
    pub lines: Vec<String>,
    /// Free-form description (vision engines).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Engine-specific metadata (dimensions, format, timings).
    #[serde(default)]
    pub metadata: JsonValue,
}

impl Analysis {
    pub fn new(engine: impl Into<String>, lines: Vec<String>) -> Self {
        Self {
            engine: engine.into(),
            lines,
            description: None,
            metadata: JsonValue::Null,
        }
    }

    /// All lines joined with newlines, followed by the description if any.
    pub fn text(&self) -> String {
        let mut text = self.lines.join("\n");
        if let Some(desc) = &self.description {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(desc);
        }
        text
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty() && self.description.as_deref().map_or(true, str::is_empty)
    }
}

/// Coarse label for what the user was doing in the captured screen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    Coding,
    Browsing,
    Communication,
    Writing,
    Terminal,
    Media,
    #[default]
    Unknown,
}

impl InteractionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            InteractionKind::Coding => "coding",
            InteractionKind::Browsing => "browsing",
            InteractionKind::Communication => "communication",
            InteractionKind::Writing => "writing",
            InteractionKind::Terminal => "terminal",
            InteractionKind::Media => "media",
            InteractionKind::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Url,
    Email,
    FilePath,
    Mention,
    Hashtag,
}

/// Entity found in extracted text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Entity {
    pub kind: EntityKind,
    pub value: String,
}

impl Entity {
    pub fn new(kind: EntityKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }
}

/// Full result of a completed job: engine output plus enrichment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureResult {
    pub analysis: Analysis,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub interaction: InteractionKind,
    #[serde(default)]
    pub entities: Vec<Entity>,
}

impl CaptureResult {
    /// Result with enrichment fields at their defaults.
    pub fn bare(analysis: Analysis) -> Self {
        Self {
            analysis,
            summary: String::new(),
            interaction: InteractionKind::Unknown,
            entities: Vec::new(),
        }
    }

    /// Condensed form pushed to notification sinks.
    pub fn summarize_for(&self, job_id: Uuid) -> ResultSummary {
        ResultSummary {
            job_id,
            line_count: self.analysis.lines.len(),
            summary: self.summary.clone(),
            interaction: self.interaction,
            entity_count: self.entities.len(),
        }
    }
}

/// Notification payload describing a completed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultSummary {
    pub job_id: Uuid,
    pub line_count: usize,
    pub summary: String,
    pub interaction: InteractionKind,
    pub entity_count: usize,
}

// =============================================================================
// JOB
// =============================================================================

/// Lifecycle state of a job, carrying exactly the data valid in that state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Processing {
        worker_id: String,
        started_at: DateTime<Utc>,
    },
    Completed {
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
        result: CaptureResult,
    },
    Failed {
        started_at: Option<DateTime<Utc>>,
        completed_at: DateTime<Utc>,
        error_message: String,
    },
}

impl JobState {
    pub fn status(&self) -> JobStatus {
        match self {
            JobState::Pending => JobStatus::Pending,
            JobState::Processing { .. } => JobStatus::Processing,
            JobState::Completed { .. } => JobStatus::Completed,
            JobState::Failed { .. } => JobStatus::Failed,
        }
    }
}

/// A capture analysis job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub priority: Priority,
    pub context: JobContext,
    pub retry_count: i32,
    pub max_retries: i32,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub state: JobState,
}

impl Job {
    /// New pending job with a fresh UUIDv7.
    pub fn new(context: JobContext, priority: Priority, max_retries: i32) -> Self {
        Self {
            id: crate::uuid_utils::new_v7(),
            priority,
            context,
            retry_count: 0,
            max_retries: max_retries.max(0),
            created_at: Utc::now(),
            state: JobState::Pending,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.state.status()
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    pub fn assigned_worker(&self) -> Option<&str> {
        match &self.state {
            JobState::Processing { worker_id, .. } => Some(worker_id),
            _ => None,
        }
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        match &self.state {
            JobState::Pending => None,
            JobState::Processing { started_at, .. } | JobState::Completed { started_at, .. } => {
                Some(*started_at)
            }
            JobState::Failed { started_at, .. } => *started_at,
        }
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        match &self.state {
            JobState::Completed { completed_at, .. } | JobState::Failed { completed_at, .. } => {
                Some(*completed_at)
            }
            _ => None,
        }
    }

    pub fn result(&self) -> Option<&CaptureResult> {
        match &self.state {
            JobState::Completed { result, .. } => Some(result),
            _ => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.state {
            JobState::Failed { error_message, .. } => Some(error_message),
            _ => None,
        }
    }

    /// Whether another attempt is allowed after the current one fails.
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    fn held_by(&self, worker_id: &str) -> bool {
        self.assigned_worker() == Some(worker_id)
    }

    // ── State transitions ──────────────────────────────────────────────────
    //
    // Each returns false and leaves the job untouched when the precondition
    // does not hold. Store backends apply them as conditional updates.

    /// `pending → processing`.
    pub fn claim(&mut self, worker_id: &str, now: DateTime<Utc>) -> bool {
        if !matches!(self.state, JobState::Pending) {
            return false;
        }
        self.state = JobState::Processing {
            worker_id: worker_id.to_string(),
            started_at: now,
        };
        true
    }

    /// `processing → completed`, only for the holding worker.
    pub fn complete(&mut self, worker_id: &str, result: CaptureResult, now: DateTime<Utc>) -> bool {
        if !self.held_by(worker_id) {
            return false;
        }
        let Some(started_at) = self.started_at() else {
            return false;
        };
        self.state = JobState::Completed {
            started_at,
            completed_at: now,
            result,
        };
        true
    }

    /// `processing → pending` with `retry_count + 1`, while retries remain.
    pub fn requeue(&mut self, worker_id: &str) -> bool {
        if !self.held_by(worker_id) || !self.can_retry() {
            return false;
        }
        self.retry_count += 1;
        self.state = JobState::Pending;
        true
    }

    /// `processing → failed`, only for the holding worker.
    pub fn fail(&mut self, worker_id: &str, error: &str, now: DateTime<Utc>) -> bool {
        if !self.held_by(worker_id) {
            return false;
        }
        self.state = JobState::Failed {
            started_at: self.started_at(),
            completed_at: now,
            error_message: error.to_string(),
        };
        true
    }
}

/// Pending/processing counts as reported by a job store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreCounts {
    pub pending: i64,
    pub processing: i64,
}

/// Queue statistics for observability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending_count: i64,
    pub processing_count: i64,
    pub active_worker_count: usize,
    pub running: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> JobContext {
        CaptureContext::new("sess-1", "user-1")
            .with_app("Code")
            .validate()
            .unwrap()
    }

    fn sample_result() -> CaptureResult {
        CaptureResult::bare(Analysis::new("text", vec!["hello".to_string()]))
    }

    #[test]
    fn test_priority_rank_order() {
        assert!(Priority::High.rank() > Priority::Normal.rank());
        assert!(Priority::Normal.rank() > Priority::Low.rank());
        assert_eq!(Priority::default(), Priority::Normal);
    }

    #[test]
    fn test_priority_rank_roundtrip() {
        for p in [Priority::High, Priority::Normal, Priority::Low] {
            assert_eq!(Priority::from_rank(p.rank()), Some(p));
        }
        assert_eq!(Priority::from_rank(9), None);
    }

    #[test]
    fn test_priority_from_str() {
        assert_eq!("HIGH".parse::<Priority>().unwrap(), Priority::High);
        assert_eq!(" low ".parse::<Priority>().unwrap(), Priority::Low);
        assert!("urgent".parse::<Priority>().is_err());
    }

    #[test]
    fn test_validate_requires_session_id() {
        let ctx = CaptureContext {
            user_id: Some("u".into()),
            ..Default::default()
        };
        let err = ctx.validate().unwrap_err();
        assert!(matches!(err, Error::Validation(ref m) if m.contains("session_id")));
    }

    #[test]
    fn test_validate_requires_user_id() {
        let ctx = CaptureContext {
            session_id: Some("s".into()),
            ..Default::default()
        };
        let err = ctx.validate().unwrap_err();
        assert!(matches!(err, Error::Validation(ref m) if m.contains("user_id")));
    }

    #[test]
    fn test_validate_rejects_blank_identifiers() {
        let ctx = CaptureContext::new("   ", "user");
        assert!(ctx.validate().is_err());
    }

    #[test]
    fn test_validate_keeps_optional_fields() {
        let ctx = CaptureContext::new("s", "u")
            .with_app("Safari")
            .with_window_title("Docs")
            .with_bundle_id("com.apple.Safari")
            .validate()
            .unwrap();
        assert_eq!(ctx.app_name.as_deref(), Some("Safari"));
        assert_eq!(ctx.window_title.as_deref(), Some("Docs"));
        assert_eq!(ctx.bundle_id.as_deref(), Some("com.apple.Safari"));
    }

    #[test]
    fn test_new_job_is_pending() {
        let job = Job::new(context(), Priority::High, 3);
        assert_eq!(job.status(), JobStatus::Pending);
        assert_eq!(job.retry_count, 0);
        assert!(job.assigned_worker().is_none());
        assert!(job.started_at().is_none());
        assert!(job.result().is_none());
        assert!(job.error_message().is_none());
    }

    #[test]
    fn test_claim_only_from_pending() {
        let mut job = Job::new(context(), Priority::Normal, 3);
        assert!(job.claim("w-0", Utc::now()));
        assert_eq!(job.assigned_worker(), Some("w-0"));
        assert!(!job.claim("w-1", Utc::now()));
        assert_eq!(job.assigned_worker(), Some("w-0"));
    }

    #[test]
    fn test_complete_requires_holder() {
        let mut job = Job::new(context(), Priority::Normal, 3);
        job.claim("w-0", Utc::now());
        assert!(!job.complete("w-1", sample_result(), Utc::now()));
        assert!(job.complete("w-0", sample_result(), Utc::now()));
        assert_eq!(job.status(), JobStatus::Completed);
        assert!(job.assigned_worker().is_none());
        assert!(job.started_at().is_some());
        assert!(job.completed_at().is_some());
        assert!(job.error_message().is_none());
    }

    #[test]
    fn test_requeue_bounded_by_max_retries() {
        let mut job = Job::new(context(), Priority::Normal, 1);
        job.claim("w-0", Utc::now());
        assert!(job.requeue("w-0"));
        assert_eq!(job.status(), JobStatus::Pending);
        assert_eq!(job.retry_count, 1);
        assert!(job.assigned_worker().is_none());
        assert!(job.started_at().is_none());

        job.claim("w-1", Utc::now());
        assert!(!job.requeue("w-1"));
        assert_eq!(job.status(), JobStatus::Processing);
        assert!(job.fail("w-1", "boom", Utc::now()));
        assert_eq!(job.error_message(), Some("boom"));
        assert_eq!(job.retry_count, 1);
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut job = Job::new(context(), Priority::Normal, 3);
        job.claim("w-0", Utc::now());
        job.fail("w-0", "lost", Utc::now());
        assert!(job.is_terminal());
        assert!(!job.claim("w-0", Utc::now()));
        assert!(!job.requeue("w-0"));
        assert!(!job.complete("w-0", sample_result(), Utc::now()));
    }

    #[test]
    fn test_job_serializes_status_tag() {
        let mut job = Job::new(context(), Priority::Low, 3);
        job.claim("w-3", Utc::now());
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["status"], "processing");
        assert_eq!(value["worker_id"], "w-3");
        assert_eq!(value["priority"], "low");

        let back: Job = serde_json::from_value(value).unwrap();
        assert_eq!(back, job);
    }

    #[test]
    fn test_analysis_text_includes_description() {
        let mut analysis = Analysis::new("vision", vec!["line".into()]);
        analysis.description = Some("a terminal window".into());
        assert_eq!(analysis.text(), "line\na terminal window");
        assert!(!analysis.is_empty());
        assert!(Analysis::new("text", vec![]).is_empty());
    }

    #[test]
    fn test_summarize_for_counts() {
        let mut result = sample_result();
        result.entities.push(Entity::new(EntityKind::Url, "https://x.dev"));
        result.summary = "hello".into();
        let id = Uuid::nil();
        let summary = result.summarize_for(id);
        assert_eq!(summary.job_id, id);
        assert_eq!(summary.line_count, 1);
        assert_eq!(summary.entity_count, 1);
        assert_eq!(summary.summary, "hello");
    }
}
