//! glance-worker: analyze capture files through the job queue.
//!
//! ```text
//! glance-worker shot-1.png shot-2.png
//! ```
//!
//! Each file becomes one job. The pool runs until every job settles (or
//! Ctrl-C), then each job record is printed as JSON on stdout. Logs go to
//! stderr, or to `LOG_FILE` when set.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use glance_db::{Database, MemoryJobStore, PoolConfig};
use glance_jobs::{
    CaptureContext, EngineKind, Enrichers, EventBus, EventBusSink, FanoutSink, JobQueueManager,
    JobStore, NotificationSink, Outcome, Priority, QueueConfig, WebhookSink, WorkerEvent,
};

/// Initialize tracing.
///
/// Environment variables:
///   LOG_FORMAT  - "json" or "text" (default: "text")
///   LOG_FILE    - path to log file (optional, daily rotation)
///   RUST_LOG    - standard env filter (default: "glance_worker=info,glance_jobs=info,glance_db=info")
fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "glance_worker=info,glance_jobs=info,glance_db=info".into());
    let registry = tracing_subscriber::registry().with(env_filter);

    if let Some(path) = log_file {
        let path = std::path::Path::new(&path);
        let dir = path.parent().unwrap_or(std::path::Path::new("."));
        let file_name = path
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("glance-worker.log");
        let (writer, guard) =
            tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, file_name));
        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json().with_writer(writer))
                .init();
        } else {
            registry
                .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer))
                .init();
        }
        Some(guard)
    } else {
        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        } else {
            registry
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
        None
    }
}

fn capture_context() -> CaptureContext {
    let session_id = std::env::var("GLANCE_SESSION_ID")
        .unwrap_or_else(|_| format!("cli-{}", glance_jobs::new_v7()));
    let user_id = std::env::var("GLANCE_USER_ID")
        .or_else(|_| std::env::var("USER"))
        .unwrap_or_else(|_| "local".to_string());
    let mut context = CaptureContext::new(session_id, user_id);
    context.app_name = std::env::var("GLANCE_APP_NAME").ok();
    context
}

async fn open_store(config: &QueueConfig) -> anyhow::Result<Arc<dyn JobStore>> {
    match std::env::var("DATABASE_URL") {
        Ok(url) if !url.trim().is_empty() => {
            let pool = PoolConfig::for_workers(config.worker_count).with_env_overrides();
            let db = Database::connect_with_config(&url, pool)
                .await
                .context("connecting to DATABASE_URL")?;
            db.migrate().await.context("running migrations")?;
            Ok(Arc::new(db.jobs))
        }
        _ => {
            info!("DATABASE_URL not set; using in-memory job store");
            Ok(Arc::new(MemoryJobStore::new()))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let _log_guard = init_tracing();

    let files: Vec<PathBuf> = std::env::args_os().skip(1).map(PathBuf::from).collect();
    if files.is_empty() {
        bail!("usage: glance-worker <file>...");
    }

    let config = QueueConfig::from_env();
    let store = open_store(&config).await?;
    let engine = EngineKind::from_env()?;

    let bus = Arc::new(EventBus::default());
    let mut sinks: Vec<Arc<dyn NotificationSink>> = vec![Arc::new(EventBusSink::new(bus.clone()))];
    if let Some(webhook) = WebhookSink::from_env()? {
        sinks.push(Arc::new(webhook));
    }

    let manager = JobQueueManager::builder(store, Arc::new(engine))
        .with_config(config)
        .with_enrichers(Enrichers::from_env())
        .with_sink(Arc::new(FanoutSink::new(sinks)))
        .with_event_bus(bus)
        .build();

    let mut events = manager.events();
    manager.start().await;

    let context = capture_context();
    let mut order = Vec::new();
    let mut names = HashMap::new();
    for path in &files {
        let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        let job_id = manager
            .enqueue(bytes, context.clone(), Priority::Normal)
            .await
            .with_context(|| format!("enqueueing {}", path.display()))?;
        names.insert(job_id, path.display().to_string());
        order.push(job_id);
    }

    let mut unsettled: HashSet<Uuid> = order.iter().copied().collect();
    while !unsettled.is_empty() {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                warn!(unsettled = unsettled.len(), "Interrupted; stopping before all jobs settled");
                break;
            }
            event = events.recv() => match event {
                Ok(WorkerEvent::JobCompleted { job_id, .. }) | Ok(WorkerEvent::JobFailed { job_id, .. }) => {
                    unsettled.remove(&job_id);
                }
                Ok(WorkerEvent::JobReleased { job_id, outcome: Outcome::Stuck, .. }) => {
                    warn!(%job_id, "Job outcome could not be persisted; not waiting for it");
                    unsettled.remove(&job_id);
                }
                Ok(WorkerEvent::JobReleased { job_id, .. }) => {
                    // Another holder owns it now; stop waiting only if it already settled.
                    if manager.get_status(job_id).await?.is_terminal() {
                        unsettled.remove(&job_id);
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "Event stream lagged; re-reading job states");
                    for job_id in unsettled.clone() {
                        if manager.get_status(job_id).await?.is_terminal() {
                            unsettled.remove(&job_id);
                        }
                    }
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    manager.stop().await;

    for job_id in order {
        let job = manager.get_status(job_id).await?;
        let mut record = serde_json::to_value(&job)?;
        if let Some(file) = names.remove(&job_id) {
            record["file"] = serde_json::Value::String(file);
        }
        println!("{}", serde_json::to_string_pretty(&record)?);
    }
    Ok(())
}
