//! # glance-jobs
//!
//! Asynchronous capture analysis for glance.
//!
//! This crate provides:
//! - [`JobQueueManager`]: the worker pool and the producer API
//!   (`enqueue`, `get_status`, `get_stats`)
//! - The per-job processing pipeline with bounded retries
//! - Analysis engines, enrichers and notification sinks
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use glance_jobs::{CaptureContext, EngineKind, JobQueueManager, Priority, QueueConfig};
//! use glance_db::MemoryJobStore;
//!
//! let manager = JobQueueManager::builder(Arc::new(MemoryJobStore::new()), Arc::new(EngineKind::Text))
//!     .with_config(QueueConfig::from_env())
//!     .build();
//! manager.start().await;
//!
//! let job_id = manager
//!     .enqueue(b"hello".to_vec(), CaptureContext::new("session", "user"), Priority::High)
//!     .await?;
//! let mut events = manager.events();
//! while let Ok(event) = events.recv().await {
//!     println!("Event: {:?}", event);
//! }
//!
//! manager.stop().await;
//! ```

pub mod cache;
pub mod config;
pub mod engines;
pub mod enrichment;
pub mod manager;
pub mod notify;
pub mod pipeline;
pub mod retry;
pub mod worker;

// Re-export core types
pub use glance_core::*;

pub use cache::MemoryPayloadCache;
pub use config::QueueConfig;
pub use engines::{EngineKind, EngineSlot, TesseractEngine, TextEngine};
pub use enrichment::{
    Enrichers, HeadlineSummarizer, KeywordClassifier, OllamaSummarizer, RegexEntityExtractor,
};
pub use manager::{JobQueueManager, QueueManagerBuilder};
pub use notify::{sign_payload, EventBusSink, FanoutSink, NoopSink, WebhookSink};
pub use pipeline::Pipeline;
pub use retry::{FailureHandler, Outcome};
pub use worker::WorkerEvent;
