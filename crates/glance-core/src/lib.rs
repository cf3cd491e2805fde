//! # glance-core
//!
//! Core types, traits, and abstractions for the glance capture pipeline.
//!
//! This crate provides the job data model, the error taxonomy, and the
//! trait seams (job store, payload cache, analysis engine, enrichment,
//! notification) that the other glance crates build on.

pub mod defaults;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;
pub mod traits;
pub mod uuid_utils;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use events::{EventActor, EventBus, EventContext, EventEnvelope, ServerEvent};
pub use models::*;
pub use traits::*;
pub use uuid_utils::{extract_timestamp, is_v7, new_v7};
