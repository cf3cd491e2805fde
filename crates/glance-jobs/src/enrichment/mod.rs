//! Best-effort enrichment of analysis output.
//!
//! Every enricher is optional and independent. A failing enricher is logged
//! and its field keeps its default; it never fails the job.

pub mod entities;
pub mod heuristic;
pub mod ollama;

pub use entities::RegexEntityExtractor;
pub use heuristic::{HeadlineSummarizer, KeywordClassifier};
pub use ollama::OllamaSummarizer;

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::warn;
use uuid::Uuid;

use glance_core::{
    Analysis, CaptureResult, EntityExtractor, InteractionClassifier, InteractionKind, JobContext,
    Result, Summarizer,
};

use crate::worker::panic_message;

/// The set of enrichers applied after analysis.
#[derive(Clone, Default)]
pub struct Enrichers {
    pub summarizer: Option<Arc<dyn Summarizer>>,
    pub classifier: Option<Arc<dyn InteractionClassifier>>,
    pub extractor: Option<Arc<dyn EntityExtractor>>,
}

impl Enrichers {
    /// No enrichment; results carry bare analysis output.
    pub fn none() -> Self {
        Self::default()
    }

    /// The local heuristics: headline summary, keyword classifier, regex entities.
    pub fn heuristic() -> Self {
        Self {
            summarizer: Some(Arc::new(HeadlineSummarizer::default())),
            classifier: Some(Arc::new(KeywordClassifier::new())),
            extractor: Some(Arc::new(RegexEntityExtractor::new())),
        }
    }

    /// Heuristics, with the summarizer swapped for Ollama when
    /// `GLANCE_SUMMARY_MODEL` is set.
    pub fn from_env() -> Self {
        let mut enrichers = Self::heuristic();
        if let Some(ollama) = OllamaSummarizer::from_env() {
            enrichers.summarizer = Some(Arc::new(ollama));
        }
        enrichers
    }

    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn InteractionClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn EntityExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    /// Run all configured enrichers concurrently and assemble the result.
    pub async fn enrich(
        &self,
        job_id: Uuid,
        context: &JobContext,
        analysis: Analysis,
    ) -> CaptureResult {
        let summary = async {
            let Some(summarizer) = &self.summarizer else {
                return String::new();
            };
            best_effort(job_id, "summarize", summarizer.summarize(&analysis, context))
                .await
                .unwrap_or_default()
        };
        let interaction = async {
            let Some(classifier) = &self.classifier else {
                return InteractionKind::Unknown;
            };
            best_effort(job_id, "classify", classifier.classify_interaction(&analysis))
                .await
                .unwrap_or(InteractionKind::Unknown)
        };
        let entities = async {
            let Some(extractor) = &self.extractor else {
                return Vec::new();
            };
            best_effort(job_id, "extract_entities", extractor.extract_entities(&analysis))
                .await
                .unwrap_or_default()
        };

        let (summary, interaction, entities) = tokio::join!(summary, interaction, entities);
        CaptureResult {
            analysis,
            summary,
            interaction,
            entities,
        }
    }
}

/// Await one enricher, logging an error or a panic and yielding `None` so the
/// caller falls back to the field's default.
async fn best_effort<T>(
    job_id: Uuid,
    op: &'static str,
    step: impl Future<Output = Result<T>>,
) -> Option<T> {
    match AssertUnwindSafe(step).catch_unwind().await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            warn!(subsystem = "enrichment", op, %job_id, error = %e,
                  "Enrichment step failed; continuing with default");
            None
        }
        Err(panic) => {
            warn!(subsystem = "enrichment", op, %job_id, panic = %panic_message(panic.as_ref()),
                  "Enrichment step panicked; continuing with default");
            None
        }
    }
}
