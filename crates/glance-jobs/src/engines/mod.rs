//! Analysis engines and per-worker engine ownership.

pub mod tesseract;
pub mod text;

pub use tesseract::TesseractEngine;
pub use text::TextEngine;

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;

use tracing::{info, warn};

use glance_core::{AnalysisEngine, EngineFactory, Error, Result};

/// Built-in engines, selectable with `GLANCE_ENGINE`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EngineKind {
    #[default]
    Text,
    Tesseract,
}

impl EngineKind {
    /// Read `GLANCE_ENGINE`, falling back to [`EngineKind::Text`].
    pub fn from_env() -> Result<Self> {
        match std::env::var("GLANCE_ENGINE") {
            Ok(v) if !v.trim().is_empty() => v.parse(),
            _ => Ok(Self::default()),
        }
    }
}

impl FromStr for EngineKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "tesseract" | "ocr" => Ok(Self::Tesseract),
            other => Err(Error::Config(format!("unknown analysis engine: {other}"))),
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl EngineFactory for EngineKind {
    fn name(&self) -> &str {
        match self {
            Self::Text => TextEngine::NAME,
            Self::Tesseract => TesseractEngine::NAME,
        }
    }

    fn create(&self) -> Result<Box<dyn AnalysisEngine>> {
        match self {
            Self::Text => Ok(Box::new(TextEngine::new())),
            Self::Tesseract => {
                let engine = TesseractEngine::from_env();
                if !engine.is_available() {
                    return Err(Error::Config(
                        "tesseract binary not found (set TESSERACT_CMD)".to_string(),
                    ));
                }
                Ok(Box::new(engine))
            }
        }
    }
}

/// The engine instance owned by one worker.
///
/// The engine leaves the slot while a blocking analysis call runs and comes
/// back when the call returns. If the call panics or times out the engine is
/// dropped, and the next [`EngineSlot::take`] builds a fresh one.
pub struct EngineSlot {
    factory: Arc<dyn EngineFactory>,
    engine: Option<Box<dyn AnalysisEngine>>,
    worker_id: String,
}

impl EngineSlot {
    pub fn new(factory: Arc<dyn EngineFactory>, worker_id: impl Into<String>) -> Self {
        Self {
            factory,
            engine: None,
            worker_id: worker_id.into(),
        }
    }

    /// Build the engine ahead of the first job. Failure is logged and the
    /// build is retried on the next [`EngineSlot::take`].
    pub async fn warm_up(&mut self) {
        match self.build().await {
            Ok(engine) => {
                info!(
                    subsystem = "engine",
                    worker_id = %self.worker_id,
                    engine = engine.name(),
                    "Analysis engine initialized"
                );
                self.engine = Some(engine);
            }
            Err(e) => warn!(
                subsystem = "engine",
                worker_id = %self.worker_id,
                engine = self.factory.name(),
                error = %e,
                "Analysis engine initialization failed; will retry on first job"
            ),
        }
    }

    /// Take the engine out for a call, building it first if needed.
    pub async fn take(&mut self) -> Result<Box<dyn AnalysisEngine>> {
        match self.engine.take() {
            Some(engine) => Ok(engine),
            None => self.build().await,
        }
    }

    /// Return the engine after a call that completed.
    pub fn restore(&mut self, engine: Box<dyn AnalysisEngine>) {
        self.engine = Some(engine);
    }

    pub fn is_ready(&self) -> bool {
        self.engine.is_some()
    }

    /// Engine construction may load models, so it runs off the async threads.
    ///
    /// The returned future owns its factory handle: the slot itself is not
    /// `Sync` and must not be borrowed across the await.
    fn build(&self) -> impl Future<Output = Result<Box<dyn AnalysisEngine>>> + Send + 'static {
        let factory = self.factory.clone();
        async move {
            tokio::task::spawn_blocking(move || factory.create())
                .await
                .map_err(|e| Error::Analysis(format!("engine construction panicked: {e}")))?
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_kind_parse() {
        assert_eq!("text".parse::<EngineKind>().unwrap(), EngineKind::Text);
        assert_eq!(" OCR ".parse::<EngineKind>().unwrap(), EngineKind::Tesseract);
        assert!(matches!("vision".parse::<EngineKind>(), Err(Error::Config(_))));
        assert_eq!(EngineKind::Tesseract.to_string(), "tesseract");
    }

    #[tokio::test]
    async fn test_slot_builds_and_restores() {
        let mut slot = EngineSlot::new(Arc::new(EngineKind::Text), "w-test");
        assert!(!slot.is_ready());
        slot.warm_up().await;
        assert!(slot.is_ready());

        let mut engine = slot.take().await.unwrap();
        assert!(!slot.is_ready());
        assert_eq!(engine.process(b"hi").unwrap().lines, vec!["hi"]);
        slot.restore(engine);
        assert!(slot.is_ready());
    }

    #[tokio::test]
    async fn test_slot_rebuilds_after_loss() {
        let mut slot = EngineSlot::new(Arc::new(EngineKind::Text), "w-test");
        drop(slot.take().await.unwrap());
        assert!(!slot.is_ready());
        assert_eq!(slot.take().await.unwrap().name(), "text");
    }
}
