//! TextEngine - reads payloads that already carry text.
//!
//! Used by producers that ship accessibility-tree dumps or pre-extracted
//! text instead of pixels, and by tests.

use serde_json::json;

use glance_core::{Analysis, AnalysisEngine, Error, Result};

/// Engine that splits a UTF-8 payload into trimmed, non-empty lines.
///
/// Rejects payloads that sniff as images so a misrouted screenshot fails
/// loudly instead of producing mojibake.
#[derive(Debug, Default)]
pub struct TextEngine {
    processed: u64,
}

impl TextEngine {
    pub const NAME: &'static str = "text";

    pub fn new() -> Self {
        Self::default()
    }

    /// Payloads handled by this instance so far.
    pub fn processed(&self) -> u64 {
        self.processed
    }
}

impl AnalysisEngine for TextEngine {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn process(&mut self, payload: &[u8]) -> Result<Analysis> {
        if payload.is_empty() {
            return Err(Error::Analysis("empty payload".to_string()));
        }
        if let Some(kind) = infer::get(payload) {
            if kind.matcher_type() == infer::MatcherType::Image {
                return Err(Error::Analysis(format!(
                    "text engine cannot read {} payloads",
                    kind.mime_type()
                )));
            }
        }

        let lossy = std::str::from_utf8(payload).is_err();
        let text = String::from_utf8_lossy(payload);
        let lines: Vec<String> = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect();
        if lines.is_empty() {
            return Err(Error::Analysis("payload contains no text".to_string()));
        }

        self.processed += 1;
        let mut analysis = Analysis::new(Self::NAME, lines);
        analysis.metadata = json!({
            "size_bytes": payload.len(),
            "lossy_utf8": lossy,
        });
        Ok(analysis)
    }
}
