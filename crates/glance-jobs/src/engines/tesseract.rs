//! TesseractEngine - OCRs screenshots with the `tesseract` CLI.
//!
//! Pipeline: payload → temp file (extension from sniffed format) →
//! `tesseract <file> stdout -l <lang>` → trimmed lines.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use serde_json::json;
use tempfile::Builder as TempFileBuilder;
use tokio::process::Command;
use tracing::debug;

use glance_core::defaults::OCR_CMD_TIMEOUT_SECS;
use glance_core::{Analysis, AnalysisEngine, Error, Result};

pub struct TesseractEngine {
    binary: PathBuf,
    language: String,
    timeout: Duration,
}

impl TesseractEngine {
    pub const NAME: &'static str = "tesseract";

    pub fn new(binary: impl Into<PathBuf>, language: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            language: language.into(),
            timeout: Duration::from_secs(OCR_CMD_TIMEOUT_SECS),
        }
    }

    /// `TESSERACT_CMD` (default `tesseract`) and `TESSERACT_LANG` (default `eng`).
    pub fn from_env() -> Self {
        let binary = std::env::var("TESSERACT_CMD").unwrap_or_else(|_| "tesseract".to_string());
        let language = std::env::var("TESSERACT_LANG").unwrap_or_else(|_| "eng".to_string());
        Self::new(binary, language)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Whether the binary runs at all.
    pub fn is_available(&self) -> bool {
        std::process::Command::new(&self.binary)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// Run tesseract on `path`, killing it once the timeout passes.
    ///
    /// Called from the blocking pool, so it drives the child on the current
    /// runtime handle.
    fn run(&self, path: &Path) -> Result<String> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::Analysis(format!("tesseract needs a tokio runtime: {e}")))?;

        let mut cmd = Command::new(&self.binary);
        cmd.arg(path)
            .arg("stdout")
            .arg("-l")
            .arg(&self.language)
            .kill_on_drop(true);

        let output = handle
            .block_on(async { tokio::time::timeout(self.timeout, cmd.output()).await })
            .map_err(|_| {
                Error::Analysis(format!("tesseract timed out after {:?}", self.timeout))
            })?
            .map_err(|e| {
                Error::Analysis(format!("failed to start {}: {e}", self.binary.display()))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Analysis(format!(
                "tesseract failed ({}): {}",
                output.status,
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Split OCR output into trimmed, non-empty lines.
pub(crate) fn parse_ocr_output(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect()
}

impl AnalysisEngine for TesseractEngine {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn process(&mut self, payload: &[u8]) -> Result<Analysis> {
        if payload.is_empty() {
            return Err(Error::Analysis("cannot OCR an empty payload".to_string()));
        }
        let kind = infer::get(payload)
            .filter(|k| k.matcher_type() == infer::MatcherType::Image)
            .ok_or_else(|| Error::Analysis("payload is not a recognized image".to_string()))?;

        let started = Instant::now();
        let mut file = TempFileBuilder::new()
            .prefix("glance-capture-")
            .suffix(&format!(".{}", kind.extension()))
            .tempfile()?;
        file.write_all(payload)?;
        file.flush()?;

        debug!(
            subsystem = "engine",
            engine = Self::NAME,
            mime = kind.mime_type(),
            payload_bytes = payload.len(),
            "Running OCR"
        );
        let raw = self.run(file.path())?;
        let lines = parse_ocr_output(&raw);

        let mut analysis = Analysis::new(Self::NAME, lines);
        analysis.metadata = json!({
            "mime_type": kind.mime_type(),
            "size_bytes": payload.len(),
            "language": self.language,
            "ocr_ms": started.elapsed().as_millis() as u64,
        });
        Ok(analysis)
    }
}
