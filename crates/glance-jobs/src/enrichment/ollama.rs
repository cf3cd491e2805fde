//! OllamaSummarizer - one-sentence capture summaries from a local LLM.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use glance_core::defaults::{OLLAMA_URL, SUMMARY_MAX_CHARS, SUMMARY_TIMEOUT_SECS};
use glance_core::{Analysis, Error, JobContext, Result, Summarizer};

use super::heuristic::truncate_chars;

/// Screen text beyond this many characters is not sent to the model.
const PROMPT_TEXT_LIMIT: usize = 4000;

const SYSTEM_PROMPT: &str = "You describe screen captures. Reply with one short sentence \
     saying what the user is doing. No preamble, no quotes.";

#[derive(Serialize, Deserialize, Clone)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    think: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

/// Summarizer backed by Ollama's `/api/chat` endpoint.
pub struct OllamaSummarizer {
    client: Client,
    base_url: String,
    model: String,
    timeout: Duration,
}

impl OllamaSummarizer {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            timeout: Duration::from_secs(SUMMARY_TIMEOUT_SECS),
        }
    }

    /// Build from `GLANCE_SUMMARY_MODEL` and `OLLAMA_BASE`/`OLLAMA_URL`.
    ///
    /// Returns `None` when no model is configured.
    pub fn from_env() -> Option<Self> {
        let model = std::env::var("GLANCE_SUMMARY_MODEL")
            .ok()
            .filter(|m| !m.trim().is_empty())?;
        let base_url = std::env::var("OLLAMA_BASE")
            .or_else(|_| std::env::var("OLLAMA_URL"))
            .unwrap_or_else(|_| OLLAMA_URL.to_string());
        Some(Self::new(base_url, model))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_prompt(analysis: &Analysis, context: &JobContext) -> String {
        let mut prompt = String::new();
        if let Some(app) = context.app_name.as_deref().filter(|a| !a.is_empty()) {
            prompt.push_str(&format!("Application: {app}\n"));
        }
        if let Some(title) = context.window_title.as_deref().filter(|t| !t.is_empty()) {
            prompt.push_str(&format!("Window: {title}\n"));
        }
        prompt.push_str("Screen text:\n");
        prompt.push_str(&truncate_chars(&analysis.text(), PROMPT_TEXT_LIMIT));
        prompt
    }
}

#[async_trait]
impl Summarizer for OllamaSummarizer {
    async fn summarize(&self, analysis: &Analysis, context: &JobContext) -> Result<String> {
        if analysis.is_empty() {
            return Err(Error::Enrichment("nothing to summarize".to_string()));
        }
        let start = Instant::now();

        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: Self::build_prompt(analysis, context),
                },
            ],
            stream: false,
            think: false,
        };

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Enrichment(format!("summary request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Enrichment(format!("Ollama returned {status}: {body}")));
        }

        let result: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::Enrichment(format!("failed to parse summary response: {e}")))?;

        let summary = result.message.content.trim().trim_matches('"').trim().to_string();
        if summary.is_empty() {
            return Err(Error::Enrichment("model returned an empty summary".to_string()));
        }

        let elapsed = start.elapsed().as_millis() as u64;
        debug!(
            subsystem = "enrichment",
            model = %self.model,
            duration_ms = elapsed,
            "Summary generated"
        );
        if elapsed > 10_000 {
            warn!(
                subsystem = "enrichment",
                model = %self.model,
                duration_ms = elapsed,
                slow = true,
                "Slow summary generation"
            );
        }
        Ok(truncate_chars(&summary, SUMMARY_MAX_CHARS))
    }
}
