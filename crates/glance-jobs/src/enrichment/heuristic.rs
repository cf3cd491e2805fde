//! Local enrichers: headline summaries and keyword-scored interaction labels.

use async_trait::async_trait;

use glance_core::defaults::{SUMMARY_MAX_CHARS, SUMMARY_MAX_LINES};
use glance_core::{
    Analysis, Error, InteractionClassifier, InteractionKind, JobContext, Result, Summarizer,
};

/// Summary built from the capture context and the first few lines.
///
/// Output looks like `Code - main.rs: fn main() {; let x = 1;`.
pub struct HeadlineSummarizer {
    max_lines: usize,
    max_chars: usize,
}

impl Default for HeadlineSummarizer {
    fn default() -> Self {
        Self {
            max_lines: SUMMARY_MAX_LINES,
            max_chars: SUMMARY_MAX_CHARS,
        }
    }
}

impl HeadlineSummarizer {
    pub fn new(max_lines: usize, max_chars: usize) -> Self {
        Self {
            max_lines: max_lines.max(1),
            max_chars: max_chars.max(8),
        }
    }

    fn headline(context: &JobContext) -> String {
        [context.app_name.as_deref(), context.window_title.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" - ")
    }

    fn body(&self, analysis: &Analysis) -> String {
        if analysis.lines.is_empty() {
            return analysis
                .description
                .as_deref()
                .map(str::trim)
                .unwrap_or_default()
                .to_string();
        }
        analysis
            .lines
            .iter()
            .take(self.max_lines)
            .map(|line| line.trim())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Cut `text` to `max_chars` characters, marking the cut with `...`.
pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let keep = max_chars.saturating_sub(3);
    let mut cut: String = text.chars().take(keep).collect();
    cut.truncate(cut.trim_end().len());
    cut.push_str("...");
    cut
}

#[async_trait]
impl Summarizer for HeadlineSummarizer {
    async fn summarize(&self, analysis: &Analysis, context: &JobContext) -> Result<String> {
        let headline = Self::headline(context);
        let body = self.body(analysis);
        let summary = match (headline.is_empty(), body.is_empty()) {
            (true, true) => return Err(Error::Enrichment("nothing to summarize".to_string())),
            (false, true) => headline,
            (true, false) => body,
            (false, false) => format!("{headline}: {body}"),
        };
        Ok(truncate_chars(&summary, self.max_chars))
    }
}

/// Keyword table per interaction kind. Order breaks ties.
const KEYWORDS: &[(InteractionKind, &[&str])] = &[
    (
        InteractionKind::Coding,
        &[
            "fn ", "def ", "class ", "import ", "const ", "let ", "return ", "=>", "#include",
            "pub ", "{", "};", "func ", "struct ",
        ],
    ),
    (
        InteractionKind::Terminal,
        &[
            "$ ", "sudo ", "cd ", "ls ", "git ", "cargo ", "npm ", "~/", "bash", "zsh",
            "command not found",
        ],
    ),
    (
        InteractionKind::Browsing,
        &[
            "http://", "https://", "www.", ".com", "search", "bookmarks", "new tab", "sign in",
        ],
    ),
    (
        InteractionKind::Communication,
        &[
            "reply", "inbox", "sent ", "message", "re:", "meeting", "chat", "unread", "typing...",
        ],
    ),
    (
        InteractionKind::Writing,
        &[
            "draft", "heading", "paragraph", "word count", "document", "chapter", "spelling",
            "format",
        ],
    ),
    (
        InteractionKind::Media,
        &[
            "play", "pause", "playlist", "video", "episode", "volume", "now playing", "subtitles",
        ],
    ),
];

/// Scores each kind by how many of its keywords appear in the text.
///
/// Each keyword counts once. No hits means [`InteractionKind::Unknown`].
#[derive(Debug, Default)]
pub struct KeywordClassifier;

impl KeywordClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn classify_text(&self, text: &str) -> InteractionKind {
        let haystack = text.to_lowercase();
        let mut best = (InteractionKind::Unknown, 0usize);
        for (kind, keywords) in KEYWORDS {
            let score = keywords.iter().filter(|k| haystack.contains(*k)).count();
            if score > best.1 {
                best = (*kind, score);
            }
        }
        best.0
    }
}

#[async_trait]
impl InteractionClassifier for KeywordClassifier {
    async fn classify_interaction(&self, analysis: &Analysis) -> Result<InteractionKind> {
        Ok(self.classify_text(&analysis.text()))
    }
}
