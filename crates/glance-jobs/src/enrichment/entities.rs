//! Regex-based entity extraction.

use std::collections::HashSet;
use std::ops::Range;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use glance_core::{Analysis, Entity, EntityExtractor, EntityKind, Result};

static URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"https?://[^\s<>"'`)\]]+"#).expect("valid URL regex"));

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("valid email regex")
});

static PATH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?:^|[\s"'(=])((?:~|\.{1,2})?(?:/[\w.-]+){2,})"#).expect("valid path regex")
});

static MENTION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|\s)(@[A-Za-z0-9_]{2,})").expect("valid mention regex"));

static HASHTAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|\s)(#[A-Za-z][\w-]*)").expect("valid hashtag regex"));

const TRAILING_PUNCT: &[char] = &['.', ',', ';', ':', '!', '?'];

/// Finds URLs, emails, file paths, mentions and hashtags.
///
/// Patterns run in that order and a later match inside an earlier one is
/// dropped, so the host of `https://x.dev/a/b` is not also reported as a
/// path. Results are deduplicated, first occurrence wins.
#[derive(Debug, Default)]
pub struct RegexEntityExtractor;

impl RegexEntityExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn extract_from(&self, text: &str) -> Vec<Entity> {
        let mut taken: Vec<Range<usize>> = Vec::new();
        let mut seen = HashSet::new();
        let mut entities = Vec::new();

        let mut accept = |kind: EntityKind, range: Range<usize>, taken: &mut Vec<Range<usize>>| {
            if taken
                .iter()
                .any(|t| range.start < t.end && t.start < range.end)
            {
                return;
            }
            let value = text[range.clone()].trim_end_matches(TRAILING_PUNCT);
            taken.push(range);
            if !value.is_empty() && seen.insert((kind, value.to_string())) {
                entities.push(Entity::new(kind, value));
            }
        };

        for m in URL_RE.find_iter(text) {
            accept(EntityKind::Url, m.range(), &mut taken);
        }
        for m in EMAIL_RE.find_iter(text) {
            accept(EntityKind::Email, m.range(), &mut taken);
        }
        for (kind, re) in [
            (EntityKind::FilePath, &*PATH_RE),
            (EntityKind::Mention, &*MENTION_RE),
            (EntityKind::Hashtag, &*HASHTAG_RE),
        ] {
            for caps in re.captures_iter(text) {
                if let Some(m) = caps.get(1) {
                    accept(kind, m.range(), &mut taken);
                }
            }
        }

        entities
    }
}

#[async_trait]
impl EntityExtractor for RegexEntityExtractor {
    async fn extract_entities(&self, analysis: &Analysis) -> Result<Vec<Entity>> {
        Ok(self.extract_from(&analysis.text()))
    }
}
