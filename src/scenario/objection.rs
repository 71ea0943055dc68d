//! Themed objection corpus with weighted fuzzy matching.
//!
//! The corpus is an injected read-only strategy resolved once at
//! scenario load, keyed by theme. Match score combines normalized
//! Levenshtein similarity against known phrasings with a
//! shared-keyword ratio, so both close paraphrases and keyword-only
//! hits can clear the threshold.

use crate::config::ObjectionMatchConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use strsim::normalized_levenshtein;
use tracing::debug;

/// One canned objection with its rebuttal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectionEntry {
    /// Short label for logs and reports.
    pub label: String,
    /// Known phrasings of this objection.
    pub patterns: Vec<String>,
    /// Pre-recorded rebuttal prompt reference.
    pub rebuttal_audio: String,
}

/// A scored corpus hit.
#[derive(Debug, Clone)]
pub struct ObjectionMatch<'a> {
    /// The matched entry.
    pub entry: &'a ObjectionEntry,
    /// Combined similarity/keyword score in \[0, 1\].
    pub score: f64,
}

/// Read-only objection corpus for one theme.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectionCorpus {
    /// Theme this corpus serves ("solar", "insurance", ...).
    pub theme: String,
    /// The entries.
    pub entries: Vec<ObjectionEntry>,
}

impl ObjectionCorpus {
    /// An empty corpus for a theme; every lookup misses.
    pub fn empty(theme: &str) -> Self {
        Self {
            theme: theme.to_owned(),
            entries: Vec::new(),
        }
    }

    /// Parse a corpus from JSON text.
    ///
    /// # Errors
    ///
    /// Returns an error on malformed JSON.
    pub fn from_json_str(text: &str) -> crate::error::Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| crate::error::DialerError::Config(format!("objection corpus: {e}")))
    }

    /// Find the best-scoring entry at or above the configured minimum.
    pub fn best_match<'a>(
        &'a self,
        transcript: &str,
        config: &ObjectionMatchConfig,
    ) -> Option<ObjectionMatch<'a>> {
        let text = normalize(transcript);
        if text.is_empty() {
            return None;
        }
        let text_words: HashSet<&str> = text.split_whitespace().collect();

        let mut best: Option<ObjectionMatch<'a>> = None;
        for entry in &self.entries {
            for pattern in &entry.patterns {
                let pattern_norm = normalize(pattern);
                let similarity = normalized_levenshtein(&text, &pattern_norm);
                let keyword = keyword_ratio(&text_words, &pattern_norm);
                // A strong keyword overlap clears the threshold on its
                // own; otherwise the weighted blend decides.
                let score = (config.similarity_weight * similarity
                    + config.keyword_weight * keyword)
                    .max(keyword);
                if score >= config.min_score
                    && best.as_ref().is_none_or(|b| score > b.score)
                {
                    best = Some(ObjectionMatch { entry, score });
                }
            }
        }

        if let Some(m) = &best {
            debug!(
                theme = %self.theme,
                label = %m.entry.label,
                score = m.score,
                "objection matched"
            );
        }
        best
    }
}

/// Lowercase and strip punctuation so scoring sees words only.
fn normalize(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Fraction of the pattern's words present in the transcript.
fn keyword_ratio(text_words: &HashSet<&str>, pattern: &str) -> f64 {
    let pattern_words: Vec<&str> = pattern.split_whitespace().collect();
    if pattern_words.is_empty() {
        return 0.0;
    }
    let shared = pattern_words
        .iter()
        .filter(|w| text_words.contains(**w))
        .count();
    shared as f64 / pattern_words.len() as f64
}
