//! Answering-machine detection over the AMD window transcript.
//!
//! Lexical heuristics only: the phrase lists live in [`AmdConfig`] so
//! they can be tuned per locale without touching code.

use crate::config::AmdConfig;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Outcome of classifying the AMD window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmdVerdict {
    /// A live human answered.
    Human,
    /// An answering machine / voicemail greeting.
    Machine,
    /// An answering-machine beep was heard.
    Beep,
    /// Nothing was said during the window.
    Silence,
    /// The transcript matched no heuristic.
    Unknown,
}

/// Lexical answering-machine classifier.
pub struct AmdClassifier {
    config: AmdConfig,
}

impl AmdClassifier {
    /// Create a classifier from the configured phrase lists.
    pub fn new(config: AmdConfig) -> Self {
        Self { config }
    }

    /// Classify the transcript accumulated over the AMD window.
    ///
    /// Precedence: beep marker, then voicemail phrasing, then the
    /// long-greeting cutoff, then greeting-like short utterances.
    pub fn classify(&self, transcript: &str) -> AmdVerdict {
        let text = transcript.trim().to_lowercase();
        if text.is_empty() {
            return AmdVerdict::Silence;
        }

        if self.config.beep_markers.iter().any(|m| text.contains(&m.to_lowercase())) {
            return AmdVerdict::Beep;
        }

        if let Some(phrase) = self
            .config
            .voicemail_phrases
            .iter()
            .find(|p| text.contains(&p.to_lowercase()))
        {
            debug!(phrase, "voicemail phrasing matched");
            return AmdVerdict::Machine;
        }

        let words = text.split_whitespace().count();
        if words > self.config.machine_greeting_min_words {
            // Long scripted monologue right at answer time: almost
            // certainly a recorded greeting.
            return AmdVerdict::Machine;
        }

        let greeting = self
            .config
            .greeting_phrases
            .iter()
            .any(|g| text.contains(&g.to_lowercase()));
        if greeting || words <= self.config.short_utterance_max_words {
            return AmdVerdict::Human;
        }

        AmdVerdict::Unknown
    }
}
