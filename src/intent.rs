//! Intent classification collaborator boundary.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::warn;

/// Fixed intent vocabulary returned by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    /// Positive answer to the current question.
    Affirm,
    /// Negative answer to the current question.
    Deny,
    /// The prospect asked a question back.
    Question,
    /// The prospect raised an objection ("too expensive", "no time").
    Objection,
    /// No speech was detected before the listen timeout.
    Silence,
    /// The answer could not be mapped to any other intent.
    NotUnderstood,
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Affirm => "affirm",
            Self::Deny => "deny",
            Self::Question => "question",
            Self::Objection => "objection",
            Self::Silence => "silence",
            Self::NotUnderstood => "not_understood",
        };
        f.write_str(name)
    }
}

/// Maximum (prompt, answer) turns kept as classifier context.
const MAX_CONTEXT_TURNS: usize = 6;

/// Bounded rolling window of conversation turns handed to the
/// classifier so it can disambiguate short answers.
#[derive(Debug, Clone, Default)]
pub struct ConversationContext {
    turns: VecDeque<(String, String)>,
}

impl ConversationContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one (robot prompt, prospect answer) exchange, evicting
    /// the oldest once the window is full.
    pub fn push(&mut self, prompt: &str, answer: &str) {
        if self.turns.len() == MAX_CONTEXT_TURNS {
            self.turns.pop_front();
        }
        self.turns.push_back((prompt.to_owned(), answer.to_owned()));
    }

    /// Iterate over the retained turns, oldest first.
    pub fn turns(&self) -> impl Iterator<Item = &(String, String)> {
        self.turns.iter()
    }

    /// Render the context as alternating `robot:`/`prospect:` lines.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (prompt, answer) in &self.turns {
            out.push_str("robot: ");
            out.push_str(prompt);
            out.push('\n');
            out.push_str("prospect: ");
            out.push_str(answer);
            out.push('\n');
        }
        out
    }
}

/// Intent classification collaborator.
#[async_trait]
pub trait IntentClassifier: Send + Sync {
    /// Classify a transcript into one intent from the fixed vocabulary.
    ///
    /// # Errors
    ///
    /// Returns an error if the service fails; callers treat failures as
    /// [`Intent::NotUnderstood`].
    async fn classify(&self, transcript: &str, context: &ConversationContext) -> Result<Intent>;

    /// Produce a generative rebuttal for an objection that missed the
    /// canned corpus.
    ///
    /// # Errors
    ///
    /// Returns an error if the service fails; the scenario engine then
    /// falls through to the objection fallback transition.
    async fn improvise_rebuttal(
        &self,
        objection: &str,
        context: &ConversationContext,
    ) -> Result<String>;
}

/// Classify with a bounded wait. Timeout or collaborator error both
/// degrade to `NotUnderstood`, routed through the scenario's fallback
/// transition rather than failing the call.
pub async fn classify_with_timeout(
    classifier: &dyn IntentClassifier,
    transcript: &str,
    context: &ConversationContext,
    timeout: Duration,
) -> Intent {
    match tokio::time::timeout(timeout, classifier.classify(transcript, context)).await {
        Ok(Ok(intent)) => intent,
        Ok(Err(e)) => {
            warn!("intent classification failed, treating as not_understood: {e}");
            Intent::NotUnderstood
        }
        Err(_) => {
            warn!(
                "intent classification timed out after {}ms, treating as not_understood",
                timeout.as_millis()
            );
            Intent::NotUnderstood
        }
    }
}
