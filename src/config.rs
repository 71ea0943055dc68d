//! Configuration types for the call orchestrator.

use crate::error::{DialerError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration for the dialer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DialerConfig {
    /// Voice activity detection settings.
    pub vad: VadConfig,
    /// Turn-taking detector thresholds (AMD / PLAYING / WAITING modes).
    pub turn: TurnConfig,
    /// Answering-machine detection phrase lists.
    pub amd: AmdConfig,
    /// Per-call limits and timeouts.
    pub call: CallConfig,
    /// Objection-corpus fuzzy matching weights.
    pub objection: ObjectionMatchConfig,
}

impl DialerConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| DialerError::Config(format!("parse {path:?}: {e}")))
    }

    /// Write configuration to a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let text = toml::to_string_pretty(self)
            .map_err(|e| DialerError::Config(format!("serialize config: {e}")))?;
        std::fs::write(path, text)?;
        Ok(())
    }
}

/// Voice activity detection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VadConfig {
    /// RMS energy threshold for speech detection.
    ///
    /// Frames with RMS above this value are classified as speech.
    /// Typical values for f32 samples in \[-1, 1\]:
    ///   - 0.005: very sensitive (picks up quiet speech and line noise)
    ///   - 0.01:  normal sensitivity (default, good for most trunks)
    ///   - 0.02:  reduced sensitivity (noisy lines)
    pub threshold: f32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self { threshold: 0.01 }
    }
}

/// Turn-taking detector thresholds, shared by all three modes so the
/// reset/backchannel/barge-in invariants are enforced identically.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnConfig {
    /// AMD classification window after call answer, in ms.
    pub amd_window_ms: u64,
    /// Speech segments shorter than this are backchannels ("yes",
    /// "uh-huh") and never interrupt playback, in ms.
    pub backchannel_ms: u64,
    /// Continuous speech accumulated past this threshold triggers a
    /// barge-in during playback, in ms.
    pub barge_in_ms: u64,
    /// Delay between crossing the barge-in threshold and signalling the
    /// controller, so a single click doesn't cut playback, in ms.
    pub barge_in_smoothing_ms: u64,
    /// Silence run that resets the accumulated-speech counter, so
    /// disjoint short utterances never sum into a false barge-in, in ms.
    pub speech_reset_ms: u64,
    /// Silence run that finalizes an answer in WAITING mode, in ms.
    pub end_of_speech_ms: u64,
    /// Default WAITING-mode listen timeout when the step does not carry
    /// its own, in ms.
    pub listen_timeout_ms: u64,
    /// Consecutive full-timeout silences tolerated before the call is
    /// force-disposed as no-answer.
    pub max_consecutive_timeouts: u32,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            amd_window_ms: 3_000,
            backchannel_ms: 800,
            barge_in_ms: 2_500,
            barge_in_smoothing_ms: 1_000,
            speech_reset_ms: 2_000,
            end_of_speech_ms: 1_500,
            listen_timeout_ms: 10_000,
            max_consecutive_timeouts: 2,
        }
    }
}

/// Answering-machine detection heuristics.
///
/// The phrase lists are configuration, not logic: the matching rules are
/// acknowledged heuristics and need per-locale tuning. Defaults are a
/// starting point, not an exhaustive list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AmdConfig {
    /// Short greeting-like utterances that indicate a live human.
    pub greeting_phrases: Vec<String>,
    /// Voicemail-greeting phrasing that indicates a machine.
    pub voicemail_phrases: Vec<String>,
    /// Markers the transcriber emits for an answering-machine beep.
    pub beep_markers: Vec<String>,
    /// Window transcripts with at most this many words count as a
    /// greeting-like short utterance (humans answer tersely).
    pub short_utterance_max_words: usize,
    /// Window transcripts longer than this many words are treated as a
    /// scripted machine greeting even without a phrase match.
    pub machine_greeting_min_words: usize,
}

impl Default for AmdConfig {
    fn default() -> Self {
        Self {
            greeting_phrases: vec![
                "hello".to_owned(),
                "hi".to_owned(),
                "yes".to_owned(),
                "speaking".to_owned(),
                "who is this".to_owned(),
            ],
            voicemail_phrases: vec![
                "leave a message".to_owned(),
                "leave your message".to_owned(),
                "after the tone".to_owned(),
                "after the beep".to_owned(),
                "not available".to_owned(),
                "is unavailable".to_owned(),
                "cannot take your call".to_owned(),
                "voicemail".to_owned(),
            ],
            beep_markers: vec!["[beep]".to_owned(), "<beep>".to_owned()],
            short_utterance_max_words: 6,
            machine_greeting_min_words: 14,
        }
    }
}

/// Per-call limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CallConfig {
    /// How long to let the remote end ring before disposing the call as
    /// no-answer, in seconds.
    pub ring_timeout_secs: u64,
    /// Hard cap on total call duration; reaching it forces disposition
    /// and hangup regardless of scenario state, in seconds.
    pub max_call_duration_secs: u64,
    /// Bounded wait for the intent-classification collaborator, in ms.
    /// On timeout the transcript is treated as not-understood.
    pub classify_timeout_ms: u64,
    /// Fixed recording window for the degraded record-then-transcribe
    /// fallback when live transcription is unavailable, in ms.
    pub fallback_record_ms: u64,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            ring_timeout_secs: 30,
            max_call_duration_secs: 300,
            classify_timeout_ms: 4_000,
            fallback_record_ms: 6_000,
        }
    }
}

/// Objection-corpus fuzzy matching weights.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectionMatchConfig {
    /// Minimum combined score for a corpus match; below it the engine
    /// falls back to a generative rebuttal.
    pub min_score: f64,
    /// Weight of normalized string similarity in the combined score.
    pub similarity_weight: f64,
    /// Weight of the shared-keyword ratio in the combined score.
    pub keyword_weight: f64,
}

impl Default for ObjectionMatchConfig {
    fn default() -> Self {
        Self {
            min_score: 0.5,
            similarity_weight: 0.7,
            keyword_weight: 0.3,
        }
    }
}
