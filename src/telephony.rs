//! Telephony control collaborator boundary.
//!
//! The system that actually originates calls and mixes audio is
//! external. The call controller drives it through [`TelephonyControl`]
//! commands and reacts to [`TelephonyEvent`]s from its broadcast bus.

use crate::audio::AudioFrame;
use crate::call::CallId;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};

/// What to play into a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioSource {
    /// Reference to a pre-recorded prompt known to the telephony side.
    Prerecorded(String),
    /// Text to synthesize on the telephony side (generative rebuttals).
    Synthesized(String),
}

/// Why a call ended, as reported by the telephony side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HangupCause {
    /// Clean hangup (either side).
    Normal,
    /// Remote line busy.
    Busy,
    /// Remote never answered.
    NoAnswer,
    /// Origination rejected by the network.
    Rejected,
    /// Media path failed mid-call.
    MediaError,
}

/// Events published by the telephony collaborator.
#[derive(Debug, Clone)]
pub enum TelephonyEvent {
    /// The remote party answered.
    Answered { call: CallId },
    /// A `play` command finished without interruption.
    PlaybackFinished { call: CallId },
    /// A recording was stopped or ran out.
    RecordingFinished { call: CallId },
    /// The call ended.
    HungUp { call: CallId, cause: HangupCause },
}

impl TelephonyEvent {
    /// The call this event belongs to.
    pub fn call(&self) -> CallId {
        match self {
            Self::Answered { call }
            | Self::PlaybackFinished { call }
            | Self::RecordingFinished { call }
            | Self::HungUp { call, .. } => *call,
        }
    }
}

/// Telephony control collaborator.
///
/// Commands are acknowledged by returning; completion of long-running
/// operations (playback, recording, the call itself) arrives as
/// [`TelephonyEvent`]s on the subscription bus.
#[async_trait]
pub trait TelephonyControl: Send + Sync {
    /// Originate an outbound call. Returns the call handle immediately;
    /// `Answered` / `HungUp` arrive as events.
    ///
    /// # Errors
    ///
    /// Returns an error if the origination command is rejected.
    async fn originate(&self, number: &str, scenario_id: &str) -> Result<CallId>;

    /// Start playing audio into the call.
    ///
    /// # Errors
    ///
    /// Returns an error if the command is rejected or the call is gone.
    async fn play(&self, call: CallId, source: AudioSource) -> Result<()>;

    /// Stop an in-progress playback (barge-in).
    ///
    /// # Errors
    ///
    /// Returns an error if the call is gone.
    async fn stop_play(&self, call: CallId) -> Result<()>;

    /// Start recording the remote party.
    ///
    /// # Errors
    ///
    /// Returns an error if the command is rejected or the call is gone.
    async fn record(&self, call: CallId) -> Result<()>;

    /// Stop an in-progress recording.
    ///
    /// # Errors
    ///
    /// Returns an error if the call is gone.
    async fn stop_record(&self, call: CallId) -> Result<()>;

    /// Open the inbound media stream for a call: an ordered stream of
    /// fixed-size linear-PCM frames.
    ///
    /// # Errors
    ///
    /// Returns an error if the media path cannot be established.
    async fn open_media(&self, call: CallId) -> Result<mpsc::Receiver<AudioFrame>>;

    /// Hang up the call. Idempotent: hanging up a dead call is not an
    /// error.
    ///
    /// # Errors
    ///
    /// Returns an error only if the collaborator itself is unreachable.
    async fn hangup(&self, call: CallId) -> Result<()>;

    /// Subscribe to the event bus. Each subscriber sees every event;
    /// controllers filter by call handle.
    fn subscribe(&self) -> broadcast::Receiver<TelephonyEvent>;
}
