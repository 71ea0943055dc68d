//! Transcription collaborator boundary.
//!
//! The speech-to-text engine is external; the orchestrator consumes it
//! through [`Transcriber`]. The live path opens a per-call stream (push
//! frames in, receive fragments out); the batch path transcribes an
//! accumulated sample buffer and backs the degraded
//! record-then-transcribe fallback when streaming is unavailable.

use crate::audio::AudioFrame;
use crate::call::CallId;
use crate::error::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// A fragment of transcribed speech with stream offsets.
#[derive(Debug, Clone)]
pub struct TranscriptFragment {
    /// Transcribed text.
    pub text: String,
    /// Offset of the fragment start in the call's audio stream, in ms.
    pub start_ms: u64,
    /// Offset of the fragment end in the call's audio stream, in ms.
    pub end_ms: u64,
    /// Whether this is a final fragment (vs a partial that will be
    /// revised by a later one).
    pub is_final: bool,
}

/// A live per-call transcription stream.
///
/// Frames pushed into `frames` yield [`TranscriptFragment`]s on
/// `fragments`. Dropping the struct closes both directions.
pub struct TranscriptStream {
    /// Audio input toward the transcription engine.
    pub frames: mpsc::Sender<AudioFrame>,
    /// Transcript fragments back from the engine.
    pub fragments: mpsc::Receiver<TranscriptFragment>,
}

/// Speech-to-text collaborator.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Open a live transcription stream for one call.
    ///
    /// # Errors
    ///
    /// Returns an error when the engine cannot stream; callers degrade
    /// to the batch path rather than failing the call.
    async fn open_stream(&self, call: CallId) -> Result<TranscriptStream>;

    /// Transcribe a complete sample buffer in one shot.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine rejects or fails the request.
    async fn transcribe(&self, samples: &[f32], sample_rate: u32) -> Result<String>;
}
