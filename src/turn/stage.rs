//! Per-call turn-detection stage task.
//!
//! One long-lived task per call owns the [`TurnDetector`] and the
//! transcription stream, consumes mode commands and raw audio frames,
//! and emits [`TurnEvent`]s toward the call controller. All state is
//! task-local; the controller talks to it purely by message passing.

use crate::audio::AudioFrame;
use crate::call::CallId;
use crate::config::{AmdConfig, TurnConfig, VadConfig};
use crate::stt::{Transcriber, TranscriptStream};
use crate::turn::amd::{AmdClassifier, AmdVerdict};
use crate::turn::{TurnDetector, TurnMode, TurnSignal};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Channel capacity for commands and events.
const CHANNEL_CAPACITY: usize = 32;

/// Commands from the call controller to the turn stage.
#[derive(Debug, Clone)]
pub enum TurnCommand {
    /// Switch detector mode; clears the transcript accumulator.
    SetMode {
        /// New mode.
        mode: TurnMode,
        /// Per-step override of the WAITING listen timeout.
        listen_timeout_ms: Option<u64>,
    },
}

/// Events from the turn stage to the call controller.
#[derive(Debug, Clone)]
pub enum TurnEvent {
    /// The prospect started speaking in the current window.
    SpeechStarted,
    /// A short filler noise during playback; playback continues.
    Backchannel {
        /// Length of the segment in ms.
        duration_ms: u64,
    },
    /// Sustained speech during playback; the finalized transcript of
    /// the interruption.
    BargeIn {
        /// Transcript accumulated for the interruption.
        transcript: String,
    },
    /// The AMD window closed and was classified.
    AmdResult {
        /// Lexical verdict over the window transcript.
        verdict: AmdVerdict,
        /// The window transcript.
        transcript: String,
    },
    /// End-of-speech in WAITING mode; the finalized answer.
    Answer {
        /// Transcript accumulated for the answer.
        transcript: String,
    },
    /// The WAITING window elapsed with no speech at all.
    NoResponse {
        /// Consecutive fully silent windows for this call.
        consecutive: u32,
    },
}

/// Handle to a spawned turn stage.
pub struct TurnStageHandle {
    /// Command channel into the stage.
    pub commands: mpsc::Sender<TurnCommand>,
    /// Event channel out of the stage.
    pub events: mpsc::Receiver<TurnEvent>,
}

/// Spawn the turn stage task for one call.
#[allow(clippy::too_many_arguments)]
pub fn spawn_turn_stage(
    call: CallId,
    turn: TurnConfig,
    vad: VadConfig,
    amd: AmdConfig,
    fallback_record_ms: u64,
    transcriber: Arc<dyn Transcriber>,
    frames: mpsc::Receiver<AudioFrame>,
    cancel: CancellationToken,
) -> TurnStageHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (event_tx, event_rx) = mpsc::channel(CHANNEL_CAPACITY);
    tokio::spawn(run_turn_stage(
        call,
        turn,
        vad,
        amd,
        fallback_record_ms,
        transcriber,
        frames,
        cmd_rx,
        event_tx,
        cancel,
    ));
    TurnStageHandle {
        commands: cmd_tx,
        events: event_rx,
    }
}

/// The stage loop. Owns the detector, the AMD classifier, and either a
/// live transcription stream or the degraded sample accumulator.
#[allow(clippy::too_many_arguments)]
async fn run_turn_stage(
    call: CallId,
    turn: TurnConfig,
    vad: VadConfig,
    amd: AmdConfig,
    fallback_record_ms: u64,
    transcriber: Arc<dyn Transcriber>,
    mut frames: mpsc::Receiver<AudioFrame>,
    mut commands: mpsc::Receiver<TurnCommand>,
    events: mpsc::Sender<TurnEvent>,
    cancel: CancellationToken,
) {
    let mut detector = TurnDetector::new(turn, &vad);
    let classifier = AmdClassifier::new(amd);

    // Live streaming if the transcriber supports it; otherwise degrade
    // to accumulating raw samples and batch-transcribing at finalize
    // time. The call continues either way.
    let mut stream: Option<TranscriptStream> = match transcriber.open_stream(call).await {
        Ok(s) => Some(s),
        Err(e) => {
            warn!(%call, "live transcription unavailable, degrading to batch: {e}");
            None
        }
    };

    let mut transcript_buf = String::new();
    let mut sample_buf: Vec<f32> = Vec::new();

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,

            cmd = commands.recv() => {
                let Some(cmd) = cmd else { break };
                match cmd {
                    TurnCommand::SetMode { mode, listen_timeout_ms } => {
                        detector.set_mode(mode, listen_timeout_ms);
                        transcript_buf.clear();
                        sample_buf.clear();
                    }
                }
            }

            frag = recv_fragment(&mut stream) => {
                if let Some(frag) = frag {
                    if frag.is_final && !frag.text.is_empty() {
                        if !transcript_buf.is_empty() {
                            transcript_buf.push(' ');
                        }
                        transcript_buf.push_str(&frag.text);
                    }
                } else {
                    // Fragment channel closed mid-call: degrade.
                    warn!(%call, "transcription stream closed, degrading to batch");
                    stream = None;
                }
            }

            frame = frames.recv() => {
                let Some(frame) = frame else { break };

                if let Some(s) = &stream {
                    // Best-effort push toward the engine; a full channel
                    // drops the frame rather than stalling detection.
                    if s.frames.try_send(frame.clone()).is_err() {
                        debug!(%call, "transcription stream backpressure, frame dropped");
                    }
                } else if detector.mode() != TurnMode::Idle {
                    sample_buf.extend_from_slice(&frame.samples);
                    // Degraded mode records a bounded window: keep only
                    // the most recent samples.
                    let max_samples =
                        (u64::from(frame.sample_rate) * fallback_record_ms / 1_000) as usize;
                    if sample_buf.len() > max_samples {
                        let excess = sample_buf.len() - max_samples;
                        sample_buf.drain(..excess);
                    }
                }

                for signal in detector.process_frame(&frame) {
                    let event = resolve_signal(
                        call,
                        signal,
                        &detector,
                        &classifier,
                        stream.as_mut(),
                        &mut transcript_buf,
                        &mut sample_buf,
                        frame.sample_rate,
                        transcriber.as_ref(),
                    )
                    .await;
                    if let Some(event) = event
                        && events.send(event).await.is_err()
                    {
                        // Controller gone; nothing left to do.
                        return;
                    }
                }
            }
        }
    }
}

/// Map a detector signal to a controller-facing event, finalizing the
/// transcript where the signal closes a window.
#[allow(clippy::too_many_arguments)]
async fn resolve_signal(
    call: CallId,
    signal: TurnSignal,
    detector: &TurnDetector,
    classifier: &AmdClassifier,
    stream: Option<&mut TranscriptStream>,
    transcript_buf: &mut String,
    sample_buf: &mut Vec<f32>,
    sample_rate: u32,
    transcriber: &dyn Transcriber,
) -> Option<TurnEvent> {
    match signal {
        TurnSignal::SpeechStarted => Some(TurnEvent::SpeechStarted),
        TurnSignal::Backchannel { duration_ms } => {
            info!(%call, duration_ms, "backchannel, playback continues");
            Some(TurnEvent::Backchannel { duration_ms })
        }
        TurnSignal::BargeIn => {
            let transcript =
                finalize(stream, transcript_buf, sample_buf, sample_rate, transcriber).await;
            info!(%call, "barge-in: \"{transcript}\"");
            Some(TurnEvent::BargeIn { transcript })
        }
        TurnSignal::AmdWindowClosed => {
            let transcript =
                finalize(stream, transcript_buf, sample_buf, sample_rate, transcriber).await;
            let verdict = classifier.classify(&transcript);
            info!(%call, ?verdict, "AMD window classified: \"{transcript}\"");
            Some(TurnEvent::AmdResult {
                verdict,
                transcript,
            })
        }
        TurnSignal::EndOfSpeech => {
            let transcript =
                finalize(stream, transcript_buf, sample_buf, sample_rate, transcriber).await;
            Some(TurnEvent::Answer { transcript })
        }
        TurnSignal::Timeout => Some(TurnEvent::NoResponse {
            consecutive: detector.consecutive_timeouts(),
        }),
    }
}

/// Take the finalized transcript for the window that just closed.
///
/// Live path: drain any fragments already delivered, then take the
/// accumulator. Degraded path: batch-transcribe the accumulated samples.
async fn finalize(
    stream: Option<&mut TranscriptStream>,
    transcript_buf: &mut String,
    sample_buf: &mut Vec<f32>,
    sample_rate: u32,
    transcriber: &dyn Transcriber,
) -> String {
    if let Some(s) = stream {
        while let Ok(frag) = s.fragments.try_recv() {
            if frag.is_final && !frag.text.is_empty() {
                if !transcript_buf.is_empty() {
                    transcript_buf.push(' ');
                }
                transcript_buf.push_str(&frag.text);
            }
        }
        return std::mem::take(transcript_buf);
    }

    let samples = std::mem::take(sample_buf);
    if samples.is_empty() {
        return String::new();
    }
    match transcriber.transcribe(&samples, sample_rate).await {
        Ok(text) => text,
        Err(e) => {
            warn!("batch transcription failed: {e}");
            String::new()
        }
    }
}

/// Receive the next fragment, or park forever when running degraded so
/// the select arm never fires.
async fn recv_fragment(
    stream: &mut Option<TranscriptStream>,
) -> Option<crate::stt::TranscriptFragment> {
    match stream {
        Some(s) => s.fragments.recv().await,
        None => std::future::pending().await,
    }
}
