//! Turn-taking detection.
//!
//! The three VAD monitoring modes (AMD window, barge-in during playback,
//! end-of-speech while waiting for an answer) are one state machine with
//! a mode parameter, so the reset/backchannel/barge-in invariants are
//! enforced identically everywhere. The detector is synchronous and
//! stream-position driven: time advances only by the duration of the
//! frames fed in, which makes every threshold testable with synthetic
//! audio. The async per-call wrapper lives in [`stage`].

pub mod amd;
pub mod stage;

use crate::audio::AudioFrame;
use crate::config::{TurnConfig, VadConfig};
use crate::vad::EnergyVad;
use tracing::debug;

/// Detector mode, selected by the call controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnMode {
    /// Not listening; frames are discarded.
    Idle,
    /// Fixed classification window right after the call is answered.
    Amd,
    /// Robot audio is playing; watch for backchannels and barge-ins.
    Playing,
    /// Listening for the answer to a question, bounded by a timeout.
    Waiting,
}

/// Discrete signal produced by the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnSignal {
    /// First speech detected in the current AMD/WAITING window.
    SpeechStarted,
    /// A speech segment too short to be an interruption ended.
    Backchannel {
        /// Length of the segment in ms.
        duration_ms: u64,
    },
    /// Sustained speech during playback; stop the prompt and hand the
    /// transcript over.
    BargeIn,
    /// The AMD window elapsed; the accumulated transcript is ready for
    /// classification.
    AmdWindowClosed,
    /// The prospect finished answering; finalize the transcript.
    EndOfSpeech,
    /// No speech started before the listen timeout.
    Timeout,
}

/// Mode-parameterized turn-taking state machine.
///
/// Owned exclusively by the per-call turn stage task; nothing else
/// mutates it.
pub struct TurnDetector {
    config: TurnConfig,
    vad: EnergyVad,
    mode: TurnMode,
    /// Effective WAITING timeout; per-step overrides replace the
    /// configured default on each `set_mode`.
    listen_timeout_ms: u64,
    /// Stream position within the current mode, in ms.
    elapsed_ms: u64,
    /// Whether the current frame run is inside a speech segment.
    in_speech: bool,
    /// Length of the current speech segment, in ms.
    segment_ms: u64,
    /// Continuous-speech accumulator for barge-in; reset by a silence
    /// run of `speech_reset_ms`.
    speech_run_ms: u64,
    /// Length of the current silence run, in ms.
    silence_run_ms: u64,
    /// Whether any speech was seen this window (AMD/WAITING).
    speech_started: bool,
    /// Stream position at which a pending barge-in fires (smoothing).
    barge_due_ms: Option<u64>,
    /// Terminal signal already emitted for this mode.
    done: bool,
    /// Consecutive WAITING windows that closed with no speech at all.
    /// Persists across modes; capped by the controller.
    consecutive_timeouts: u32,
}

impl TurnDetector {
    /// Create a detector in `Idle` mode.
    pub fn new(turn: TurnConfig, vad: &VadConfig) -> Self {
        Self {
            config: turn,
            vad: EnergyVad::new(vad),
            mode: TurnMode::Idle,
            listen_timeout_ms: 0,
            elapsed_ms: 0,
            in_speech: false,
            segment_ms: 0,
            speech_run_ms: 0,
            silence_run_ms: 0,
            speech_started: false,
            barge_due_ms: None,
            done: false,
            consecutive_timeouts: 0,
        }
    }

    /// Switch mode and reset all per-window state. The consecutive
    /// timeout counter survives; it is per-call, not per-window.
    ///
    /// `listen_timeout_ms` overrides the configured WAITING timeout for
    /// this window only (per-step scenario timeouts).
    pub fn set_mode(&mut self, mode: TurnMode, listen_timeout_ms: Option<u64>) {
        self.mode = mode;
        self.listen_timeout_ms = listen_timeout_ms.unwrap_or(self.config.listen_timeout_ms);
        self.elapsed_ms = 0;
        self.in_speech = false;
        self.segment_ms = 0;
        self.speech_run_ms = 0;
        self.silence_run_ms = 0;
        self.speech_started = false;
        self.barge_due_ms = None;
        self.done = false;
        debug!(?mode, "turn detector mode set");
    }

    /// Current mode.
    pub fn mode(&self) -> TurnMode {
        self.mode
    }

    /// How many consecutive WAITING windows closed fully silent.
    pub fn consecutive_timeouts(&self) -> u32 {
        self.consecutive_timeouts
    }

    /// Feed one audio frame; returns the signals it produced, in order.
    pub fn process_frame(&mut self, frame: &AudioFrame) -> Vec<TurnSignal> {
        if self.done || self.mode == TurnMode::Idle {
            return Vec::new();
        }

        let frame_ms = frame.duration_ms();
        let is_speech = self.vad.is_speech(&frame.samples);
        self.elapsed_ms += frame_ms;

        let mut signals = Vec::new();
        match self.mode {
            TurnMode::Idle => {}
            TurnMode::Amd => self.advance_amd(is_speech, &mut signals),
            TurnMode::Playing => self.advance_playing(is_speech, frame_ms, &mut signals),
            TurnMode::Waiting => self.advance_waiting(is_speech, frame_ms, &mut signals),
        }
        signals
    }

    /// AMD: accumulate everything, no minimum-duration filter; a single
    /// window-close signal when the window elapses.
    fn advance_amd(&mut self, is_speech: bool, signals: &mut Vec<TurnSignal>) {
        if is_speech && !self.speech_started {
            self.speech_started = true;
            signals.push(TurnSignal::SpeechStarted);
        }
        if self.elapsed_ms >= self.config.amd_window_ms {
            self.done = true;
            signals.push(TurnSignal::AmdWindowClosed);
        }
    }

    /// PLAYING: backchannels never interrupt; sustained speech barges in
    /// after a smoothing delay; long silence resets the accumulator so
    /// disjoint utterances never sum into a false barge-in.
    fn advance_playing(&mut self, is_speech: bool, frame_ms: u64, signals: &mut Vec<TurnSignal>) {
        if is_speech {
            self.in_speech = true;
            self.silence_run_ms = 0;
            self.segment_ms += frame_ms;
            self.speech_run_ms += frame_ms;
            if self.speech_run_ms >= self.config.barge_in_ms && self.barge_due_ms.is_none() {
                self.barge_due_ms = Some(self.elapsed_ms + self.config.barge_in_smoothing_ms);
                debug!(
                    speech_run_ms = self.speech_run_ms,
                    "barge-in threshold crossed, smoothing"
                );
            }
        } else {
            self.silence_run_ms += frame_ms;
            if self.silence_run_ms >= self.config.speech_reset_ms {
                if self.in_speech {
                    if self.segment_ms < self.config.backchannel_ms {
                        signals.push(TurnSignal::Backchannel {
                            duration_ms: self.segment_ms,
                        });
                    }
                    self.in_speech = false;
                }
                self.segment_ms = 0;
                self.speech_run_ms = 0;
                self.barge_due_ms = None;
            }
        }

        if let Some(due) = self.barge_due_ms
            && self.elapsed_ms >= due
        {
            self.done = true;
            signals.push(TurnSignal::BargeIn);
        }
    }

    /// WAITING: speech start needs no minimum duration; end-of-speech is
    /// a sustained silence after speech; a fully silent window times out.
    fn advance_waiting(&mut self, is_speech: bool, frame_ms: u64, signals: &mut Vec<TurnSignal>) {
        if is_speech {
            if !self.speech_started {
                self.speech_started = true;
                signals.push(TurnSignal::SpeechStarted);
            }
            self.silence_run_ms = 0;
        } else if self.speech_started {
            self.silence_run_ms += frame_ms;
            if self.silence_run_ms >= self.config.end_of_speech_ms {
                self.done = true;
                self.consecutive_timeouts = 0;
                signals.push(TurnSignal::EndOfSpeech);
            }
        }

        if !self.speech_started && self.elapsed_ms >= self.listen_timeout_ms {
            self.done = true;
            self.consecutive_timeouts += 1;
            signals.push(TurnSignal::Timeout);
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;

    const FRAME_MS: u64 = 20;

    fn detector() -> TurnDetector {
        TurnDetector::new(TurnConfig::default(), &VadConfig::default())
    }

    fn speech_frame() -> AudioFrame {
        AudioFrame {
            samples: vec![0.3; 160],
            sample_rate: 8_000,
        }
    }

    fn silence_frame() -> AudioFrame {
        AudioFrame {
            samples: vec![0.0; 160],
            sample_rate: 8_000,
        }
    }

    /// Feed `ms` of audio, collecting every signal.
    fn feed(det: &mut TurnDetector, speech: bool, ms: u64) -> Vec<TurnSignal> {
        let frame = if speech {
            speech_frame()
        } else {
            silence_frame()
        };
        let mut signals = Vec::new();
        for _ in 0..(ms / FRAME_MS) {
            signals.extend(det.process_frame(&frame));
        }
        signals
    }

    #[test]
    fn amd_window_closes_after_three_seconds() {
        let mut det = detector();
        det.set_mode(TurnMode::Amd, None);

        let signals = feed(&mut det, true, 2_980);
        assert_eq!(signals, vec![TurnSignal::SpeechStarted]);

        let signals = feed(&mut det, true, 20);
        assert_eq!(signals, vec![TurnSignal::AmdWindowClosed]);

        // Window is one-shot.
        assert!(feed(&mut det, true, 500).is_empty());
    }

    #[test]
    fn playing_short_burst_is_backchannel_not_barge_in() {
        let mut det = detector();
        det.set_mode(TurnMode::Playing, None);

        // 0.3s speech, then 2.2s silence: never a barge-in.
        let mut signals = feed(&mut det, true, 300);
        signals.extend(feed(&mut det, false, 2_200));

        assert!(!signals.contains(&TurnSignal::BargeIn));
        assert!(
            signals
                .iter()
                .any(|s| matches!(s, TurnSignal::Backchannel { duration_ms: 300 }))
        );
    }

    #[test]
    fn playing_sustained_speech_barges_in_within_smoothing_window() {
        let mut det = detector();
        det.set_mode(TurnMode::Playing, None);

        // 2.6s continuous speech crosses the 2.5s threshold.
        let signals = feed(&mut det, true, 2_600);
        assert!(!signals.contains(&TurnSignal::BargeIn));

        // The barge-in fires within one smoothing delay (1.0s).
        let signals = feed(&mut det, false, 1_000);
        assert!(signals.contains(&TurnSignal::BargeIn));
    }

    #[test]
    fn playing_disjoint_bursts_never_sum_into_barge_in() {
        let mut det = detector();
        det.set_mode(TurnMode::Playing, None);

        // Three 1.0s bursts separated by 2.0s silences: the reset
        // threshold zeroes the accumulator between them.
        let mut signals = Vec::new();
        for _ in 0..3 {
            signals.extend(feed(&mut det, true, 1_000));
            signals.extend(feed(&mut det, false, 2_000));
        }
        assert!(!signals.contains(&TurnSignal::BargeIn));
        // 1.0s bursts are above the backchannel threshold, so they are
        // not logged as backchannels either.
        assert!(
            !signals
                .iter()
                .any(|s| matches!(s, TurnSignal::Backchannel { .. }))
        );
    }

    #[test]
    fn playing_short_silence_does_not_reset_accumulator() {
        let mut det = detector();
        det.set_mode(TurnMode::Playing, None);

        // 1.5s speech + 1.0s gap + 1.2s speech: the gap is below the
        // 2.0s reset, so the run totals 2.7s and barges in.
        let mut signals = feed(&mut det, true, 1_500);
        signals.extend(feed(&mut det, false, 1_000));
        signals.extend(feed(&mut det, true, 1_200));
        signals.extend(feed(&mut det, true, 1_000));
        assert!(signals.contains(&TurnSignal::BargeIn));
    }

    #[test]
    fn waiting_full_silence_times_out() {
        let mut det = detector();
        det.set_mode(TurnMode::Waiting, None);

        let signals = feed(&mut det, false, 10_000);
        assert_eq!(signals, vec![TurnSignal::Timeout]);
        assert_eq!(det.consecutive_timeouts(), 1);
    }

    #[test]
    fn waiting_end_of_speech_after_short_answer() {
        let mut det = detector();
        det.set_mode(TurnMode::Waiting, None);

        // 0.3s speech, then silence: end-of-speech fires once 1.5s of
        // silence accumulates (≈1.8s from speech start).
        let signals = feed(&mut det, true, 300);
        assert_eq!(signals, vec![TurnSignal::SpeechStarted]);

        let signals = feed(&mut det, false, 1_480);
        assert!(signals.is_empty());

        let signals = feed(&mut det, false, 20);
        assert_eq!(signals, vec![TurnSignal::EndOfSpeech]);
        assert_eq!(det.consecutive_timeouts(), 0);
    }

    #[test]
    fn waiting_speech_after_pause_keeps_listening() {
        let mut det = detector();
        det.set_mode(TurnMode::Waiting, None);

        feed(&mut det, true, 400);
        // 1.0s pause is below the end-of-speech threshold.
        assert!(feed(&mut det, false, 1_000).is_empty());
        assert!(feed(&mut det, true, 400).is_empty());
        let signals = feed(&mut det, false, 1_500);
        assert_eq!(signals, vec![TurnSignal::EndOfSpeech]);
    }

    #[test]
    fn consecutive_timeouts_accumulate_and_reset_on_answer() {
        let mut det = detector();

        det.set_mode(TurnMode::Waiting, None);
        feed(&mut det, false, 10_000);
        det.set_mode(TurnMode::Waiting, None);
        feed(&mut det, false, 10_000);
        assert_eq!(det.consecutive_timeouts(), 2);

        det.set_mode(TurnMode::Waiting, None);
        feed(&mut det, true, 300);
        feed(&mut det, false, 1_500);
        assert_eq!(det.consecutive_timeouts(), 0);
    }

    #[test]
    fn per_step_listen_timeout_overrides_default() {
        let mut det = detector();
        det.set_mode(TurnMode::Waiting, Some(2_000));

        let signals = feed(&mut det, false, 1_980);
        assert!(signals.is_empty());
        let signals = feed(&mut det, false, 20);
        assert_eq!(signals, vec![TurnSignal::Timeout]);
    }

    #[test]
    fn idle_discards_frames() {
        let mut det = detector();
        assert!(feed(&mut det, true, 1_000).is_empty());
    }
}
