//! Deterministic in-process collaborators for tests and `dialflow-sim`.
//!
//! [`SimWorld`] wires three scripted doubles together: a telephony
//! control that plays per-number personas (answer delay, voicemail vs
//! human greeting, scripted answers, playback interruptions), a
//! transcriber that reveals the scripted utterance text as fragments
//! synchronized with the synthetic speech, and a keyword intent
//! classifier. Everything runs on tokio time, so paused-clock tests
//! are fast and exact.

use crate::audio::AudioFrame;
use crate::call::CallId;
use crate::error::{DialerError, Result};
use crate::intent::{ConversationContext, Intent, IntentClassifier};
use crate::stt::{Transcriber, TranscriptFragment, TranscriptStream};
use crate::telephony::{AudioSource, HangupCause, TelephonyControl, TelephonyEvent};
use async_trait::async_trait;
use rand::Rng;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Synthetic frame cadence.
const FRAME_MS: u64 = 20;
/// Synthetic sample rate.
const SAMPLE_RATE: u32 = 8_000;
/// Delay between answer and the greeting being spoken.
const GREETING_DELAY_MS: u64 = 200;
/// Delay between a prompt finishing and the persona answering.
const ANSWER_DELAY_MS: u64 = 300;
/// Delay before a persona starts talking over a prompt.
const INTERRUPT_DELAY_MS: u64 = 300;

/// Scripted behaviour of one phone number.
#[derive(Debug, Clone)]
pub struct Persona {
    /// Answer after this long; `None` never answers.
    pub answer_after_ms: Option<u64>,
    /// Report busy instead of ringing.
    pub busy: bool,
    /// What is said right after answering (the AMD window hears this).
    pub greeting: String,
    /// How long the greeting speech lasts.
    pub greeting_ms: u64,
    /// One utterance per prompt heard, in order; an empty string means
    /// the persona stays silent for that window.
    pub answers: VecDeque<String>,
    /// Talk over the first prompt heard: utterance text and speech
    /// duration in ms. Sustained speech triggers a barge-in.
    pub interrupt: Option<(String, u64)>,
}

impl Persona {
    /// A cooperative human answering with the given utterances.
    pub fn human(answers: &[&str]) -> Self {
        Self {
            answer_after_ms: Some(1_000),
            busy: false,
            greeting: "hello".to_owned(),
            greeting_ms: 600,
            answers: answers.iter().map(|s| (*s).to_owned()).collect(),
            interrupt: None,
        }
    }

    /// A voicemail greeting; the AMD gate should hang up.
    pub fn voicemail() -> Self {
        Self {
            answer_after_ms: Some(1_500),
            busy: false,
            greeting: "you have reached this number please leave a message after the tone"
                .to_owned(),
            greeting_ms: 2_400,
            answers: VecDeque::new(),
            interrupt: None,
        }
    }

    /// Rings forever; the ring timeout disposes the call.
    pub fn no_answer() -> Self {
        Self {
            answer_after_ms: None,
            busy: false,
            greeting: String::new(),
            greeting_ms: 0,
            answers: VecDeque::new(),
            interrupt: None,
        }
    }

    /// Busy line.
    pub fn busy_line() -> Self {
        Self {
            busy: true,
            ..Self::no_answer()
        }
    }
}

/// Pending scripted utterances per call, shared between the telephony
/// double (which "speaks" them) and the transcriber double (which
/// reveals the text when it hears the speech start).
#[derive(Default)]
struct ScriptBook {
    pending: Mutex<HashMap<CallId, VecDeque<String>>>,
}

impl ScriptBook {
    fn push(&self, call: CallId, text: &str) {
        self.pending
            .lock()
            .expect("script book lock")
            .entry(call)
            .or_default()
            .push_back(text.to_owned());
    }

    fn pop(&self, call: CallId) -> Option<String> {
        self.pending
            .lock()
            .expect("script book lock")
            .get_mut(&call)?
            .pop_front()
    }
}

/// A request for the media pump to produce speech.
struct SpeakRequest {
    text: String,
    duration_ms: u64,
}

/// Live state of one simulated call.
struct SimCall {
    persona: Mutex<Persona>,
    speak_tx: mpsc::Sender<SpeakRequest>,
    speak_rx: Mutex<Option<mpsc::Receiver<SpeakRequest>>>,
    playback: Mutex<Option<JoinHandle<()>>>,
    interrupt_used: Mutex<bool>,
    cancel: CancellationToken,
}

/// Scripted telephony control.
pub struct SimTelephony {
    personas: HashMap<String, Persona>,
    calls: Mutex<HashMap<CallId, Arc<SimCall>>>,
    events: broadcast::Sender<TelephonyEvent>,
    scripts: Arc<ScriptBook>,
    /// Playback length for prompts without an explicit override, ms.
    default_audio_ms: u64,
    /// Per-prompt playback length overrides, ms.
    audio_ms: HashMap<String, u64>,
    /// Origination jitter cap, ms (0 disables).
    jitter_ms: u64,
    /// High-water mark of simultaneously live calls.
    peak_live: Mutex<usize>,
    /// Total originations attempted.
    originations: Mutex<usize>,
}

impl SimTelephony {
    fn new(personas: HashMap<String, Persona>, scripts: Arc<ScriptBook>) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            personas,
            calls: Mutex::new(HashMap::new()),
            events,
            scripts,
            default_audio_ms: 1_500,
            audio_ms: HashMap::new(),
            jitter_ms: 0,
            peak_live: Mutex::new(0),
            originations: Mutex::new(0),
        }
    }

    /// High-water mark of simultaneously live calls, for asserting
    /// concurrency caps.
    pub fn peak_live_calls(&self) -> usize {
        *self.peak_live.lock().expect("peak lock")
    }

    /// Total originations attempted, for asserting retry behaviour.
    pub fn origination_count(&self) -> usize {
        *self.originations.lock().expect("originations lock")
    }

    /// Override the playback duration of one prompt reference.
    pub fn set_audio_duration(&mut self, audio: &str, ms: u64) {
        self.audio_ms.insert(audio.to_owned(), ms);
    }

    /// Add random origination jitter up to `ms` (harness realism).
    pub fn set_jitter(&mut self, ms: u64) {
        self.jitter_ms = ms;
    }

    fn playback_ms(&self, source: &AudioSource) -> u64 {
        match source {
            AudioSource::Prerecorded(audio) => {
                self.audio_ms.get(audio).copied().unwrap_or(self.default_audio_ms)
            }
            // Rough speaking-rate estimate for synthesized text.
            AudioSource::Synthesized(text) => {
                (text.split_whitespace().count() as u64 * 300).max(600)
            }
        }
    }

    fn call(&self, call: CallId) -> Result<Arc<SimCall>> {
        self.calls
            .lock()
            .expect("calls lock")
            .get(&call)
            .cloned()
            .ok_or(DialerError::UnknownCall(call))
    }

    /// Speak the persona's next scripted answer, if any.
    fn speak_next_answer(sim: &Arc<SimCall>) {
        let Some(text) = sim
            .persona
            .lock()
            .expect("persona lock")
            .answers
            .pop_front()
        else {
            return;
        };
        if text.is_empty() {
            // Scripted silence: let the listen window time out.
            return;
        }
        let duration_ms = (text.split_whitespace().count() as u64 * 250).max(500);
        let speak_tx = sim.speak_tx.clone();
        let cancel = sim.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(Duration::from_millis(ANSWER_DELAY_MS)) => {
                    let _ = speak_tx.send(SpeakRequest { text, duration_ms }).await;
                }
            }
        });
    }
}

#[async_trait]
impl TelephonyControl for SimTelephony {
    async fn originate(&self, number: &str, _scenario_id: &str) -> Result<CallId> {
        let persona = self
            .personas
            .get(number)
            .cloned()
            .unwrap_or_else(|| Persona::human(&[]));
        let call = CallId::new();
        let (speak_tx, speak_rx) = mpsc::channel(16);
        let sim = Arc::new(SimCall {
            persona: Mutex::new(persona.clone()),
            speak_tx,
            speak_rx: Mutex::new(Some(speak_rx)),
            playback: Mutex::new(None),
            interrupt_used: Mutex::new(false),
            cancel: CancellationToken::new(),
        });
        {
            let mut calls = self.calls.lock().expect("calls lock");
            calls.insert(call, sim.clone());
            let mut peak = self.peak_live.lock().expect("peak lock");
            *peak = (*peak).max(calls.len());
            *self.originations.lock().expect("originations lock") += 1;
        }

        let jitter = if self.jitter_ms > 0 {
            rand::thread_rng().gen_range(0..self.jitter_ms)
        } else {
            0
        };
        let events = self.events.clone();
        let cancel = sim.cancel.clone();
        let speak = sim.speak_tx.clone();
        info!(%call, number, "sim originate");
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(jitter)).await;
            if persona.busy {
                tokio::time::sleep(Duration::from_millis(300)).await;
                let _ = events.send(TelephonyEvent::HungUp {
                    call,
                    cause: HangupCause::Busy,
                });
                return;
            }
            let Some(answer_ms) = persona.answer_after_ms else {
                // Rings until the controller gives up.
                return;
            };
            tokio::select! {
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(Duration::from_millis(answer_ms)) => {}
            }
            let _ = events.send(TelephonyEvent::Answered { call });
            if !persona.greeting.is_empty() {
                tokio::time::sleep(Duration::from_millis(GREETING_DELAY_MS)).await;
                let _ = speak
                    .send(SpeakRequest {
                        text: persona.greeting.clone(),
                        duration_ms: persona.greeting_ms,
                    })
                    .await;
            }
        });
        Ok(call)
    }

    async fn play(&self, call: CallId, source: AudioSource) -> Result<()> {
        let sim = self.call(call)?;
        let duration = Duration::from_millis(self.playback_ms(&source));
        debug!(%call, ?source, ?duration, "sim play");

        // A persona with an interrupt script talks over the first
        // prompt it hears.
        let interrupt = {
            let mut used = sim.interrupt_used.lock().expect("interrupt lock");
            if *used {
                None
            } else {
                let interrupt = sim.persona.lock().expect("persona lock").interrupt.clone();
                if interrupt.is_some() {
                    *used = true;
                }
                interrupt
            }
        };
        if let Some((text, duration_ms)) = interrupt {
            let speak_tx = sim.speak_tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(INTERRUPT_DELAY_MS)).await;
                let _ = speak_tx.send(SpeakRequest { text, duration_ms }).await;
            });
        }

        let events = self.events.clone();
        let sim_for_answer = sim.clone();
        let cancel = sim.cancel.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(duration) => {
                    let _ = events.send(TelephonyEvent::PlaybackFinished { call });
                    // The prospect reacts to what was just played.
                    SimTelephony::speak_next_answer(&sim_for_answer);
                }
            }
        });
        if let Some(previous) = sim.playback.lock().expect("playback lock").replace(handle) {
            previous.abort();
        }
        Ok(())
    }

    async fn stop_play(&self, call: CallId) -> Result<()> {
        let sim = self.call(call)?;
        if let Some(handle) = sim.playback.lock().expect("playback lock").take() {
            handle.abort();
            debug!(%call, "sim playback stopped");
        }
        Ok(())
    }

    async fn record(&self, call: CallId) -> Result<()> {
        self.call(call).map(|_| ())
    }

    async fn stop_record(&self, call: CallId) -> Result<()> {
        // Recording is a no-op for the double; tolerate late calls.
        let _ = self.call(call);
        Ok(())
    }

    async fn open_media(&self, call: CallId) -> Result<mpsc::Receiver<AudioFrame>> {
        let sim = self.call(call)?;
        let speak_rx = sim
            .speak_rx
            .lock()
            .expect("speak_rx lock")
            .take()
            .ok_or_else(|| DialerError::Telephony("media already open".into()))?;
        let (frame_tx, frame_rx) = mpsc::channel(64);
        tokio::spawn(media_pump(
            call,
            frame_tx,
            speak_rx,
            self.scripts.clone(),
            sim.cancel.clone(),
        ));
        Ok(frame_rx)
    }

    async fn hangup(&self, call: CallId) -> Result<()> {
        let Some(sim) = self.calls.lock().expect("calls lock").remove(&call) else {
            // Idempotent.
            return Ok(());
        };
        sim.cancel.cancel();
        if let Some(handle) = sim.playback.lock().expect("playback lock").take() {
            handle.abort();
        }
        let _ = self.events.send(TelephonyEvent::HungUp {
            call,
            cause: HangupCause::Normal,
        });
        info!(%call, "sim hangup");
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<TelephonyEvent> {
        self.events.subscribe()
    }
}

/// Produce a 20ms frame every 20ms of tokio time: speech while a speak
/// request is active, silence otherwise. Speaking also reveals the
/// utterance text to the transcriber via the script book.
async fn media_pump(
    call: CallId,
    frame_tx: mpsc::Sender<AudioFrame>,
    mut speak_rx: mpsc::Receiver<SpeakRequest>,
    scripts: Arc<ScriptBook>,
    cancel: CancellationToken,
) {
    let mut speaking_ms_left: u64 = 0;
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,

            req = speak_rx.recv(), if speaking_ms_left == 0 => {
                let Some(req) = req else { break };
                scripts.push(call, &req.text);
                speaking_ms_left = req.duration_ms;
            }

            () = tokio::time::sleep(Duration::from_millis(FRAME_MS)) => {
                let speech = speaking_ms_left > 0;
                if speech {
                    speaking_ms_left = speaking_ms_left.saturating_sub(FRAME_MS);
                }
                let samples = vec![if speech { 0.3 } else { 0.0 }; 160];
                let frame = AudioFrame {
                    samples,
                    sample_rate: SAMPLE_RATE,
                };
                if frame_tx.send(frame).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// Scripted transcriber: reveals the script-book text for a call when
/// it hears a speech run begin.
pub struct SimTranscriber {
    scripts: Arc<ScriptBook>,
    /// When false, `open_stream` fails and callers exercise the
    /// degraded batch path.
    streaming: bool,
    /// Responses for batch transcription in degraded mode.
    batch_queue: Mutex<VecDeque<String>>,
}

impl SimTranscriber {
    fn new(scripts: Arc<ScriptBook>) -> Self {
        Self {
            scripts,
            streaming: true,
            batch_queue: Mutex::new(VecDeque::new()),
        }
    }

    /// Disable streaming so the turn stage degrades to batch mode.
    pub fn set_streaming(&mut self, streaming: bool) {
        self.streaming = streaming;
    }

    /// Queue a batch-transcription response for degraded-mode tests.
    pub fn push_batch_response(&self, text: &str) {
        self.batch_queue
            .lock()
            .expect("batch queue lock")
            .push_back(text.to_owned());
    }
}

#[async_trait]
impl Transcriber for SimTranscriber {
    async fn open_stream(&self, call: CallId) -> Result<TranscriptStream> {
        if !self.streaming {
            return Err(DialerError::Transcription(
                "streaming transcription unavailable".into(),
            ));
        }
        let (frame_tx, mut frame_rx) = mpsc::channel::<AudioFrame>(64);
        let (frag_tx, frag_rx) = mpsc::channel(16);
        let scripts = self.scripts.clone();
        tokio::spawn(async move {
            let mut in_speech = false;
            let mut position_ms: u64 = 0;
            while let Some(frame) = frame_rx.recv().await {
                let speech = crate::audio::rms_energy(&frame.samples) > 0.01;
                if speech && !in_speech {
                    // Speech run started: reveal the scripted text.
                    if let Some(text) = scripts.pop(call) {
                        let fragment = TranscriptFragment {
                            text,
                            start_ms: position_ms,
                            end_ms: position_ms,
                            is_final: true,
                        };
                        if frag_tx.send(fragment).await.is_err() {
                            break;
                        }
                    }
                }
                in_speech = speech;
                position_ms += frame.duration_ms();
            }
        });
        Ok(TranscriptStream {
            frames: frame_tx,
            fragments: frag_rx,
        })
    }

    async fn transcribe(&self, samples: &[f32], _sample_rate: u32) -> Result<String> {
        if samples.is_empty() {
            return Ok(String::new());
        }
        Ok(self
            .batch_queue
            .lock()
            .expect("batch queue lock")
            .pop_front()
            .unwrap_or_else(|| "yes".to_owned()))
    }
}

/// Deterministic keyword intent classifier.
pub struct KeywordClassifier {
    /// Substrings that mark an objection.
    pub objection_markers: Vec<String>,
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self {
            objection_markers: vec![
                "expensive".to_owned(),
                "afford".to_owned(),
                "no time".to_owned(),
                "already have".to_owned(),
                "not interested right now".to_owned(),
            ],
        }
    }
}

#[async_trait]
impl IntentClassifier for KeywordClassifier {
    async fn classify(&self, transcript: &str, _context: &ConversationContext) -> Result<Intent> {
        let text = transcript.trim().to_lowercase();
        Ok(if text.is_empty() {
            Intent::Silence
        } else if self.objection_markers.iter().any(|m| text.contains(m)) {
            Intent::Objection
        } else if text.starts_with("yes") || text.contains("sure") || text.contains("absolutely") {
            Intent::Affirm
        } else if text.starts_with("no") || text.contains("don't") || text.contains("do not") {
            Intent::Deny
        } else if text.ends_with('?') || text.starts_with("what") || text.starts_with("how") {
            Intent::Question
        } else {
            Intent::NotUnderstood
        })
    }

    async fn improvise_rebuttal(
        &self,
        _objection: &str,
        _context: &ConversationContext,
    ) -> Result<String> {
        Ok("i understand, many people felt the same before they saw the numbers".to_owned())
    }
}

/// The three doubles wired to one shared script book.
pub struct SimWorld {
    /// Scripted telephony control.
    pub telephony: Arc<SimTelephony>,
    /// Scripted transcriber.
    pub transcriber: Arc<SimTranscriber>,
    /// Keyword classifier.
    pub classifier: Arc<KeywordClassifier>,
}

impl SimWorld {
    /// Build a world from per-number personas.
    pub fn new(personas: HashMap<String, Persona>) -> Self {
        let scripts = Arc::new(ScriptBook::default());
        Self {
            telephony: Arc::new(SimTelephony::new(personas, scripts.clone())),
            transcriber: Arc::new(SimTranscriber::new(scripts)),
            classifier: Arc::new(KeywordClassifier::default()),
        }
    }

    /// Build a world, customizing the telephony double before it is
    /// shared (audio durations, jitter).
    pub fn new_with(
        personas: HashMap<String, Persona>,
        customize: impl FnOnce(&mut SimTelephony, &mut SimTranscriber),
    ) -> Self {
        let scripts = Arc::new(ScriptBook::default());
        let mut telephony = SimTelephony::new(personas, scripts.clone());
        let mut transcriber = SimTranscriber::new(scripts);
        customize(&mut telephony, &mut transcriber);
        Self {
            telephony: Arc::new(telephony),
            transcriber: Arc::new(transcriber),
            classifier: Arc::new(KeywordClassifier::default()),
        }
    }
}
