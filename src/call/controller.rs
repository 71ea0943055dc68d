//! Per-call control loop.
//!
//! One task per call sequences origination → AMD → scenario execution →
//! disposition, translating engine decisions into telephony commands
//! and merging telephony events with turn events in one select loop.
//! Whatever path the call takes, the terminal disposition is written
//! exactly once and the line is hung up.

use crate::call::{CallId, CallRecord, CallResult, CallStatus};
use crate::campaign::{CampaignId, Contact};
use crate::config::DialerConfig;
use crate::error::{DialerError, Result};
use crate::intent::IntentClassifier;
use crate::scenario::engine::{EngineAction, ListenOutcome, ScenarioEngine};
use crate::scenario::{ObjectionCorpus, ScenarioDefinition};
use crate::stt::Transcriber;
use crate::telephony::{HangupCause, TelephonyControl, TelephonyEvent};
use crate::turn::TurnMode;
use crate::turn::amd::AmdVerdict;
use crate::turn::stage::{TurnCommand, TurnEvent, TurnStageHandle, spawn_turn_stage};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Everything a call controller needs, shared across the campaign's
/// calls. All collaborators are read-only from the controller's side.
pub struct CallContext {
    /// Thresholds and limits.
    pub config: DialerConfig,
    /// Telephony collaborator.
    pub telephony: Arc<dyn TelephonyControl>,
    /// Transcription collaborator.
    pub transcriber: Arc<dyn Transcriber>,
    /// Intent-classification collaborator.
    pub classifier: Arc<dyn IntentClassifier>,
    /// The immutable scenario every call runs.
    pub scenario: Arc<ScenarioDefinition>,
    /// Objection corpus for the scenario's theme.
    pub corpus: Arc<ObjectionCorpus>,
}

/// How the driving phase ended; mapped to the terminal disposition.
enum Ending {
    /// The scenario reached a final step.
    Scenario(CallResult),
    /// The remote party (or the network) ended the call.
    Hangup(HangupCause),
    /// An answering machine or beep was classified.
    Machine,
    /// The AMD window was fully silent.
    AmdSilence,
    /// Too many consecutive silent listen windows.
    SilenceCap,
    /// The max-call-duration cap fired.
    DurationCap,
    /// Shutdown requested.
    Cancelled,
}

/// Run one call to completion. Always returns a terminal record; every
/// failure is isolated to this call.
pub async fn run_call(
    ctx: Arc<CallContext>,
    contact: Contact,
    campaign_id: Option<CampaignId>,
    retries_used: u32,
    cancel: CancellationToken,
) -> CallRecord {
    // Subscribe before originating: an answer (or hangup) raced during
    // the originate round-trip must not be lost.
    let mut events = ctx.telephony.subscribe();
    let call = match ctx
        .telephony
        .originate(&contact.phone_number, &ctx.scenario.id)
        .await
    {
        Ok(call) => call,
        Err(e) => {
            error!(number = %contact.phone_number, "originate failed: {e}");
            let mut record = CallRecord::new(
                CallId::new(),
                &contact.phone_number,
                campaign_id,
                &ctx.scenario.id,
                retries_used,
            );
            record.finalize(CallStatus::Failed, CallResult::Failed);
            return record;
        }
    };

    let mut record = CallRecord::new(
        call,
        &contact.phone_number,
        campaign_id,
        &ctx.scenario.id,
        retries_used,
    );
    record.set_status(CallStatus::Originating);
    // Origination acknowledged: the remote end is ringing.
    record.set_status(CallStatus::Ringing);
    info!(%call, number = %contact.phone_number, "originated");

    match wait_for_answer(&ctx, call, &mut events, &cancel).await {
        AnswerOutcome::Answered => {}
        AnswerOutcome::Ended(status, result) => {
            let _ = ctx.telephony.hangup(call).await;
            record.finalize(status, result);
            return record;
        }
    }
    record.set_status(CallStatus::InProgress);

    // Media + turn stage get a child token so they die with the call.
    let stage_cancel = cancel.child_token();
    let ending = match setup_and_drive(
        &ctx,
        call,
        &contact,
        &mut record,
        &mut events,
        &cancel,
        &stage_cancel,
    )
    .await
    {
        Ok(ending) => ending,
        Err(e) => {
            error!(%call, "call failed: {e}");
            Ending::Hangup(HangupCause::MediaError)
        }
    };
    stage_cancel.cancel();

    let (status, result) = disposition(&ending);
    let _ = ctx.telephony.stop_record(call).await;
    let _ = ctx.telephony.hangup(call).await;
    record.finalize(status, result);
    info!(%call, ?status, ?result, "disposed");
    record
}

/// Map an ending to the (status, result) pair persisted exactly once.
fn disposition(ending: &Ending) -> (CallStatus, CallResult) {
    match ending {
        Ending::Scenario(result) => (CallStatus::Completed, *result),
        Ending::Machine => (CallStatus::Completed, CallResult::AnsweringMachine),
        Ending::AmdSilence | Ending::SilenceCap => (CallStatus::NoAnswer, CallResult::NoAnswer),
        Ending::Hangup(HangupCause::Normal) => (CallStatus::Completed, CallResult::NotInterested),
        Ending::Hangup(HangupCause::Busy | HangupCause::NoAnswer) => {
            (CallStatus::NoAnswer, CallResult::NoAnswer)
        }
        Ending::Hangup(HangupCause::Rejected | HangupCause::MediaError) => {
            (CallStatus::Failed, CallResult::Failed)
        }
        Ending::DurationCap => (CallStatus::Failed, CallResult::Failed),
        Ending::Cancelled => (CallStatus::Cancelled, CallResult::Failed),
    }
}

enum AnswerOutcome {
    Answered,
    Ended(CallStatus, CallResult),
}

/// Wait for the remote end to answer, bounded by the ring timeout.
async fn wait_for_answer(
    ctx: &CallContext,
    call: CallId,
    events: &mut broadcast::Receiver<TelephonyEvent>,
    cancel: &CancellationToken,
) -> AnswerOutcome {
    let ring_timeout = Duration::from_secs(ctx.config.call.ring_timeout_secs);
    let deadline = tokio::time::sleep(ring_timeout);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                return AnswerOutcome::Ended(CallStatus::Cancelled, CallResult::Failed);
            }
            () = &mut deadline => {
                info!(%call, "ring timeout");
                return AnswerOutcome::Ended(CallStatus::NoAnswer, CallResult::NoAnswer);
            }
            event = events.recv() => match event {
                Ok(event) if event.call() == call => match event {
                    TelephonyEvent::Answered { .. } => return AnswerOutcome::Answered,
                    TelephonyEvent::HungUp { cause, .. } => {
                        let (status, result) = disposition(&Ending::Hangup(cause));
                        return AnswerOutcome::Ended(status, result);
                    }
                    _ => {}
                },
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(%call, skipped = n, "telephony event bus lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return AnswerOutcome::Ended(CallStatus::Failed, CallResult::Failed);
                }
            },
        }
    }
}

/// Open media, spawn the turn stage, run AMD, then the scenario.
#[allow(clippy::too_many_arguments)]
async fn setup_and_drive(
    ctx: &CallContext,
    call: CallId,
    contact: &Contact,
    record: &mut CallRecord,
    events: &mut broadcast::Receiver<TelephonyEvent>,
    cancel: &CancellationToken,
    stage_cancel: &CancellationToken,
) -> Result<Ending> {
    let frames = ctx.telephony.open_media(call).await?;
    let mut stage = spawn_turn_stage(
        call,
        ctx.config.turn.clone(),
        ctx.config.vad.clone(),
        ctx.config.amd.clone(),
        ctx.config.call.fallback_record_ms,
        ctx.transcriber.clone(),
        frames,
        stage_cancel.clone(),
    );
    ctx.telephony.record(call).await?;

    // AMD gate: machine/beep hang up, silence disposes as no-answer,
    // human and unknown both proceed (a false reject costs a lead, a
    // false accept costs one call).
    let verdict = match run_amd(ctx, call, events, &mut stage, cancel).await? {
        Ending2::Value(verdict) => verdict,
        Ending2::Ended(ending) => return Ok(ending),
    };
    match verdict {
        AmdVerdict::Machine | AmdVerdict::Beep => return Ok(Ending::Machine),
        AmdVerdict::Silence => return Ok(Ending::AmdSilence),
        AmdVerdict::Human | AmdVerdict::Unknown => {}
    }

    let engine = ScenarioEngine::new(
        ctx.scenario.clone(),
        ctx.corpus.clone(),
        ctx.classifier.clone(),
        ctx.config.objection.clone(),
        Duration::from_millis(ctx.config.call.classify_timeout_ms),
        contact.substitution_fields(),
    );
    run_scenario(ctx, call, record, engine, events, &mut stage, cancel).await
}

/// Run the AMD window and return its verdict.
async fn run_amd(
    ctx: &CallContext,
    call: CallId,
    events: &mut broadcast::Receiver<TelephonyEvent>,
    stage: &mut TurnStageHandle,
    cancel: &CancellationToken,
) -> Result<Ending2<AmdVerdict>> {
    set_mode(stage, TurnMode::Amd, None).await?;

    // The window is stream-position driven; guard with wall-clock slack
    // in case the media stream stalls.
    let guard = tokio::time::sleep(Duration::from_millis(ctx.config.turn.amd_window_ms * 2 + 2_000));
    tokio::pin!(guard);

    loop {
        tokio::select! {
            () = cancel.cancelled() => return Ok(Ending2::Ended(Ending::Cancelled)),
            () = &mut guard => {
                warn!(%call, "AMD window stalled, proceeding as unknown");
                return Ok(Ending2::Value(AmdVerdict::Unknown));
            }
            event = events.recv() => {
                if let Some(ending) = hangup_of(call, event) {
                    return Ok(Ending2::Ended(ending));
                }
            }
            turn = stage.events.recv() => match turn {
                Some(TurnEvent::AmdResult { verdict, .. }) => {
                    return Ok(Ending2::Value(verdict));
                }
                Some(_) => {}
                None => return Err(stage_gone()),
            },
        }
    }
}

/// Drive the scenario engine until a terminal step, a hangup, a
/// silence cap, the duration cap, or cancellation.
async fn run_scenario(
    ctx: &CallContext,
    call: CallId,
    record: &mut CallRecord,
    mut engine: ScenarioEngine,
    events: &mut broadcast::Receiver<TelephonyEvent>,
    stage: &mut TurnStageHandle,
    cancel: &CancellationToken,
) -> Result<Ending> {
    let max_duration = Duration::from_secs(ctx.config.call.max_call_duration_secs);
    let deadline = tokio::time::sleep(max_duration);
    tokio::pin!(deadline);

    let mut action = engine.start()?;
    loop {
        match action {
            EngineAction::Play {
                step,
                source,
                barge_in,
                listen_timeout_ms,
            } => {
                record.current_step = Some(step.clone());
                ctx.telephony.play(call, source).await?;
                set_mode(
                    stage,
                    if barge_in {
                        TurnMode::Playing
                    } else {
                        TurnMode::Idle
                    },
                    None,
                )
                .await?;

                // Playback phase: ends on completion or barge-in.
                let mut outcome: Option<ListenOutcome> = None;
                loop {
                    tokio::select! {
                        () = cancel.cancelled() => return Ok(Ending::Cancelled),
                        () = &mut deadline => {
                            warn!(%call, "max call duration reached mid-playback");
                            return Ok(Ending::DurationCap);
                        }
                        event = events.recv() => {
                            match filter_event(call, event) {
                                Some(TelephonyEvent::PlaybackFinished { .. }) => break,
                                Some(TelephonyEvent::HungUp { cause, .. }) => {
                                    return Ok(Ending::Hangup(cause));
                                }
                                _ => {}
                            }
                        }
                        turn = stage.events.recv() => match turn {
                            Some(TurnEvent::BargeIn { transcript }) => {
                                ctx.telephony.stop_play(call).await?;
                                ctx.telephony.stop_record(call).await?;
                                ctx.telephony.record(call).await?;
                                outcome = Some(ListenOutcome::Answer(transcript));
                                break;
                            }
                            Some(_) => {}
                            None => return Err(stage_gone()),
                        },
                    }
                }

                // Listen phase, unless a barge-in already produced the
                // answer or the step doesn't listen.
                if outcome.is_none() && let Some(timeout_ms) = listen_timeout_ms {
                    set_mode(stage, TurnMode::Waiting, Some(timeout_ms)).await?;
                    loop {
                        tokio::select! {
                            () = cancel.cancelled() => return Ok(Ending::Cancelled),
                            () = &mut deadline => {
                                warn!(%call, "max call duration reached mid-listen");
                                return Ok(Ending::DurationCap);
                            }
                            event = events.recv() => {
                                if let Some(TelephonyEvent::HungUp { cause, .. }) =
                                    filter_event(call, event)
                                {
                                    return Ok(Ending::Hangup(cause));
                                }
                            }
                            turn = stage.events.recv() => match turn {
                                Some(TurnEvent::Answer { transcript }) => {
                                    outcome = Some(ListenOutcome::Answer(transcript));
                                    break;
                                }
                                Some(TurnEvent::NoResponse { consecutive }) => {
                                    if consecutive >= ctx.config.turn.max_consecutive_timeouts {
                                        info!(%call, consecutive, "silence cap reached");
                                        return Ok(Ending::SilenceCap);
                                    }
                                    outcome = Some(ListenOutcome::NoResponse);
                                    break;
                                }
                                Some(_) => {}
                                None => return Err(stage_gone()),
                            },
                        }
                    }
                }

                set_mode(stage, TurnMode::Idle, None).await?;
                action = match outcome {
                    Some(outcome) => engine.on_listen(outcome).await?,
                    None => engine.resume()?,
                };
            }

            EngineAction::Finish {
                step,
                result,
                farewell,
            } => {
                record.current_step = Some(step);
                if let Some(farewell) = farewell {
                    ctx.telephony.play(call, farewell).await?;
                    wait_playback_end(call, events, cancel).await;
                }
                return Ok(Ending::Scenario(result));
            }
        }
    }
}

/// Let a farewell prompt finish, bounded; hangup/cancel cut it short.
async fn wait_playback_end(
    call: CallId,
    events: &mut broadcast::Receiver<TelephonyEvent>,
    cancel: &CancellationToken,
) {
    let guard = tokio::time::sleep(Duration::from_secs(30));
    tokio::pin!(guard);
    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            () = &mut guard => return,
            event = events.recv() => match filter_event(call, event) {
                Some(TelephonyEvent::PlaybackFinished { .. })
                | Some(TelephonyEvent::HungUp { .. })
                | None => return,
                _ => {}
            },
        }
    }
}

/// Either a value or an early call ending.
enum Ending2<T> {
    Value(T),
    Ended(Ending),
}

async fn set_mode(
    stage: &mut TurnStageHandle,
    mode: TurnMode,
    listen_timeout_ms: Option<u64>,
) -> Result<()> {
    stage
        .commands
        .send(TurnCommand::SetMode {
            mode,
            listen_timeout_ms,
        })
        .await
        .map_err(|_| stage_gone())
}

fn stage_gone() -> DialerError {
    DialerError::Channel("turn stage terminated".into())
}

/// Keep only this call's events; closed bus maps to `None`, lag is
/// logged and skipped.
fn filter_event(
    call: CallId,
    event: std::result::Result<TelephonyEvent, broadcast::error::RecvError>,
) -> Option<TelephonyEvent> {
    match event {
        Ok(event) if event.call() == call => Some(event),
        Ok(_) => None,
        Err(broadcast::error::RecvError::Lagged(n)) => {
            warn!(%call, skipped = n, "telephony event bus lagged");
            None
        }
        Err(broadcast::error::RecvError::Closed) => Some(TelephonyEvent::HungUp {
            call,
            cause: HangupCause::MediaError,
        }),
    }
}

/// Check a pre-filtered event stream item for a hangup.
fn hangup_of(
    call: CallId,
    event: std::result::Result<TelephonyEvent, broadcast::error::RecvError>,
) -> Option<Ending> {
    match filter_event(call, event) {
        Some(TelephonyEvent::HungUp { cause, .. }) => Some(Ending::Hangup(cause)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;
    use crate::audio::AudioFrame;
    use crate::telephony::AudioSource;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use tokio::sync::mpsc;

    /// Publishes `Answered` inside `originate`, before the handle is
    /// even returned; media then fails so the call ends quickly.
    struct InstantAnswerTelephony {
        events: broadcast::Sender<TelephonyEvent>,
    }

    #[async_trait]
    impl TelephonyControl for InstantAnswerTelephony {
        async fn originate(&self, _number: &str, _scenario_id: &str) -> Result<CallId> {
            let call = CallId::new();
            let _ = self.events.send(TelephonyEvent::Answered { call });
            Ok(call)
        }

        async fn play(&self, _call: CallId, _source: AudioSource) -> Result<()> {
            Ok(())
        }

        async fn stop_play(&self, _call: CallId) -> Result<()> {
            Ok(())
        }

        async fn record(&self, _call: CallId) -> Result<()> {
            Ok(())
        }

        async fn stop_record(&self, _call: CallId) -> Result<()> {
            Ok(())
        }

        async fn open_media(&self, _call: CallId) -> Result<mpsc::Receiver<AudioFrame>> {
            Err(DialerError::Telephony("no media path".into()))
        }

        async fn hangup(&self, _call: CallId) -> Result<()> {
            Ok(())
        }

        fn subscribe(&self) -> broadcast::Receiver<TelephonyEvent> {
            self.events.subscribe()
        }
    }

    fn ctx(telephony: Arc<dyn TelephonyControl>) -> Arc<CallContext> {
        let world = crate::sim::SimWorld::new(HashMap::new());
        let scenario = ScenarioDefinition::from_json_str(
            r#"{
              "id": "s",
              "name": "s",
              "theme": "generic",
              "entry_step": "bye",
              "decline_step": "bye",
              "steps": {
                "bye": {
                  "kind": "audio",
                  "prompt": "goodbye",
                  "is_final": true,
                  "result": "not_interested",
                  "barge_in": false
                }
              }
            }"#,
        )
        .expect("scenario is valid");
        Arc::new(CallContext {
            config: DialerConfig::default(),
            telephony,
            transcriber: world.transcriber.clone(),
            classifier: world.classifier.clone(),
            scenario: Arc::new(scenario),
            corpus: Arc::new(ObjectionCorpus::empty("generic")),
        })
    }

    // An answer published during the originate round-trip must be seen;
    // the call is answered, not rung out, and the record walks
    // Originating -> Ringing -> InProgress.
    #[tokio::test(start_paused = true)]
    async fn answer_raced_with_origination_is_not_lost() {
        let (events, _) = broadcast::channel(16);
        let ctx = ctx(Arc::new(InstantAnswerTelephony { events }));
        let record = run_call(
            ctx,
            Contact::new("+15551001"),
            None,
            0,
            CancellationToken::new(),
        )
        .await;

        assert_ne!(record.status, CallStatus::NoAnswer);
        assert!(record.answered_at.is_some());
        let statuses: Vec<CallStatus> = record.history.iter().map(|(s, _)| *s).collect();
        assert!(statuses.contains(&CallStatus::Ringing));
        assert!(statuses.contains(&CallStatus::InProgress));
    }
}
