//! End-to-end campaign tests against the in-process simulation doubles.
//!
//! Everything below runs on paused tokio time: personas, playback, ring
//! timeouts, and retry backoffs are all timer-driven, so whole campaigns
//! complete in milliseconds of wall clock.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use dialflow::DialerError;
use dialflow::call::CallResult;
use dialflow::call::controller::CallContext;
use dialflow::campaign::scheduler::{CampaignHandle, spawn_campaign};
use dialflow::campaign::{CampaignRecord, CampaignStatus, Contact, RetryPolicy};
use dialflow::config::DialerConfig;
use dialflow::scenario::{ObjectionCorpus, ScenarioDefinition};
use dialflow::sim::{Persona, SimWorld};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Intro, three weighted questions, a score gate, objection handler.
fn scenario() -> ScenarioDefinition {
    ScenarioDefinition::from_json_str(
        r#"{
          "id": "qual",
          "name": "qualification",
          "theme": "solar",
          "entry_step": "intro",
          "decline_step": "goodbye_decline",
          "steps": {
            "intro": {
              "kind": "audio",
              "prompt": "hi {name}, do you have a moment?",
              "listen_timeout_ms": 10000,
              "transitions": {
                "affirm": "q1",
                "deny": "goodbye_decline",
                "objection": "objections"
              },
              "wildcard": "q1"
            },
            "q1": {
              "kind": "audio",
              "prompt": "do you own your home?",
              "listen_timeout_ms": 10000,
              "transitions": {
                "affirm": "q2",
                "deny": "goodbye_decline",
                "objection": "objections"
              },
              "wildcard": "q2"
            },
            "q2": {
              "kind": "audio",
              "prompt": "is your bill above one hundred dollars?",
              "listen_timeout_ms": 10000,
              "wildcard": "q3"
            },
            "q3": {
              "kind": "audio",
              "prompt": "open to a follow-up call?",
              "listen_timeout_ms": 10000,
              "wildcard": "gate"
            },
            "gate": {
              "kind": "audio",
              "prompt": "one moment",
              "wildcard": "goodbye_decline"
            },
            "objections": {
              "kind": "objection_handler",
              "wildcard": "goodbye_decline"
            },
            "qualified_close": {
              "kind": "audio",
              "prompt": "wonderful, goodbye {name}",
              "is_final": true,
              "result": "lead",
              "barge_in": false
            },
            "goodbye_decline": {
              "kind": "audio",
              "prompt": "no problem, goodbye",
              "is_final": true,
              "result": "not_interested",
              "barge_in": false
            }
          },
          "qualification": {
            "weights": { "q1": 40, "q2": 30, "q3": 30 },
            "threshold": 70,
            "gate_step": "gate",
            "lead_step": "qualified_close",
            "decline_step": "goodbye_decline"
          }
        }"#,
    )
    .expect("scenario is valid")
}

fn corpus() -> ObjectionCorpus {
    ObjectionCorpus::from_json_str(
        r#"{
          "theme": "solar",
          "entries": [
            {
              "label": "too_expensive",
              "patterns": ["it is too expensive", "i cannot afford it"],
              "rebuttal_audio": "rebuttal_price.wav"
            }
          ]
        }"#,
    )
    .expect("corpus is valid")
}

fn context(world: &SimWorld) -> Arc<CallContext> {
    let mut config = DialerConfig::default();
    config.call.ring_timeout_secs = 5;
    Arc::new(CallContext {
        config,
        telephony: world.telephony.clone(),
        transcriber: world.transcriber.clone(),
        classifier: world.classifier.clone(),
        scenario: Arc::new(scenario()),
        corpus: Arc::new(corpus()),
    })
}

fn contact(number: &str, name: &str) -> Contact {
    let mut c = Contact::new(number);
    c.name = Some(name.to_owned());
    c
}

fn no_retry() -> RetryPolicy {
    RetryPolicy {
        enabled: false,
        ..RetryPolicy::default()
    }
}

async fn run_to_completion(handle: &CampaignHandle) {
    handle.start().await.expect("start");
    handle.wait().await.expect("wait");
}

#[tokio::test(start_paused = true)]
async fn mixed_campaign_settles_every_contact() {
    let world = SimWorld::new(HashMap::from([
        (
            "+15550201".to_owned(),
            Persona::human(&["yes", "yes", "yes", "yes"]),
        ),
        ("+15550202".to_owned(), Persona::human(&["yes", "no"])),
        ("+15550203".to_owned(), Persona::voicemail()),
        ("+15550204".to_owned(), Persona::no_answer()),
        // Objects at q1, accepts the canned rebuttal, then qualifies.
        // The extra "yes" is spoken over the replayed q1 prompt and is
        // a discarded backchannel.
        (
            "+15550205".to_owned(),
            Persona::human(&["yes", "it is too expensive", "yes", "yes", "yes", "yes"]),
        ),
        ("+15550206".to_owned(), Persona::busy_line()),
    ]));
    let ctx = context(&world);

    let retry = RetryPolicy {
        enabled: true,
        max_retries: 1,
        retry_delay_secs: 2,
        eligible_results: vec![CallResult::NoAnswer],
    };
    let record = CampaignRecord::new("qual", 2, 100, retry);
    let contacts = vec![
        contact("+15550201", "Ada"),
        contact("+15550202", "Bert"),
        contact("+15550203", "Cleo"),
        contact("+15550204", "Dana"),
        contact("+15550205", "Eli"),
        contact("+15550206", "Fern"),
    ];

    let handle = spawn_campaign(record, contacts, ctx, CancellationToken::new());
    run_to_completion(&handle).await;

    let report = handle.status().await.expect("status");
    assert_eq!(report.record.status, CampaignStatus::Completed);
    assert!(report.record.ended_at.is_some());
    assert_eq!(report.record.counters.completed, 6);
    assert_eq!(report.record.counters.pending, 0);
    assert_eq!(report.record.counters.in_progress, 0);

    let by_number: HashMap<_, _> = report.settled.iter().cloned().collect();
    assert_eq!(by_number["+15550201"], CallResult::Lead);
    assert_eq!(by_number["+15550202"], CallResult::NotInterested);
    assert_eq!(by_number["+15550203"], CallResult::AnsweringMachine);
    assert_eq!(by_number["+15550204"], CallResult::NoAnswer);
    assert_eq!(by_number["+15550205"], CallResult::Lead);
    assert_eq!(by_number["+15550206"], CallResult::NoAnswer);

    // The no-answer and busy contacts were each retried exactly once.
    assert_eq!(world.telephony.origination_count(), 8);
}

#[tokio::test(start_paused = true)]
async fn concurrency_cap_is_never_exceeded() {
    let answers = ["yes", "yes", "yes", "yes"];
    let personas: HashMap<String, Persona> = (0..6)
        .map(|i| (format!("+1555030{i}"), Persona::human(&answers)))
        .collect();
    let world = SimWorld::new(personas);
    let ctx = context(&world);

    let record = CampaignRecord::new("qual", 2, 100, no_retry());
    let contacts = (0..6)
        .map(|i| contact(&format!("+1555030{i}"), "Pat"))
        .collect();

    let handle = spawn_campaign(record, contacts, ctx, CancellationToken::new());
    run_to_completion(&handle).await;

    let report = handle.status().await.expect("status");
    assert_eq!(report.record.status, CampaignStatus::Completed);
    assert_eq!(report.settled.len(), 6);
    assert!(
        world.telephony.peak_live_calls() <= 2,
        "peak live calls {} exceeded the cap",
        world.telephony.peak_live_calls()
    );
    assert!(
        report
            .settled
            .iter()
            .all(|(_, result)| *result == CallResult::Lead)
    );
}

#[tokio::test(start_paused = true)]
async fn pause_halts_admissions_and_resume_reopens() {
    let personas: HashMap<String, Persona> = (0..4)
        .map(|i| (format!("+1555040{i}"), Persona::no_answer()))
        .collect();
    let world = SimWorld::new(personas);
    let ctx = context(&world);

    // Cap of one: at most a single call can slip in before the pause
    // command lands.
    let record = CampaignRecord::new("qual", 1, 0, no_retry());
    let contacts = (0..4)
        .map(|i| contact(&format!("+1555040{i}"), "Pat"))
        .collect();

    let handle = spawn_campaign(record, contacts, ctx, CancellationToken::new());
    handle.start().await.expect("start");
    handle.pause().await.expect("pause");

    // Long enough for every contact to have rung out if admissions had
    // continued.
    tokio::time::sleep(Duration::from_secs(60)).await;
    let report = handle.status().await.expect("status");
    assert_eq!(report.record.status, CampaignStatus::Paused);
    assert!(report.settled.len() <= 1);
    assert!(report.record.counters.pending >= 3);

    handle.resume().await.expect("resume");
    handle.wait().await.expect("wait");

    let report = handle.status().await.expect("status");
    assert_eq!(report.record.status, CampaignStatus::Completed);
    assert_eq!(report.settled.len(), 4);
    assert!(
        report
            .settled
            .iter()
            .all(|(_, result)| *result == CallResult::NoAnswer)
    );
}

#[tokio::test(start_paused = true)]
async fn stop_cancels_pending_and_leaves_in_flight_to_finish() {
    let personas: HashMap<String, Persona> = (0..4)
        .map(|i| (format!("+1555050{i}"), Persona::no_answer()))
        .collect();
    let world = SimWorld::new(personas);
    let ctx = context(&world);

    let record = CampaignRecord::new("qual", 1, 0, no_retry());
    let contacts = (0..4)
        .map(|i| contact(&format!("+1555050{i}"), "Pat"))
        .collect();

    let handle = spawn_campaign(record, contacts, ctx, CancellationToken::new());
    handle.start().await.expect("start");

    // Mid-first-ring: one call is in flight, three are still queued.
    tokio::time::sleep(Duration::from_secs(1)).await;
    handle.stop().await.expect("stop");
    handle.wait().await.expect("wait");

    let report = handle.status().await.expect("status");
    assert_eq!(report.record.status, CampaignStatus::Cancelled);
    assert_eq!(report.record.counters.pending, 0);
    assert_eq!(report.record.counters.in_progress, 0);
    // Only the in-flight call settled; the queued ones were cancelled
    // before origination.
    assert!(report.settled.len() <= 1);
    assert!(world.telephony.origination_count() <= 1);
}

#[tokio::test(start_paused = true)]
async fn lifecycle_commands_are_rejected_from_wrong_states() {
    let world = SimWorld::new(HashMap::new());
    let ctx = context(&world);
    let record = CampaignRecord::new("qual", 1, 0, no_retry());
    let handle = spawn_campaign(
        record,
        vec![contact("+15550601", "Pat")],
        ctx,
        CancellationToken::new(),
    );

    // Pending: only start and stop are legal.
    for (op, err) in [
        ("pause", handle.pause().await),
        ("resume", handle.resume().await),
    ] {
        match err {
            Err(DialerError::CampaignState {
                operation, status, ..
            }) => {
                assert_eq!(operation, op);
                assert_eq!(status, CampaignStatus::Pending);
            }
            other => panic!("{op} from pending: unexpected {other:?}"),
        }
    }

    handle.start().await.expect("start");
    match handle.start().await {
        Err(DialerError::CampaignState { operation, .. }) => assert_eq!(operation, "start"),
        other => panic!("double start: unexpected {other:?}"),
    }

    handle.wait().await.expect("wait");

    // Terminal: every lifecycle command is rejected.
    assert!(handle.start().await.is_err());
    assert!(handle.pause().await.is_err());
    assert!(handle.resume().await.is_err());
    match handle.stop().await {
        Err(DialerError::CampaignState {
            operation, status, ..
        }) => {
            assert_eq!(operation, "stop");
            assert!(status.is_terminal());
        }
        other => panic!("stop after terminal: unexpected {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn streaming_outage_degrades_to_batch_transcription() {
    let personas = HashMap::from([(
        "+15550701".to_owned(),
        Persona::human(&["mm hm", "mm hm", "mm hm", "mm hm"]),
    )]);
    // No streaming: the turn stage batch-transcribes each window; the
    // scripted batch responses drive the scenario.
    let world = SimWorld::new_with(personas, |_, transcriber| {
        transcriber.set_streaming(false);
    });
    world.transcriber.push_batch_response("hello");
    for _ in 0..4 {
        world.transcriber.push_batch_response("yes");
    }
    let ctx = context(&world);

    let record = CampaignRecord::new("qual", 1, 0, no_retry());
    let handle = spawn_campaign(
        record,
        vec![contact("+15550701", "Pat")],
        ctx,
        CancellationToken::new(),
    );
    run_to_completion(&handle).await;

    let report = handle.status().await.expect("status");
    assert_eq!(report.record.status, CampaignStatus::Completed);
    assert_eq!(report.settled, vec![("+15550701".to_owned(), CallResult::Lead)]);
}

#[tokio::test(start_paused = true)]
async fn sustained_interruption_barges_in_and_is_heard() {
    let personas = HashMap::from([(
        "+15550801".to_owned(),
        Persona {
            interrupt: Some(("no i am not interested at all".to_owned(), 4_000)),
            ..Persona::human(&[])
        },
    )]);
    let world = SimWorld::new(personas);
    let ctx = {
        let mut config = DialerConfig::default();
        config.call.ring_timeout_secs = 5;
        let mut scenario = scenario();
        // A long intro so the interruption happens mid-playback.
        scenario.steps.get_mut("intro").unwrap().prompt = Some(
            "hello this is a rather long introduction about the solar rebate \
             program and its many documented benefits for homeowners like you"
                .to_owned(),
        );
        Arc::new(CallContext {
            config,
            telephony: world.telephony.clone(),
            transcriber: world.transcriber.clone(),
            classifier: world.classifier.clone(),
            scenario: Arc::new(scenario),
            corpus: Arc::new(corpus()),
        })
    };

    let record = CampaignRecord::new("qual", 1, 0, no_retry());
    let handle = spawn_campaign(
        record,
        vec![contact("+15550801", "Pat")],
        ctx,
        CancellationToken::new(),
    );
    run_to_completion(&handle).await;

    // The barged-in "no i am not interested" classifies as a deny at
    // the intro, routing straight to the decline farewell.
    let report = handle.status().await.expect("status");
    assert_eq!(
        report.settled,
        vec![("+15550801".to_owned(), CallResult::NotInterested)]
    );
}
