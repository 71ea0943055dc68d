//! Run a scripted campaign end to end against the in-process
//! simulation doubles and print the final report.
//!
//! ```sh
//! RUST_LOG=dialflow=info cargo run --bin dialflow-sim
//! ```

use anyhow::Context;
use dialflow::call::controller::CallContext;
use dialflow::campaign::scheduler::spawn_campaign;
use dialflow::campaign::{CampaignRecord, Contact, RetryPolicy};
use dialflow::config::DialerConfig;
use dialflow::scenario::{ObjectionCorpus, ScenarioDefinition};
use dialflow::sim::{Persona, SimWorld};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// A small solar-qualification scenario: intro, three weighted
/// questions, a score gate, and an objection handler.
const SCENARIO: &str = r#"{
  "id": "solar_qualification",
  "name": "Solar rebate qualification",
  "theme": "solar",
  "entry_step": "intro",
  "decline_step": "goodbye_decline",
  "max_autonomous_turns": 2,
  "steps": {
    "intro": {
      "kind": "audio",
      "prompt": "hi {name}, this is mia calling from sunline energy about the solar rebate program, do you have a quick moment?",
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
      "prompt": "great, first question, do you own your home?",
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
      "prompt": "is your monthly electric bill above one hundred dollars?",
      "listen_timeout_ms": 10000,
      "transitions": { "objection": "objections" },
      "wildcard": "q3"
    },
    "q3": {
      "kind": "audio",
      "prompt": "would you be open to a short follow-up call with one of our energy advisors?",
      "listen_timeout_ms": 10000,
      "transitions": { "objection": "objections" },
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
      "prompt": "wonderful, one of our advisors will call you tomorrow, thank you {name}, goodbye",
      "is_final": true,
      "result": "lead",
      "barge_in": false
    },
    "goodbye_decline": {
      "kind": "audio",
      "prompt": "no problem, thanks for your time, goodbye",
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
}"#;

const CORPUS: &str = r#"{
  "theme": "solar",
  "entries": [
    {
      "label": "too_expensive",
      "patterns": ["it is too expensive", "i cannot afford it"],
      "rebuttal_audio": "rebuttal_price.wav"
    },
    {
      "label": "no_time",
      "patterns": ["i do not have time for this"],
      "rebuttal_audio": "rebuttal_time.wav"
    }
  ]
}"#;

fn personas() -> HashMap<String, Persona> {
    HashMap::from([
        // Qualifies on all three questions.
        (
            "+15550101".to_owned(),
            Persona::human(&["yes sure", "yes i do", "yes it is", "yes definitely"]),
        ),
        // Renter: deny on q1 routes to the decline farewell.
        (
            "+15550102".to_owned(),
            Persona::human(&["yes", "no i rent"]),
        ),
        // Voicemail greeting; disposed by the machine gate.
        ("+15550103".to_owned(), Persona::voicemail()),
        // Rings out; retried once by policy.
        ("+15550104".to_owned(), Persona::no_answer()),
        // Raises a price objection at q1, accepts the rebuttal.
        (
            "+15550105".to_owned(),
            Persona::human(&[
                "yes",
                "it is just too expensive for me",
                "yes i do own it",
                "yes",
                "yes",
                "yes please",
            ]),
        ),
        // Busy line; retried once by policy.
        ("+15550106".to_owned(), Persona::busy_line()),
    ])
}

fn contacts() -> Vec<Contact> {
    let named = [
        ("+15550101", "Ada"),
        ("+15550102", "Bert"),
        ("+15550103", "Cleo"),
        ("+15550104", "Dana"),
        ("+15550105", "Eli"),
        ("+15550106", "Fern"),
    ];
    named
        .into_iter()
        .map(|(number, name)| {
            let mut contact = Contact::new(number);
            contact.name = Some(name.to_owned());
            contact
        })
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("dialflow=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let scenario = ScenarioDefinition::from_json_str(SCENARIO).context("load scenario")?;
    let corpus = ObjectionCorpus::from_json_str(CORPUS).context("load objection corpus")?;

    let mut config = DialerConfig::default();
    // Keep the demo short: rings give up after five seconds and retries
    // come back quickly.
    config.call.ring_timeout_secs = 5;

    let world = SimWorld::new(personas());
    let ctx = Arc::new(CallContext {
        config,
        telephony: world.telephony.clone(),
        transcriber: world.transcriber.clone(),
        classifier: world.classifier.clone(),
        scenario: Arc::new(scenario),
        corpus: Arc::new(corpus),
    });

    let retry = RetryPolicy {
        enabled: true,
        max_retries: 1,
        retry_delay_secs: 3,
        eligible_results: vec![dialflow::call::CallResult::NoAnswer],
    };
    let record = CampaignRecord::new("solar_qualification", 2, 250, retry);

    let shutdown = CancellationToken::new();
    let handle = spawn_campaign(record, contacts(), ctx, shutdown.clone());
    handle.start().await.context("start campaign")?;
    handle.wait().await.context("wait for campaign")?;

    let report = handle.status().await.context("fetch report")?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
