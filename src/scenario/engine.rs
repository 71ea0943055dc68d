//! Per-call scenario cursor.
//!
//! The engine owns the conversational state of one call: current step,
//! accumulated qualification score, the autonomous-turn budget, and the
//! rolling classifier context. It is driven by the call controller —
//! one finalized transcript (or no-response) per step invocation, never
//! concurrently — and answers with the next action to execute.

use crate::call::CallResult;
use crate::config::ObjectionMatchConfig;
use crate::error::{DialerError, Result};
use crate::intent::{ConversationContext, Intent, IntentClassifier, classify_with_timeout};
use crate::scenario::definition::{ScenarioDefinition, StepDefinition, StepKind, substitute};
use crate::scenario::objection::ObjectionCorpus;
use crate::telephony::AudioSource;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// What the controller hands back after a listen window.
#[derive(Debug, Clone)]
pub enum ListenOutcome {
    /// A finalized transcript (end-of-speech or barge-in).
    Answer(String),
    /// The listen window elapsed with no speech.
    NoResponse,
}

/// Next action for the call controller to execute.
#[derive(Debug, Clone)]
pub enum EngineAction {
    /// Play a prompt, then listen if `listen_timeout_ms` is set, else
    /// call [`ScenarioEngine::resume`] once playback finishes.
    Play {
        /// Step being executed.
        step: String,
        /// What to play.
        source: AudioSource,
        /// Whether the prospect may barge in.
        barge_in: bool,
        /// Listen window after playback, if the step listens.
        listen_timeout_ms: Option<u64>,
    },
    /// The rail reached a terminal step: play the farewell (if any),
    /// then dispose the call with `result`.
    Finish {
        /// Terminal step name.
        step: String,
        /// Fixed result tag of the terminal step.
        result: CallResult,
        /// Goodbye prompt to play before hangup.
        farewell: Option<AudioSource>,
    },
}

/// Finite-state cursor over one scenario for one call.
pub struct ScenarioEngine {
    scenario: Arc<ScenarioDefinition>,
    corpus: Arc<ObjectionCorpus>,
    classifier: Arc<dyn IntentClassifier>,
    match_config: ObjectionMatchConfig,
    classify_timeout: Duration,
    contact_fields: HashMap<String, String>,
    context: ConversationContext,
    current_step: String,
    /// Accumulated qualification score.
    score: u32,
    /// Objection/rebuttal cycles taken so far; monotonically
    /// non-decreasing within a call.
    autonomous_turns: u32,
    /// Where to continue after a rebuttal playback finishes.
    pending_return: Option<String>,
    /// Prompt text of the last `Play`, for classifier context.
    last_prompt: String,
    /// Set once a terminal step is reached; the engine never leaves it.
    finished: Option<(String, CallResult)>,
}

impl ScenarioEngine {
    /// Create a cursor positioned at the scenario's entry step.
    pub fn new(
        scenario: Arc<ScenarioDefinition>,
        corpus: Arc<ObjectionCorpus>,
        classifier: Arc<dyn IntentClassifier>,
        match_config: ObjectionMatchConfig,
        classify_timeout: Duration,
        contact_fields: HashMap<String, String>,
    ) -> Self {
        let entry = scenario.entry_step.clone();
        Self {
            scenario,
            corpus,
            classifier,
            match_config,
            classify_timeout,
            contact_fields,
            context: ConversationContext::new(),
            current_step: entry,
            score: 0,
            autonomous_turns: 0,
            pending_return: None,
            last_prompt: String::new(),
            finished: None,
        }
    }

    /// Step the cursor currently points at.
    pub fn current_step(&self) -> &str {
        &self.current_step
    }

    /// Accumulated qualification score.
    pub fn score(&self) -> u32 {
        self.score
    }

    /// Objection cycles taken this call.
    pub fn autonomous_turns(&self) -> u32 {
        self.autonomous_turns
    }

    /// First action of the call: execute the entry step.
    ///
    /// # Errors
    ///
    /// Returns an error if the scenario references a missing step
    /// (prevented by load-time validation).
    pub fn start(&mut self) -> Result<EngineAction> {
        let entry = self.scenario.entry_step.clone();
        self.enter(entry)
    }

    /// Feed the outcome of a listen window and get the next action.
    ///
    /// # Errors
    ///
    /// Returns an error only on scenario inconsistencies that load-time
    /// validation should have caught.
    pub async fn on_listen(&mut self, outcome: ListenOutcome) -> Result<EngineAction> {
        if let Some((step, result)) = &self.finished {
            // Terminal steps are absorbing.
            return Ok(EngineAction::Finish {
                step: step.clone(),
                result: *result,
                farewell: None,
            });
        }

        let (intent, transcript) = match outcome {
            ListenOutcome::NoResponse => (Intent::Silence, String::new()),
            ListenOutcome::Answer(text) => {
                let intent = classify_with_timeout(
                    self.classifier.as_ref(),
                    &text,
                    &self.context,
                    self.classify_timeout,
                )
                .await;
                (intent, text)
            }
        };
        self.context.push(&self.last_prompt, &transcript);
        info!(
            step = %self.current_step,
            %intent,
            "answer classified: \"{transcript}\""
        );

        let step = self.current_step_def()?;

        if intent == Intent::Objection {
            return self.handle_objection(&transcript).await;
        }

        // Refusal on a determinant step disqualifies immediately,
        // regardless of the transition table.
        if intent == Intent::Deny && step.is_determinant {
            debug!(step = %self.current_step, "determinant refusal, short-circuiting");
            let decline = self.scenario.decline_step.clone();
            return self.enter(decline);
        }

        if intent == Intent::Affirm
            && let Some(q) = &self.scenario.qualification
            && let Some(weight) = q.weights.get(&self.current_step)
        {
            self.score += weight;
            debug!(step = %self.current_step, weight, score = self.score, "score credited");
        }

        let target = self.transition_target(&step, intent);
        self.enter(target)
    }

    /// Continue after a playback that had no listen window (rebuttals
    /// and auto-advancing statement steps).
    ///
    /// # Errors
    ///
    /// Returns an error on scenario inconsistencies.
    pub fn resume(&mut self) -> Result<EngineAction> {
        if let Some((step, result)) = &self.finished {
            return Ok(EngineAction::Finish {
                step: step.clone(),
                result: *result,
                farewell: None,
            });
        }
        if let Some(ret) = self.pending_return.take() {
            return self.enter(ret);
        }
        let step = self.current_step_def()?;
        let target = step
            .wildcard
            .clone()
            .unwrap_or_else(|| self.scenario.decline_step.clone());
        self.enter(target)
    }

    /// Objection flow: canned rebuttal if the corpus matches, else a
    /// generative one, bounded by the autonomous-turn budget.
    async fn handle_objection(&mut self, transcript: &str) -> Result<EngineAction> {
        if self.autonomous_turns >= self.scenario.max_autonomous_turns {
            info!(
                turns = self.autonomous_turns,
                "autonomous-turn budget exhausted, declining"
            );
            let decline = self.scenario.decline_step.clone();
            return self.enter(decline);
        }

        // Where the rail continues after the rebuttal: the handler's
        // configured success step, or back to the step that triggered
        // the objection.
        let step = self.current_step_def()?;
        let handler_name = self
            .transition_chain(&step, Intent::Objection)
            .filter(|name| {
                self.scenario
                    .step(name)
                    .is_some_and(|s| s.kind == StepKind::ObjectionHandler)
            });
        let Some(handler_name) = handler_name else {
            // No handler wired for this step; route like any other
            // unhandled intent.
            let target = self.transition_target(&step, Intent::Objection);
            return self.enter(target);
        };
        let handler = self
            .scenario
            .step(&handler_name)
            .ok_or_else(|| missing_step(&self.scenario.id, &handler_name))?
            .clone();
        self.pending_return = Some(
            handler
                .on_handled
                .clone()
                .unwrap_or_else(|| self.current_step.clone()),
        );
        self.current_step = handler_name.clone();

        if let Some(m) = self.corpus.best_match(transcript, &self.match_config) {
            info!(label = %m.entry.label, score = m.score, "canned rebuttal");
            // The budget counts objections actually rebutted.
            self.autonomous_turns += 1;
            self.last_prompt = format!("[rebuttal:{}]", m.entry.label);
            return Ok(EngineAction::Play {
                step: handler_name,
                source: AudioSource::Prerecorded(m.entry.rebuttal_audio.clone()),
                barge_in: true,
                listen_timeout_ms: None,
            });
        }

        match self
            .classifier
            .improvise_rebuttal(transcript, &self.context)
            .await
        {
            Ok(text) => {
                info!("generative rebuttal: \"{text}\"");
                self.autonomous_turns += 1;
                self.last_prompt = text.clone();
                Ok(EngineAction::Play {
                    step: handler_name,
                    source: AudioSource::Synthesized(text),
                    barge_in: true,
                    listen_timeout_ms: None,
                })
            }
            Err(e) => {
                warn!("rebuttal improvisation failed, falling through: {e}");
                self.pending_return = None;
                let target = handler
                    .wildcard
                    .clone()
                    .unwrap_or_else(|| self.scenario.decline_step.clone());
                self.enter(target)
            }
        }
    }

    /// Move the cursor to `name`, resolving the qualification gate and
    /// skipping over misrouted handler steps, and build the action.
    fn enter(&mut self, name: String) -> Result<EngineAction> {
        let mut name = name;
        let mut skipped: Vec<String> = Vec::new();
        let step = loop {
            // The gate step never plays audio: it compares the score
            // and routes to a branch.
            if let Some(q) = &self.scenario.qualification
                && name == q.gate_step
            {
                let qualified = self.score >= q.threshold;
                name = if qualified {
                    q.lead_step.clone()
                } else {
                    q.decline_step.clone()
                };
                info!(
                    score = self.score,
                    threshold = q.threshold,
                    qualified,
                    "qualification gate resolved"
                );
            }

            let step = self
                .scenario
                .step(&name)
                .ok_or_else(|| missing_step(&self.scenario.id, &name))?;
            if step.kind != StepKind::ObjectionHandler {
                break step;
            }
            // Handler steps are only meaningful via the objection flow:
            // skip through their wildcards, rejecting cycles.
            if skipped.contains(&name) {
                return Err(DialerError::ScenarioInvalid {
                    scenario: self.scenario.id.clone(),
                    defects: vec![format!("objection handler wildcard cycle at '{name}'")],
                });
            }
            skipped.push(name.clone());
            name = step
                .wildcard
                .clone()
                .unwrap_or_else(|| self.scenario.decline_step.clone());
        };

        self.current_step = name.clone();
        let source = self.prompt_source(step);
        self.last_prompt = match &source {
            Some(AudioSource::Synthesized(text)) => text.clone(),
            Some(AudioSource::Prerecorded(audio)) => format!("[audio:{audio}]"),
            None => String::new(),
        };

        if step.is_final {
            let result = step.result.ok_or_else(|| DialerError::ScenarioInvalid {
                scenario: self.scenario.id.clone(),
                defects: vec![format!("final step '{name}' has no result tag")],
            })?;
            self.finished = Some((name.clone(), result));
            return Ok(EngineAction::Finish {
                step: name,
                result,
                farewell: source,
            });
        }

        Ok(EngineAction::Play {
            step: name,
            source: source.ok_or_else(|| DialerError::ScenarioInvalid {
                scenario: self.scenario.id.clone(),
                defects: vec![format!("step has neither audio nor prompt")],
            })?,
            barge_in: step.barge_in,
            listen_timeout_ms: step.listen_timeout_ms,
        })
    }

    /// Explicit transition for `intent`, or the wildcard, if either is
    /// defined on the step.
    fn transition_chain(&self, step: &StepDefinition, intent: Intent) -> Option<String> {
        step.transitions
            .get(&intent)
            .cloned()
            .or_else(|| step.wildcard.clone())
    }

    /// Total transition function: explicit entry, wildcard, scenario
    /// not-understood step, decline step — never an unhandled case.
    fn transition_target(&self, step: &StepDefinition, intent: Intent) -> String {
        self.transition_chain(step, intent)
            .or_else(|| self.scenario.not_understood_step.clone())
            .unwrap_or_else(|| self.scenario.decline_step.clone())
    }

    fn current_step_def(&self) -> Result<StepDefinition> {
        self.scenario
            .step(&self.current_step)
            .cloned()
            .ok_or_else(|| missing_step(&self.scenario.id, &self.current_step))
    }

    /// Audio selection: pre-recorded wins; otherwise the prompt
    /// template is substituted with contact fields and synthesized.
    fn prompt_source(&self, step: &StepDefinition) -> Option<AudioSource> {
        if let Some(audio) = &step.audio {
            return Some(AudioSource::Prerecorded(audio.clone()));
        }
        step.prompt
            .as_ref()
            .map(|template| AudioSource::Synthesized(substitute(template, &self.contact_fields)))
    }
}

fn missing_step(scenario: &str, step: &str) -> DialerError {
    DialerError::ScenarioInvalid {
        scenario: scenario.to_owned(),
        defects: vec![format!("referenced step '{step}' does not exist")],
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;
    use crate::scenario::definition::QualificationTable;
    use crate::scenario::objection::ObjectionEntry;
    use async_trait::async_trait;

    /// Deterministic keyword classifier for engine tests.
    struct RuleClassifier;

    #[async_trait]
    impl IntentClassifier for RuleClassifier {
        async fn classify(&self, transcript: &str, _: &ConversationContext) -> Result<Intent> {
            let t = transcript.to_lowercase();
            Ok(if t.is_empty() {
                Intent::Silence
            } else if t.contains("expensive") || t.contains("no time") {
                Intent::Objection
            } else if t.starts_with("yes") {
                Intent::Affirm
            } else if t.starts_with("no") {
                Intent::Deny
            } else if t.ends_with('?') {
                Intent::Question
            } else {
                Intent::NotUnderstood
            })
        }

        async fn improvise_rebuttal(&self, _: &str, _: &ConversationContext) -> Result<String> {
            Ok("let me put that in perspective".to_owned())
        }
    }

    fn step(audio: &str) -> StepDefinition {
        StepDefinition {
            kind: StepKind::Audio,
            audio: Some(audio.to_owned()),
            prompt: None,
            transitions: HashMap::new(),
            wildcard: None,
            is_determinant: false,
            is_final: false,
            result: None,
            listen_timeout_ms: Some(10_000),
            barge_in: true,
            on_handled: None,
        }
    }

    fn final_step(audio: &str, result: CallResult) -> StepDefinition {
        let mut s = step(audio);
        s.is_final = true;
        s.result = Some(result);
        s.listen_timeout_ms = None;
        s
    }

    /// Three weighted questions, a gate, lead/decline branches, and an
    /// objection handler on Q1.
    fn qualification_scenario() -> ScenarioDefinition {
        let mut steps = HashMap::new();

        let mut q1 = step("q1.wav");
        q1.transitions.insert(Intent::Affirm, "q2".to_owned());
        q1.transitions.insert(Intent::Deny, "q2".to_owned());
        q1.transitions.insert(Intent::Objection, "handler".to_owned());
        q1.transitions.insert(Intent::Silence, "q1".to_owned());
        q1.wildcard = Some("q2".to_owned());
        steps.insert("q1".to_owned(), q1);

        let mut q2 = step("q2.wav");
        q2.wildcard = Some("q3".to_owned());
        steps.insert("q2".to_owned(), q2);

        let mut q3 = step("q3.wav");
        q3.wildcard = Some("gate".to_owned());
        steps.insert("q3".to_owned(), q3);

        // Gate audio never plays; the gate resolves to a branch.
        let mut gate = step("gate.wav");
        gate.wildcard = Some("decline".to_owned());
        steps.insert("gate".to_owned(), gate);

        steps.insert("lead".to_owned(), final_step("lead.wav", CallResult::Lead));
        steps.insert(
            "decline".to_owned(),
            final_step("decline.wav", CallResult::NotInterested),
        );

        steps.insert(
            "handler".to_owned(),
            StepDefinition {
                kind: StepKind::ObjectionHandler,
                audio: None,
                prompt: None,
                transitions: HashMap::new(),
                wildcard: Some("decline".to_owned()),
                is_determinant: false,
                is_final: false,
                result: None,
                listen_timeout_ms: None,
                barge_in: true,
                on_handled: None,
            },
        );

        ScenarioDefinition {
            id: "qual".to_owned(),
            name: "qualification".to_owned(),
            voice: None,
            theme: "solar".to_owned(),
            entry_step: "q1".to_owned(),
            decline_step: "decline".to_owned(),
            not_understood_step: None,
            max_autonomous_turns: 2,
            steps,
            qualification: Some(QualificationTable {
                weights: HashMap::from([
                    ("q1".to_owned(), 35),
                    ("q2".to_owned(), 35),
                    ("q3".to_owned(), 30),
                ]),
                threshold: 70,
                gate_step: "gate".to_owned(),
                lead_step: "lead".to_owned(),
                decline_step: "decline".to_owned(),
            }),
        }
    }

    fn corpus() -> ObjectionCorpus {
        ObjectionCorpus {
            theme: "solar".to_owned(),
            entries: vec![ObjectionEntry {
                label: "too_expensive".to_owned(),
                patterns: vec!["it is too expensive".to_owned()],
                rebuttal_audio: "rebuttal_price.wav".to_owned(),
            }],
        }
    }

    fn engine(scenario: ScenarioDefinition) -> ScenarioEngine {
        ScenarioEngine::new(
            Arc::new(scenario),
            Arc::new(corpus()),
            Arc::new(RuleClassifier),
            ObjectionMatchConfig::default(),
            Duration::from_secs(2),
            HashMap::from([("name".to_owned(), "Ada".to_owned())]),
        )
    }

    fn expect_play(action: &EngineAction, step: &str) {
        match action {
            EngineAction::Play { step: s, .. } => assert_eq!(s, step),
            other => panic!("expected Play at '{step}', got {other:?}"),
        }
    }

    #[tokio::test]
    async fn three_affirms_score_100_and_route_to_lead() {
        let mut eng = engine(qualification_scenario());
        let action = eng.start().unwrap();
        expect_play(&action, "q1");

        for expected in ["q2", "q3"] {
            let action = eng
                .on_listen(ListenOutcome::Answer("yes".to_owned()))
                .await
                .unwrap();
            expect_play(&action, expected);
        }
        let action = eng
            .on_listen(ListenOutcome::Answer("yes".to_owned()))
            .await
            .unwrap();
        assert_eq!(eng.score(), 100);
        match action {
            EngineAction::Finish { step, result, .. } => {
                assert_eq!(step, "lead");
                assert_eq!(result, CallResult::Lead);
            }
            other => panic!("expected Finish, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn deny_on_q1_scores_65_and_routes_to_decline() {
        let mut eng = engine(qualification_scenario());
        eng.start().unwrap();

        eng.on_listen(ListenOutcome::Answer("no".to_owned()))
            .await
            .unwrap();
        eng.on_listen(ListenOutcome::Answer("yes".to_owned()))
            .await
            .unwrap();
        let action = eng
            .on_listen(ListenOutcome::Answer("yes".to_owned()))
            .await
            .unwrap();
        assert_eq!(eng.score(), 65);
        match action {
            EngineAction::Finish { step, result, .. } => {
                assert_eq!(step, "decline");
                assert_eq!(result, CallResult::NotInterested);
            }
            other => panic!("expected Finish, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn determinant_deny_short_circuits_the_rail() {
        let mut scenario = qualification_scenario();
        scenario.steps.get_mut("q1").unwrap().is_determinant = true;
        scenario
            .qualification
            .as_mut()
            .unwrap()
            .weights
            .insert("q1".to_owned(), 100);
        let mut eng = engine(scenario);
        eng.start().unwrap();

        let action = eng
            .on_listen(ListenOutcome::Answer("no thanks".to_owned()))
            .await
            .unwrap();
        match action {
            EngineAction::Finish { step, .. } => assert_eq!(step, "decline"),
            other => panic!("expected Finish, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn canned_rebuttal_plays_and_returns_to_triggering_step() {
        let mut eng = engine(qualification_scenario());
        eng.start().unwrap();

        let action = eng
            .on_listen(ListenOutcome::Answer("it is too expensive".to_owned()))
            .await
            .unwrap();
        match action {
            EngineAction::Play { step, source, listen_timeout_ms, .. } => {
                assert_eq!(step, "handler");
                assert_eq!(
                    source,
                    AudioSource::Prerecorded("rebuttal_price.wav".to_owned())
                );
                assert!(listen_timeout_ms.is_none());
            }
            other => panic!("expected rebuttal Play, got {other:?}"),
        }
        assert_eq!(eng.autonomous_turns(), 1);

        // Rebuttal playback finished: the rail returns to q1.
        let action = eng.resume().unwrap();
        expect_play(&action, "q1");
    }

    #[tokio::test]
    async fn corpus_miss_uses_generative_rebuttal() {
        let mut eng = engine(qualification_scenario());
        eng.start().unwrap();

        let action = eng
            .on_listen(ListenOutcome::Answer("no time for this".to_owned()))
            .await
            .unwrap();
        match action {
            EngineAction::Play { source, .. } => {
                assert_eq!(
                    source,
                    AudioSource::Synthesized("let me put that in perspective".to_owned())
                );
            }
            other => panic!("expected rebuttal Play, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn objection_budget_forces_decline() {
        let mut eng = engine(qualification_scenario());
        eng.start().unwrap();

        for _ in 0..2 {
            eng.on_listen(ListenOutcome::Answer("it is too expensive".to_owned()))
                .await
                .unwrap();
            eng.resume().unwrap();
        }
        assert_eq!(eng.autonomous_turns(), 2);

        let action = eng
            .on_listen(ListenOutcome::Answer("it is too expensive".to_owned()))
            .await
            .unwrap();
        assert_eq!(eng.autonomous_turns(), 2);
        match action {
            EngineAction::Finish { step, .. } => assert_eq!(step, "decline"),
            other => panic!("expected Finish, got {other:?}"),
        }
    }

    // An objection at a step with no handler wired routes like any
    // other unhandled intent and spends none of the rebuttal budget.
    #[tokio::test]
    async fn objection_without_a_handler_spends_no_budget() {
        let mut eng = engine(qualification_scenario());
        eng.start().unwrap();
        eng.on_listen(ListenOutcome::Answer("yes".to_owned()))
            .await
            .unwrap();

        // q2 has no objection transition; its wildcard is q3.
        let action = eng
            .on_listen(ListenOutcome::Answer("it is too expensive".to_owned()))
            .await
            .unwrap();
        expect_play(&action, "q3");
        assert_eq!(eng.autonomous_turns(), 0);
    }

    // Two handlers wildcarding each other pass load-time validation;
    // entering the chain must surface a defect, not recurse forever.
    #[test]
    fn handler_wildcard_cycle_is_reported_not_followed() {
        let mut scenario = qualification_scenario();
        let handler = scenario.steps["handler"].clone();
        let mut a = handler.clone();
        a.wildcard = Some("handler_b".to_owned());
        let mut b = handler;
        b.wildcard = Some("handler_a".to_owned());
        scenario.steps.insert("handler_a".to_owned(), a);
        scenario.steps.insert("handler_b".to_owned(), b);
        scenario.entry_step = "handler_a".to_owned();
        scenario.validate().unwrap();

        let mut eng = engine(scenario);
        match eng.start() {
            Err(DialerError::ScenarioInvalid { defects, .. }) => {
                assert!(defects.iter().any(|d| d.contains("cycle")));
            }
            other => panic!("expected a cycle defect, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn silence_routes_through_the_silence_transition() {
        let mut eng = engine(qualification_scenario());
        eng.start().unwrap();

        // q1 maps silence back to itself (retry).
        let action = eng.on_listen(ListenOutcome::NoResponse).await.unwrap();
        expect_play(&action, "q1");
    }

    #[tokio::test]
    async fn unhandled_intent_falls_through_the_wildcard() {
        let mut eng = engine(qualification_scenario());
        eng.start().unwrap();

        // "maybe later" classifies as not_understood; q1's wildcard is q2.
        let action = eng
            .on_listen(ListenOutcome::Answer("maybe later".to_owned()))
            .await
            .unwrap();
        expect_play(&action, "q2");
    }

    #[tokio::test]
    async fn terminal_step_is_absorbing() {
        let mut eng = engine(qualification_scenario());
        eng.start().unwrap();
        for _ in 0..3 {
            eng.on_listen(ListenOutcome::Answer("yes".to_owned()))
                .await
                .unwrap();
        }
        let action = eng
            .on_listen(ListenOutcome::Answer("yes".to_owned()))
            .await
            .unwrap();
        match action {
            EngineAction::Finish { step, .. } => assert_eq!(step, "lead"),
            other => panic!("expected Finish, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn prompt_template_substitutes_contact_fields() {
        let mut scenario = qualification_scenario();
        {
            let q1 = scenario.steps.get_mut("q1").unwrap();
            q1.audio = None;
            q1.prompt = Some("Hello {name}, do you own your home?".to_owned());
        }
        let mut eng = engine(scenario);
        match eng.start().unwrap() {
            EngineAction::Play { source, .. } => {
                assert_eq!(
                    source,
                    AudioSource::Synthesized("Hello Ada, do you own your home?".to_owned())
                );
            }
            other => panic!("expected Play, got {other:?}"),
        }
    }
}
