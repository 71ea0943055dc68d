//! Scenario document model and load-time validation.
//!
//! Scenarios are produced by external tooling as JSON and treated as
//! read-only once loaded. Validation runs before any call is placed and
//! reports every defect it finds, not just the first.

use crate::call::CallResult;
use crate::error::{DialerError, Result};
use crate::intent::Intent;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// What a step does when the rail reaches it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// Play a prompt, then (optionally) listen for an answer.
    Audio,
    /// Match the transcript against the objection corpus and rebut.
    ObjectionHandler,
}

/// One named step of a scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Step behaviour.
    pub kind: StepKind,
    /// Pre-recorded prompt reference, if any.
    #[serde(default)]
    pub audio: Option<String>,
    /// Prompt template for synthesis; contact fields substitute into
    /// `{placeholders}` before playback.
    #[serde(default)]
    pub prompt: Option<String>,
    /// Intent → next-step transitions.
    #[serde(default)]
    pub transitions: HashMap<Intent, String>,
    /// Fallback target when the intent has no explicit entry.
    #[serde(default)]
    pub wildcard: Option<String>,
    /// A `deny` here disqualifies the prospect immediately.
    #[serde(default)]
    pub is_determinant: bool,
    /// Reaching this step ends the call.
    #[serde(default)]
    pub is_final: bool,
    /// Fixed call result for final steps.
    #[serde(default)]
    pub result: Option<CallResult>,
    /// Listen timeout after playback, in ms. Absent means the step does
    /// not listen and auto-advances through its wildcard.
    #[serde(default)]
    pub listen_timeout_ms: Option<u64>,
    /// Whether the prospect may interrupt this prompt.
    #[serde(default = "default_true")]
    pub barge_in: bool,
    /// Objection handler only: step to continue at after a rebuttal,
    /// overriding the return to the step that raised the objection.
    #[serde(default)]
    pub on_handled: Option<String>,
}

fn default_true() -> bool {
    true
}

/// Lead-qualification scoring table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualificationTable {
    /// Step name → weight (0–100). Weights of determinant steps must
    /// sum to 100.
    pub weights: HashMap<String, u32>,
    /// Accumulated score at or above this routes to the lead branch.
    pub threshold: u32,
    /// The step at which the score is compared.
    pub gate_step: String,
    /// Branch taken when the score reaches the threshold.
    pub lead_step: String,
    /// Branch taken otherwise.
    pub decline_step: String,
}

/// An immutable scenario, loaded once per call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioDefinition {
    /// Scenario id.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Voice used for synthesized prompts.
    #[serde(default)]
    pub voice: Option<String>,
    /// Objection-corpus theme this scenario draws rebuttals from.
    pub theme: String,
    /// First step of the rail.
    pub entry_step: String,
    /// Terminal step for refusals and exhausted objection budgets.
    pub decline_step: String,
    /// Optional dedicated step for answers nothing else handles; the
    /// decline step is used when absent.
    #[serde(default)]
    pub not_understood_step: Option<String>,
    /// Objection/rebuttal cycles allowed before further objections are
    /// forced to the decline step.
    #[serde(default = "default_max_autonomous_turns")]
    pub max_autonomous_turns: u32,
    /// The steps, by name.
    pub steps: HashMap<String, StepDefinition>,
    /// Lead-qualification scoring, if the scenario qualifies.
    #[serde(default)]
    pub qualification: Option<QualificationTable>,
}

fn default_max_autonomous_turns() -> u32 {
    2
}

impl ScenarioDefinition {
    /// Parse and validate a scenario from JSON text.
    ///
    /// # Errors
    ///
    /// Returns an error on malformed JSON or any validation defect.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let scenario: Self = serde_json::from_str(text).map_err(|e| {
            DialerError::ScenarioInvalid {
                scenario: "<unparsed>".to_owned(),
                defects: vec![format!("malformed JSON: {e}")],
            }
        })?;
        scenario.validate()?;
        Ok(scenario)
    }

    /// Load and validate a scenario from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure, malformed JSON, or any
    /// validation defect.
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Look up a step by name.
    pub fn step(&self, name: &str) -> Option<&StepDefinition> {
        self.steps.get(name)
    }

    /// Validate the scenario. Collects every defect so tooling can fix
    /// a document in one pass.
    ///
    /// # Errors
    ///
    /// Returns [`DialerError::ScenarioInvalid`] listing all defects.
    pub fn validate(&self) -> Result<()> {
        let mut defects = Vec::new();

        if !self.steps.contains_key(&self.entry_step) {
            defects.push(format!("entry step '{}' does not exist", self.entry_step));
        }
        if !self.steps.contains_key(&self.decline_step) {
            defects.push(format!(
                "decline step '{}' does not exist",
                self.decline_step
            ));
        }
        if let Some(step) = &self.not_understood_step
            && !self.steps.contains_key(step)
        {
            defects.push(format!("not-understood step '{step}' does not exist"));
        }

        for (name, step) in &self.steps {
            for (intent, target) in &step.transitions {
                if !self.steps.contains_key(target) {
                    defects.push(format!(
                        "step '{name}' transition on {intent} targets missing step '{target}'"
                    ));
                }
            }
            for (label, target) in [("wildcard", &step.wildcard), ("on_handled", &step.on_handled)]
            {
                if let Some(target) = target
                    && !self.steps.contains_key(target)
                {
                    defects.push(format!(
                        "step '{name}' {label} targets missing step '{target}'"
                    ));
                }
            }

            if step.is_final && step.result.is_none() {
                defects.push(format!("final step '{name}' has no result tag"));
            }
            if step.kind == StepKind::Audio && step.audio.is_none() && step.prompt.is_none() {
                defects.push(format!("step '{name}' has neither audio nor a prompt template"));
            }
            if step.kind == StepKind::Audio
                && !step.is_final
                && step.listen_timeout_ms.is_none()
                && step.wildcard.is_none()
            {
                defects.push(format!(
                    "step '{name}' neither listens nor has a wildcard to auto-advance through"
                ));
            }
            if step.kind == StepKind::ObjectionHandler && step.is_final {
                defects.push(format!("objection handler '{name}' cannot be final"));
            }
        }

        if let Some(q) = &self.qualification {
            for (label, step) in [
                ("gate", &q.gate_step),
                ("lead branch", &q.lead_step),
                ("decline branch", &q.decline_step),
            ] {
                if !self.steps.contains_key(step) {
                    defects.push(format!(
                        "qualification {label} step '{step}' does not exist"
                    ));
                }
            }
            let mut determinant_sum = 0u32;
            let mut any_determinant = false;
            for (step, weight) in &q.weights {
                match self.steps.get(step) {
                    None => defects.push(format!(
                        "qualification weight names missing step '{step}'"
                    )),
                    Some(def) => {
                        if *weight > 100 {
                            defects.push(format!(
                                "qualification weight for '{step}' exceeds 100"
                            ));
                        }
                        if def.is_determinant {
                            any_determinant = true;
                            determinant_sum += weight;
                        }
                    }
                }
            }
            if any_determinant && determinant_sum != 100 {
                defects.push(format!(
                    "determinant step weights sum to {determinant_sum}, expected 100"
                ));
            }
        }

        if defects.is_empty() {
            Ok(())
        } else {
            Err(DialerError::ScenarioInvalid {
                scenario: self.id.clone(),
                defects,
            })
        }
    }
}

/// Substitute `{field}` placeholders in a prompt template with contact
/// fields. Absent fields substitute as empty strings.
pub fn substitute(template: &str, fields: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                let key = &after[..close];
                if let Some(value) = fields.get(key) {
                    out.push_str(value);
                }
                rest = &after[close + 1..];
            }
            None => {
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}
