//! Conversation scenarios: the per-call state machine.
//!
//! A scenario is an immutable document loaded once per call: named
//! steps, intent transition tables, objection handling, and lead
//! qualification. [`definition`] holds the document model and its
//! load-time validation, [`objection`] the themed rebuttal corpus, and
//! [`engine`] the cursor that walks a call through the steps.

pub mod definition;
pub mod engine;
pub mod objection;

pub use definition::{QualificationTable, ScenarioDefinition, StepDefinition, StepKind};
pub use engine::{EngineAction, ListenOutcome, ScenarioEngine};
pub use objection::{ObjectionCorpus, ObjectionEntry};
