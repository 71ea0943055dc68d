//! Campaign records: contacts, retry policy, counters.

pub mod scheduler;

use crate::call::CallResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Opaque campaign handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CampaignId(Uuid);

impl CampaignId {
    /// Mint a fresh handle.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for CampaignId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// One contact to be called.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    /// Number to dial.
    pub phone_number: String,
    /// Contact name, substituted into prompt templates.
    #[serde(default)]
    pub name: Option<String>,
    /// Company name, substituted into prompt templates.
    #[serde(default)]
    pub company: Option<String>,
    /// Arbitrary extra substitution fields.
    #[serde(default)]
    pub extras: HashMap<String, String>,
}

impl Contact {
    /// A contact with just a number.
    pub fn new(phone_number: &str) -> Self {
        Self {
            phone_number: phone_number.to_owned(),
            name: None,
            company: None,
            extras: HashMap::new(),
        }
    }

    /// Flatten the contact into prompt-template substitution fields.
    pub fn substitution_fields(&self) -> HashMap<String, String> {
        let mut fields = self.extras.clone();
        if let Some(name) = &self.name {
            fields.insert("name".to_owned(), name.clone());
        }
        if let Some(company) = &self.company {
            fields.insert("company".to_owned(), company.clone());
        }
        fields.insert("phone_number".to_owned(), self.phone_number.clone());
        fields
    }
}

/// Retry semantics for non-final dispositions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Master switch.
    pub enabled: bool,
    /// Retries allowed per contact beyond the first attempt.
    pub max_retries: u32,
    /// Backoff before a re-queued contact becomes due again, in secs.
    pub retry_delay_secs: u64,
    /// Results that qualify for a retry.
    pub eligible_results: Vec<CallResult>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 2,
            retry_delay_secs: 600,
            eligible_results: vec![
                CallResult::NoAnswer,
                CallResult::Failed,
                CallResult::AnsweringMachine,
            ],
        }
    }
}

impl RetryPolicy {
    /// Whether a call that ended with `result` after `retries_used`
    /// retries should be re-queued.
    pub fn should_retry(&self, result: CallResult, retries_used: u32) -> bool {
        self.enabled
            && retries_used < self.max_retries
            && self.eligible_results.contains(&result)
    }
}

/// Campaign lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    /// Created, not yet started.
    Pending,
    /// Admitting and running calls.
    Running,
    /// In-flight calls finish; no new admissions.
    Paused,
    /// Terminal: every contact settled.
    Completed,
    /// Terminal: stopped; pending contacts cancelled.
    Cancelled,
}

impl CampaignStatus {
    /// Whether this status is terminal.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

/// Aggregate counters, derived by the scheduler actor from the
/// terminal dispositions it recorded itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CampaignCounters {
    /// Contacts in the campaign.
    pub total: usize,
    /// Contacts settled with a terminal disposition.
    pub completed: usize,
    /// Calls currently live.
    pub in_progress: usize,
    /// Contacts still queued (including retries waiting on backoff).
    pub pending: usize,
    /// Settled contacts by final result.
    pub by_result: HashMap<CallResult, usize>,
}

/// Campaign configuration and live state. Mutated only by the
/// scheduler actor that owns it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignRecord {
    /// Campaign handle.
    pub id: CampaignId,
    /// Scenario every call of this campaign runs.
    pub scenario_id: String,
    /// Strict cap on simultaneous calls.
    pub max_concurrent_calls: usize,
    /// Contacts released to the dial queue at a time; the next batch is
    /// released once the previous one has fully settled. 0 releases the
    /// whole contact set up front.
    #[serde(default)]
    pub batch_size: usize,
    /// Pacing delay between originations, in ms.
    pub origination_delay_ms: u64,
    /// Retry semantics.
    pub retry: RetryPolicy,
    /// Lifecycle status.
    pub status: CampaignStatus,
    /// Aggregates.
    pub counters: CampaignCounters,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When the campaign started running.
    pub started_at: Option<DateTime<Utc>>,
    /// When the campaign reached a terminal status.
    pub ended_at: Option<DateTime<Utc>>,
}

impl CampaignRecord {
    /// Create a pending campaign.
    pub fn new(
        scenario_id: &str,
        max_concurrent_calls: usize,
        origination_delay_ms: u64,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            id: CampaignId::new(),
            scenario_id: scenario_id.to_owned(),
            max_concurrent_calls: max_concurrent_calls.max(1),
            batch_size: 0,
            origination_delay_ms,
            retry,
            status: CampaignStatus::Pending,
            counters: CampaignCounters::default(),
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
        }
    }

    /// Dial in batches of `batch_size` contacts.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }
}

/// Serializable campaign snapshot for the external control layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignReport {
    /// The campaign record at snapshot time.
    pub record: CampaignRecord,
    /// Final results of settled contacts, in settlement order.
    pub settled: Vec<(String, CallResult)>,
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;

    #[test]
    fn retry_eligibility() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(CallResult::NoAnswer, 0));
        assert!(policy.should_retry(CallResult::NoAnswer, 1));
        // Exhausted budget settles permanently regardless of result.
        assert!(!policy.should_retry(CallResult::NoAnswer, 2));
        // Ineligible result.
        assert!(!policy.should_retry(CallResult::NotInterested, 0));

        let disabled = RetryPolicy {
            enabled: false,
            ..RetryPolicy::default()
        };
        assert!(!disabled.should_retry(CallResult::NoAnswer, 0));
    }

    #[test]
    fn substitution_fields_include_extras_and_identity() {
        let mut contact = Contact::new("+15550001");
        contact.name = Some("Ada".to_owned());
        contact.extras.insert("plan".to_owned(), "gold".to_owned());
        let fields = contact.substitution_fields();
        assert_eq!(fields["name"], "Ada");
        assert_eq!(fields["plan"], "gold");
        assert_eq!(fields["phone_number"], "+15550001");
        assert!(!fields.contains_key("company"));
    }

    #[test]
    fn concurrency_cap_is_at_least_one() {
        let record = CampaignRecord::new("s1", 0, 0, RetryPolicy::default());
        assert_eq!(record.max_concurrent_calls, 1);
    }
}
