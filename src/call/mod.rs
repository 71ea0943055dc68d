//! Call identity, status, and the write-once call record.

pub mod controller;

use crate::campaign::CampaignId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

/// Opaque call handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallId(Uuid);

impl CallId {
    /// Mint a fresh handle.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for CallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Call lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    /// Created, not yet originated.
    Pending,
    /// Originate command issued.
    Originating,
    /// Remote end is ringing.
    Ringing,
    /// Answered; the scenario is running.
    InProgress,
    /// Terminal: the scenario reached a final step.
    Completed,
    /// Terminal: a collaborator error killed the call.
    Failed,
    /// Terminal: cancelled before origination.
    Cancelled,
    /// Terminal: never answered (or silent past the retry cap).
    NoAnswer,
}

impl CallStatus {
    /// Whether this status is terminal.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::NoAnswer
        )
    }
}

/// Final disposition of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallResult {
    /// Qualified lead.
    Lead,
    /// Declined politely or disqualified.
    NotInterested,
    /// Asked to be called back.
    Callback,
    /// Never answered, or silent until the timeout cap.
    NoAnswer,
    /// Collaborator or transport failure.
    Failed,
    /// Number does not belong to the contact.
    WrongNumber,
    /// An answering machine picked up.
    AnsweringMachine,
}

/// Per-call record. Owned exclusively by the call's controller while
/// live; the terminal status/result pair is written exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRecord {
    /// Call handle.
    pub id: CallId,
    /// Dialed number.
    pub phone_number: String,
    /// Owning campaign, if any.
    pub campaign_id: Option<CampaignId>,
    /// Scenario driving the call.
    pub scenario_id: String,
    /// Step the scenario cursor last pointed at.
    pub current_step: Option<String>,
    /// Lifecycle status.
    pub status: CallStatus,
    /// Disposition, set together with the terminal status.
    pub result: Option<CallResult>,
    /// Retries already spent on this contact before this call.
    pub retries_used: u32,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When the remote party answered.
    pub answered_at: Option<DateTime<Utc>>,
    /// When the call ended.
    pub ended_at: Option<DateTime<Utc>>,
    /// Status transition history, for debugging.
    pub history: Vec<(CallStatus, DateTime<Utc>)>,
}

impl CallRecord {
    /// Create a pending record for one origination attempt.
    pub fn new(
        id: CallId,
        phone_number: &str,
        campaign_id: Option<CampaignId>,
        scenario_id: &str,
        retries_used: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            phone_number: phone_number.to_owned(),
            campaign_id,
            scenario_id: scenario_id.to_owned(),
            current_step: None,
            status: CallStatus::Pending,
            result: None,
            retries_used,
            created_at: now,
            answered_at: None,
            ended_at: None,
            history: vec![(CallStatus::Pending, now)],
        }
    }

    /// Record a non-terminal status transition. Ignored (with a
    /// warning) once the record is terminal.
    pub fn set_status(&mut self, status: CallStatus) {
        if self.status.is_terminal() {
            warn!(
                call = %self.id,
                current = ?self.status,
                rejected = ?status,
                "status change after terminal disposition ignored"
            );
            return;
        }
        if status == CallStatus::InProgress && self.answered_at.is_none() {
            self.answered_at = Some(Utc::now());
        }
        self.status = status;
        self.history.push((status, Utc::now()));
    }

    /// Write the terminal disposition. Returns `true` on the first
    /// write; later attempts are ignored and return `false`.
    pub fn finalize(&mut self, status: CallStatus, result: CallResult) -> bool {
        debug_assert!(status.is_terminal());
        if self.status.is_terminal() {
            warn!(
                call = %self.id,
                current = ?self.status,
                rejected = ?status,
                "duplicate disposition write ignored"
            );
            return false;
        }
        self.status = status;
        self.result = Some(result);
        self.ended_at = Some(Utc::now());
        self.history.push((status, Utc::now()));
        true
    }

    /// Whether the record carries its terminal disposition.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
