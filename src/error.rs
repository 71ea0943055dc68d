//! Error types for the dialflow orchestrator.

use crate::call::CallId;
use crate::campaign::{CampaignId, CampaignStatus};

/// Top-level error type for the campaign orchestration system.
#[derive(Debug, thiserror::Error)]
pub enum DialerError {
    /// Telephony collaborator unreachable or command rejected.
    /// Fatal to the single call, never to the campaign.
    #[error("telephony error: {0}")]
    Telephony(String),

    /// Transcription collaborator error. The turn stage recovers by
    /// degrading to batch record-then-transcribe; this surfaces only
    /// when the batch path also fails.
    #[error("transcription error: {0}")]
    Transcription(String),

    /// Intent classification error.
    #[error("classification error: {0}")]
    Classification(String),

    /// Scenario definition rejected at load time. Every defect found
    /// during validation is listed, not just the first one.
    #[error("scenario '{scenario}' invalid: {}", defects.join("; "))]
    ScenarioInvalid {
        /// Scenario id.
        scenario: String,
        /// Every validation defect found.
        defects: Vec<String>,
    },

    /// Campaign lifecycle command issued against the wrong state
    /// (e.g. `start` on a non-pending campaign). Rejected synchronously
    /// with no partial effect.
    #[error("campaign {campaign}: cannot {operation} while {status:?}")]
    CampaignState {
        /// Campaign the command targeted.
        campaign: CampaignId,
        /// The rejected operation (`start`, `pause`, ...).
        operation: &'static str,
        /// Campaign status at the time of the command.
        status: CampaignStatus,
    },

    /// A command referenced a call handle the system does not know.
    #[error("unknown call: {0}")]
    UnknownCall(CallId),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Channel send/receive error (a per-call task went away).
    #[error("channel error: {0}")]
    Channel(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, DialerError>;
