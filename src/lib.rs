//! dialflow — real-time orchestration for automated outbound voice
//! campaigns.
//!
//! The crate drives many simultaneous phone conversations: a per-call
//! turn-taking detector (answering-machine detection, barge-in,
//! end-of-speech), a scenario state machine with objection handling and
//! lead qualification, a per-call controller, and a campaign scheduler
//! with bounded concurrency and retry/backoff. Telephony, speech-to-
//! text, and intent classification are external collaborators behind
//! traits; deterministic in-process implementations live in [`sim`].

pub mod audio;
pub mod call;
pub mod campaign;
pub mod config;
pub mod error;
pub mod intent;
pub mod scenario;
pub mod sim;
pub mod stt;
pub mod telephony;
pub mod turn;
pub mod vad;

pub use error::{DialerError, Result};
