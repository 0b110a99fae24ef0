use thiserror::Error;

use crate::{document::SlotIndex, store::DocRef};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Document not found: {0}")]
    NotFound(DocRef),

    #[error("Malformed field {field}: {reason}")]
    Malformed { field: String, reason: String },

    #[error("Backend error: {0}")]
    Backend(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    /// Missing documents and bad data will not fix themselves on a second attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Backend(_))
    }
}

#[derive(Error, Debug)]
pub enum RosterError {
    #[error("Roster is still loading")]
    NotLoaded,

    #[error("Slot {0} is out of range")]
    SlotOutOfRange(usize),

    #[error("Unknown field: {0}")]
    UnknownField(String),

    #[error("Reset of slot {0} was not confirmed")]
    ResetNotConfirmed(SlotIndex),

    #[error("Roster reset was not confirmed")]
    RosterResetNotConfirmed,

    #[error("Event {seq} arrived after event {last}")]
    StaleEvent { seq: u64, last: u64 },

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SessionError {
    #[error("Malformed session token")]
    Malformed,

    #[error("Session signature mismatch")]
    BadSignature,

    #[error("Session expired")]
    Expired,

    #[error("Invalid user identifier")]
    InvalidUser,

    #[error("Invalid session key")]
    Key,
}
