use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session {id} not found")]
    NotFound { id: String },

    #[error("no session for remote DID {did}")]
    NotFoundForDid { did: String },

    #[error("session {id} expired at {expires_at}")]
    Expired {
        id: String,
        expires_at: DateTime<Utc>,
    },

    #[error("nonce already observed: {nonce}")]
    ReplayDetected { nonce: String },
}
