use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("invalid public key: expected {expected} bytes, got {got}")]
    InvalidPublicKey { expected: usize, got: usize },

    #[error("key derivation failed: {0}")]
    DerivationFailed(String),

    #[error("AEAD encryption failed")]
    AeadEncrypt,

    #[error("AEAD authentication failed (tag mismatch — possible tampering)")]
    AuthFailure,

    #[error("signature verification failed")]
    SignatureInvalid,

    #[error("timestamp {timestamp} outside the allowed {max_skew_secs}s clock skew")]
    TimestampSkew {
        timestamp: DateTime<Utc>,
        max_skew_secs: i64,
    },

    #[error("serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    #[error("base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),
}
