//! Transport error taxonomy.
//!
//! One tagged variant per failure kind, with enough structure on the
//! variants that matter (phase mismatches, expiries) for callers to act
//! without parsing messages. Lower-layer errors convert in via `From`;
//! the handshake never recovers from a cryptographic failure, it
//! surfaces it.

use chrono::{DateTime, Utc};
use thiserror::Error;

use sage_crypto::CryptoError;
use sage_session::SessionError;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid input in {field}: {reason}")]
    InvalidInput { field: &'static str, reason: String },

    #[error("decode error in {field}: {reason}")]
    DecodeError { field: &'static str, reason: String },

    #[error("signature verification failed")]
    SignatureInvalid,

    #[error("timestamp {timestamp} outside the allowed {max_skew_secs}s clock skew")]
    TimestampSkew {
        timestamp: DateTime<Utc>,
        max_skew_secs: i64,
    },

    #[error("replay detected: nonce {nonce} already observed")]
    ReplayDetected { nonce: String },

    #[error("handshake state mismatch for {did}: {reason}")]
    HandshakeStateMismatch { did: String, reason: String },

    #[error("unexpected handshake phase from {did}: expected {expected}, got {got}")]
    UnexpectedPhase {
        did: String,
        expected: String,
        got: String,
    },

    #[error("session not found for {lookup}")]
    SessionNotFound { lookup: String },

    #[error("session {id} expired at {expires_at}")]
    SessionExpired {
        id: String,
        expires_at: DateTime<Utc>,
    },

    #[error("session {id} is not active (status {status})")]
    SessionInactive { id: String, status: String },

    #[error("resolver returned a non-Ed25519 key for {did}: {key_type}")]
    PublicKeyTypeMismatch { did: String, key_type: String },

    #[error("AEAD authentication failed")]
    AuthFailure,

    #[error("key derivation failed: {0}")]
    DerivationFailed(String),

    #[error("operation canceled")]
    Canceled,

    #[error("handshake with {did} timed out after {elapsed_secs}s")]
    Timeout { did: String, elapsed_secs: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<CryptoError> for TransportError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::AuthFailure => TransportError::AuthFailure,
            CryptoError::SignatureInvalid => TransportError::SignatureInvalid,
            CryptoError::TimestampSkew {
                timestamp,
                max_skew_secs,
            } => TransportError::TimestampSkew {
                timestamp,
                max_skew_secs,
            },
            CryptoError::DerivationFailed(reason) => TransportError::DerivationFailed(reason),
            CryptoError::InvalidPublicKey { expected, got } => TransportError::DecodeError {
                field: "public_key",
                reason: format!("expected {expected} bytes, got {got}"),
            },
            CryptoError::InvalidKey(reason) => TransportError::DecodeError {
                field: "key",
                reason,
            },
            CryptoError::Base64Decode(e) => TransportError::DecodeError {
                field: "base64",
                reason: e.to_string(),
            },
            CryptoError::Serialisation(e) => TransportError::DecodeError {
                field: "json",
                reason: e.to_string(),
            },
            CryptoError::AeadEncrypt => {
                TransportError::Internal("AEAD encryption failed".into())
            }
        }
    }
}

impl From<SessionError> for TransportError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NotFound { id } => TransportError::SessionNotFound { lookup: id },
            SessionError::NotFoundForDid { did } => {
                TransportError::SessionNotFound { lookup: did }
            }
            SessionError::Expired { id, expires_at } => {
                TransportError::SessionExpired { id, expires_at }
            }
            SessionError::ReplayDetected { nonce } => TransportError::ReplayDetected { nonce },
        }
    }
}
