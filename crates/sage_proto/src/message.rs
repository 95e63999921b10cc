//! Application messages inside an established session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sage_crypto::cipher::EncryptedPayload;
use sage_crypto::signer::{SignatureEnvelope, SignedRecord};

use crate::handshake::impl_signed_record;

/// Signed, sealed application message. The payload is encrypted under
/// the session key; the AEAD nonce of the envelope doubles as the
/// replay key on the receiving side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppMessage {
    pub from_did: String,
    pub to_did: String,
    /// The sender's session id; the receiver resolves the session by
    /// `from_did` and treats this as a consistency check only.
    pub session_id: String,
    pub encrypted_payload: EncryptedPayload,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<SignatureEnvelope>,
    pub timestamp: DateTime<Utc>,
}

impl_signed_record!(AppMessage);
