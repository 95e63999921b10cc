//! Handshake phase records.
//!
//! Four records flow between initiator A and responder B:
//!
//!   A ── Invitation ──▶ B     (unsigned; A's ephemeral key + nonce)
//!   B ── Request ─────▶ A     (B's ephemeral key; payload sealed HPKE)
//!   A ── Response ────▶ B     (session key sealed under the shared key)
//!   B ── Complete ────▶ A     (ack sealed under the session key)
//!
//! Request, Response, and Complete carry a detached identity signature;
//! the signature base is the record's canonical JSON with the envelope
//! cleared (see `sage_crypto::signer`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use sage_crypto::cipher::EncryptedPayload;
use sage_crypto::signer::{SignatureEnvelope, SignedRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandshakePhase {
    Invitation,
    Request,
    Response,
    Complete,
}

impl std::fmt::Display for HandshakePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            HandshakePhase::Invitation => "invitation",
            HandshakePhase::Request => "request",
            HandshakePhase::Response => "response",
            HandshakePhase::Complete => "complete",
        };
        f.write_str(name)
    }
}

/// Phase 1, A → B. Unsigned: freshness and the nonce replay filter bound
/// what a captured Invitation is good for; the Request signature is the
/// first identity binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invitation {
    pub phase: HandshakePhase,
    pub from_did: String,
    pub to_did: String,
    pub nonce: String,
    /// base64url X25519 ephemeral public key
    pub ephemeral_public_key: String,
    /// Algorithms the initiator is prepared to use.
    pub algorithms: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// Phase 2, B → A.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub phase: HandshakePhase,
    /// Responder-side session id (distinct from the initiator's).
    pub session_id: String,
    pub from_did: String,
    pub to_did: String,
    pub nonce: String,
    /// base64url X25519 ephemeral public key
    pub ephemeral_public_key: String,
    /// [`RequestPayload`] sealed HPKE-style for A's ephemeral key.
    pub encrypted_payload: EncryptedPayload,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<SignatureEnvelope>,
    pub timestamp: DateTime<Utc>,
}

/// Phase 3, A → B.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub phase: HandshakePhase,
    /// Echoes the responder's session id from the Request.
    pub session_id: String,
    pub from_did: String,
    pub to_did: String,
    /// [`ResponsePayload`] sealed under the shared secret.
    pub encrypted_payload: EncryptedPayload,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<SignatureEnvelope>,
    pub timestamp: DateTime<Utc>,
}

/// Phase 4, B → A.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Complete {
    pub phase: HandshakePhase,
    pub session_id: String,
    pub from_did: String,
    pub to_did: String,
    /// [`CompletePayload`] sealed under the session key.
    pub encrypted_payload: EncryptedPayload,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<SignatureEnvelope>,
    pub timestamp: DateTime<Utc>,
}

// ── Sealed payloads ──────────────────────────────────────────────────────────

/// Inside the Request envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestPayload {
    /// Echo of the Invitation nonce, binding the Request to it.
    pub invitation_nonce: String,
    pub response_nonce: String,
    /// base64url of the responder's view of the derived shared secret.
    pub shared_secret_proposal: String,
}

/// Inside the Response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsePayload {
    /// Echo of the Request nonce.
    pub request_nonce: String,
    /// base64url 32-byte session key.
    pub session_key: String,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

/// Inside the Complete envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletePayload {
    pub ack: bool,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub session_metadata: HashMap<String, Value>,
}

// ── Signature plumbing ───────────────────────────────────────────────────────

macro_rules! impl_signed_record {
    ($ty:ty) => {
        impl SignedRecord for $ty {
            fn signature(&self) -> Option<&SignatureEnvelope> {
                self.signature.as_ref()
            }
            fn clear_signature(&mut self) {
                self.signature = None;
            }
            fn set_signature(&mut self, envelope: SignatureEnvelope) {
                self.signature = Some(envelope);
            }
        }
    };
}

impl_signed_record!(Request);
impl_signed_record!(Response);
impl_signed_record!(Complete);

pub(crate) use impl_signed_record;

#[cfg(test)]
mod tests {
    use super::*;
    use sage_crypto::cipher::AeadAlgorithm;
    use sage_crypto::keys::IdentityKeyPair;
    use sage_crypto::signer;

    fn dummy_envelope() -> EncryptedPayload {
        EncryptedPayload {
            algorithm: AeadAlgorithm::ChaCha20Poly1305,
            ciphertext: "AAAA".into(),
            nonce: "AAAAAAAAAAAAAAAA".into(),
        }
    }

    #[test]
    fn phase_tags_serialize_snake_case() {
        assert_eq!(
            serde_json::to_string(&HandshakePhase::Invitation).unwrap(),
            r#""invitation""#
        );
        assert_eq!(
            serde_json::to_string(&HandshakePhase::Complete).unwrap(),
            r#""complete""#
        );
    }

    #[test]
    fn request_signature_covers_all_fields() {
        let key = IdentityKeyPair::generate();
        let mut request = Request {
            phase: HandshakePhase::Request,
            session_id: "s-1".into(),
            from_did: "did:sage:bob".into(),
            to_did: "did:sage:alice".into(),
            nonce: "n".into(),
            ephemeral_public_key: "pk".into(),
            encrypted_payload: dummy_envelope(),
            signature: None,
            timestamp: Utc::now(),
        };
        signer::sign_record(&mut request, &key, "did:sage:bob#key-1").unwrap();
        signer::verify_record(&request, &key.public.0).unwrap();

        request.session_id = "s-2".into();
        assert!(signer::verify_record(&request, &key.public.0).is_err());
    }

    #[test]
    fn unsigned_request_roundtrips_without_signature_field() {
        let request = Request {
            phase: HandshakePhase::Request,
            session_id: "s-1".into(),
            from_did: "did:sage:bob".into(),
            to_did: "did:sage:alice".into(),
            nonce: "n".into(),
            ephemeral_public_key: "pk".into(),
            encrypted_payload: dummy_envelope(),
            signature: None,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(!json.contains("signature"));
    }
}
