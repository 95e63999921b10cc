//! Signed structured messages over opaque bodies.
//!
//! Alternative to the canonical-JSON record path for carrying signatures
//! over HTTP-like bodies: the signed fields are pinned to
//! `{agent_did, message_id, timestamp, nonce, body}` and the base is
//! their `name: value` lines in that exact order. The primitive is the
//! same Ed25519-over-BLAKE3 as [`crate::signer`]; only the field
//! canonicalisation differs.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{
    cipher,
    error::CryptoError,
    keys::IdentityKeyPair,
    signer::ALGORITHM_EDDSA,
};

/// Field names covered by the signature, in base order.
pub const SIGNED_FIELDS: [&str; 5] = ["agent_did", "message_id", "timestamp", "nonce", "body"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedMessage {
    pub agent_did: String,
    pub message_id: String,
    pub timestamp: DateTime<Utc>,
    pub nonce: String,
    /// Transport headers carried alongside the body; not signed.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    /// base64url body bytes
    pub body: String,
    pub algorithm: String,
    pub key_id: String,
    pub signed_fields: Vec<String>,
    /// base64url 64-byte Ed25519 signature
    pub signature: String,
}

impl SignedMessage {
    pub fn body_bytes(&self) -> Result<Vec<u8>, CryptoError> {
        Ok(URL_SAFE_NO_PAD.decode(&self.body)?)
    }
}

fn signature_base(
    agent_did: &str,
    message_id: &str,
    timestamp: DateTime<Utc>,
    nonce: &str,
    body_b64: &str,
) -> String {
    // RFC 3339 with fixed millisecond precision so both sides render the
    // timestamp identically.
    let ts = timestamp.to_rfc3339_opts(SecondsFormat::Millis, true);
    format!(
        "agent_did: {agent_did}\nmessage_id: {message_id}\ntimestamp: {ts}\nnonce: {nonce}\nbody: {body_b64}"
    )
}

/// Sign a structured message over `body` with the agent's identity key.
pub fn sign_structured(
    agent_did: &str,
    message_id: &str,
    body: &[u8],
    headers: BTreeMap<String, String>,
    key: &IdentityKeyPair,
    key_id: &str,
) -> Result<SignedMessage, CryptoError> {
    let timestamp = Utc::now();
    let nonce = cipher::generate_nonce();
    let body_b64 = URL_SAFE_NO_PAD.encode(body);
    let base = signature_base(agent_did, message_id, timestamp, &nonce, &body_b64);
    let digest = blake3::hash(base.as_bytes());
    let sig = key.sign(digest.as_bytes());
    Ok(SignedMessage {
        agent_did: agent_did.to_string(),
        message_id: message_id.to_string(),
        timestamp,
        nonce,
        headers,
        body: body_b64,
        algorithm: ALGORITHM_EDDSA.to_string(),
        key_id: key_id.to_string(),
        signed_fields: SIGNED_FIELDS.iter().map(|f| f.to_string()).collect(),
        signature: URL_SAFE_NO_PAD.encode(sig),
    })
}

/// Rebuild the base in the pinned field order and verify the signature.
pub fn verify_structured(msg: &SignedMessage, public_key: &[u8]) -> Result<(), CryptoError> {
    if msg.algorithm != ALGORITHM_EDDSA || msg.key_id.is_empty() {
        return Err(CryptoError::SignatureInvalid);
    }
    if msg.signed_fields != SIGNED_FIELDS {
        return Err(CryptoError::SignatureInvalid);
    }
    let sig_bytes = URL_SAFE_NO_PAD
        .decode(&msg.signature)
        .map_err(|_| CryptoError::SignatureInvalid)?;
    let base = signature_base(
        &msg.agent_did,
        &msg.message_id,
        msg.timestamp,
        &msg.nonce,
        &msg.body,
    );
    let digest = blake3::hash(base.as_bytes());
    IdentityKeyPair::verify(public_key, digest.as_bytes(), &sig_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_verify_roundtrip() {
        let key = IdentityKeyPair::generate();
        let msg = sign_structured(
            "did:sage:alice",
            "msg-1",
            b"{\"hello\":\"world\"}",
            BTreeMap::new(),
            &key,
            "did:sage:alice#key-1",
        )
        .unwrap();
        verify_structured(&msg, &key.public.0).unwrap();
        assert_eq!(msg.body_bytes().unwrap(), b"{\"hello\":\"world\"}");
    }

    #[test]
    fn tampered_body_rejected() {
        let key = IdentityKeyPair::generate();
        let mut msg = sign_structured(
            "did:sage:alice",
            "msg-1",
            b"original",
            BTreeMap::new(),
            &key,
            "did:sage:alice#key-1",
        )
        .unwrap();
        msg.body = URL_SAFE_NO_PAD.encode(b"tampered");
        assert!(verify_structured(&msg, &key.public.0).is_err());
    }

    #[test]
    fn headers_are_not_signed() {
        let key = IdentityKeyPair::generate();
        let mut msg = sign_structured(
            "did:sage:alice",
            "msg-1",
            b"body",
            BTreeMap::new(),
            &key,
            "did:sage:alice#key-1",
        )
        .unwrap();
        msg.headers.insert("x-route".into(), "relay-2".into());
        verify_structured(&msg, &key.public.0).unwrap();
    }

    #[test]
    fn reordered_signed_fields_rejected() {
        let key = IdentityKeyPair::generate();
        let mut msg = sign_structured(
            "did:sage:alice",
            "msg-1",
            b"body",
            BTreeMap::new(),
            &key,
            "did:sage:alice#key-1",
        )
        .unwrap();
        msg.signed_fields.swap(0, 1);
        assert!(verify_structured(&msg, &key.public.0).is_err());
    }
}
