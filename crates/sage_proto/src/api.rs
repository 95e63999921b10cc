//! HTTP shim request/response bodies.
//!
//! The shim is a dumb pipe: it moves serialised records between agents
//! and never inspects sealed payloads. `WireRecord` is the one body
//! accepted on `POST /sage/message`.

use serde::{Deserialize, Serialize};

use sage_crypto::structured::SignedMessage;

use crate::handshake::{Complete, Invitation, Request, Response};
use crate::message::AppMessage;

/// Any record an agent can put on the wire, tagged for dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WireRecord {
    Invitation(Invitation),
    Request(Request),
    Response(Response),
    Complete(Complete),
    Message(AppMessage),
    Signed(SignedMessage),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub accepted: bool,
    /// Reply record, present when processing the inbound record produced
    /// one (e.g. an Invitation produces a Request).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply: Option<WireRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub did: String,
    pub active_sessions: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handshake::HandshakePhase;
    use chrono::Utc;

    #[test]
    fn wire_record_tagging() {
        let record = WireRecord::Invitation(Invitation {
            phase: HandshakePhase::Invitation,
            from_did: "did:sage:alice".into(),
            to_did: "did:sage:bob".into(),
            nonce: "n".into(),
            ephemeral_public_key: "pk".into(),
            algorithms: vec!["X25519".into()],
            timestamp: Utc::now(),
        });
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains(r#""kind":"invitation""#));
        let parsed: WireRecord = serde_json::from_str(&json).unwrap();
        assert!(matches!(parsed, WireRecord::Invitation(_)));
    }
}
