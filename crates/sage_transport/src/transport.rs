//! The public transport façade.
//!
//! One `Transport` per agent. It threads handshake state per remote DID,
//! enforces phase ordering and the handshake timeout, filters replays,
//! and applies messages against Active sessions.
//!
//! Locking: the registry has its own RwLock, the nonce cache its own
//! mutex, and the handshake-state map its own mutex. The map lock is
//! held only for the check/advance bookkeeping around each phase — never
//! across crypto or anything that could block — so unrelated peers do
//! not serialise on it.
//!
//! `close()` is the cancellation signal: it is advisory, checked at the
//! entry of every public operation, and in-flight crypto completes.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use sage_crypto::cipher;
use sage_crypto::keys::{IdentityKeyPair, PublicKeyBytes};
use sage_crypto::signer;
use sage_proto::handshake::{Complete, HandshakePhase, Invitation, Request, Response};
use sage_proto::message::AppMessage;
use sage_session::{NonceCache, Session, SessionRegistry};

use crate::config::TransportConfig;
use crate::error::TransportError;
use crate::handshake::{self, HandshakeCtx, HandshakeState};

/// Decrypted application message handed to the installed handler.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub from_did: String,
    /// Local session id (the sender's id for the same pairing differs).
    pub session_id: String,
    pub payload: serde_json::Value,
}

pub type MessageHandler = Box<dyn Fn(InboundMessage) + Send + Sync>;

pub struct Transport {
    local_did: String,
    identity: IdentityKeyPair,
    config: TransportConfig,
    registry: Arc<SessionRegistry>,
    nonces: NonceCache,
    handshakes: Mutex<HashMap<String, HandshakeState>>,
    handler: RwLock<Option<MessageHandler>>,
    closed: AtomicBool,
}

impl Transport {
    /// Build a transport and start its expiry sweeper.
    pub fn new(local_did: &str, identity: IdentityKeyPair, config: TransportConfig) -> Self {
        let registry = Arc::new(SessionRegistry::new(config.session_ttl));
        registry.start_sweeper(config.cleanup_interval);
        let nonces = NonceCache::new(config.nonce_cache_size);
        info!(local_did, "transport started");
        Self {
            local_did: local_did.to_string(),
            identity,
            config,
            registry,
            nonces,
            handshakes: Mutex::new(HashMap::new()),
            handler: RwLock::new(None),
            closed: AtomicBool::new(false),
        }
    }

    pub fn local_did(&self) -> &str {
        &self.local_did
    }

    pub fn identity_public(&self) -> &PublicKeyBytes {
        &self.identity.public
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Canceled);
        }
        Ok(())
    }

    fn ctx(&self) -> HandshakeCtx<'_> {
        HandshakeCtx {
            config: &self.config,
            identity: &self.identity,
            local_did: &self.local_did,
            registry: &self.registry,
        }
    }

    fn key_id(&self) -> String {
        format!("{}#key-1", self.local_did)
    }

    /// Require the handshake with `did` to be at `expected`, and fail the
    /// whole handshake if the initiator-side wall clock ran out.
    fn check_handshake_state(
        &self,
        did: &str,
        expected: HandshakePhase,
        enforce_timeout: bool,
    ) -> Result<(), TransportError> {
        let mut handshakes = self.handshakes.lock();
        let state = handshakes
            .get(did)
            .ok_or_else(|| TransportError::HandshakeStateMismatch {
                did: did.to_string(),
                reason: "no handshake in progress".into(),
            })?;
        if state.phase != expected {
            return Err(TransportError::UnexpectedPhase {
                did: did.to_string(),
                expected: expected.to_string(),
                got: state.phase.to_string(),
            });
        }
        if enforce_timeout {
            let elapsed = state.started_at.elapsed();
            if elapsed > self.config.handshake_timeout {
                handshakes.remove(did);
                warn!(did, elapsed_secs = elapsed.as_secs(), "handshake timed out");
                return Err(TransportError::Timeout {
                    did: did.to_string(),
                    elapsed_secs: elapsed.as_secs(),
                });
            }
        }
        Ok(())
    }

    fn advance_handshake(&self, did: &str, phase: HandshakePhase) {
        if let Some(state) = self.handshakes.lock().get_mut(did) {
            state.advance(phase);
        }
    }

    // ── Handshake ────────────────────────────────────────────────────────

    /// Phase 1: start a handshake towards `remote_did`.
    pub fn connect(&self, remote_did: &str) -> Result<Invitation, TransportError> {
        self.ensure_open()?;
        if remote_did.is_empty() {
            return Err(TransportError::InvalidInput {
                field: "remote_did",
                reason: "must not be empty".into(),
            });
        }
        if remote_did == self.local_did {
            return Err(TransportError::InvalidInput {
                field: "remote_did",
                reason: "cannot connect to self".into(),
            });
        }

        let mut handshakes = self.handshakes.lock();
        if handshakes.contains_key(remote_did) {
            return Err(TransportError::HandshakeStateMismatch {
                did: remote_did.to_string(),
                reason: "handshake already in progress".into(),
            });
        }
        if let Ok(existing) = self.registry.get_by_did(remote_did) {
            if existing.is_active() {
                return Err(TransportError::HandshakeStateMismatch {
                    did: remote_did.to_string(),
                    reason: format!("session {} already active", existing.id),
                });
            }
        }

        let (invitation, session_id) = handshake::initiate(&self.ctx(), remote_did)?;
        handshakes.insert(
            remote_did.to_string(),
            HandshakeState::new(HandshakePhase::Invitation, session_id),
        );
        Ok(invitation)
    }

    /// Phase 2: accept an Invitation and produce the signed Request.
    pub fn handle_invitation(&self, invitation: &Invitation) -> Result<Request, TransportError> {
        self.ensure_open()?;
        self.nonces.check(&invitation.nonce)?;
        let (request, session_id) = handshake::respond_to_invitation(&self.ctx(), invitation)?;
        self.handshakes.lock().insert(
            invitation.from_did.clone(),
            HandshakeState::new(HandshakePhase::Request, session_id),
        );
        Ok(request)
    }

    /// Phase 3: accept the Request and produce the signed Response.
    /// `peer_public` is the sender's resolved Ed25519 verification key.
    pub fn handle_request(
        &self,
        request: &Request,
        peer_public: &PublicKeyBytes,
    ) -> Result<Response, TransportError> {
        self.ensure_open()?;
        self.check_handshake_state(&request.from_did, HandshakePhase::Invitation, true)?;
        self.nonces.check(&request.nonce)?;
        let (response, _) = handshake::process_request(&self.ctx(), request, peer_public)?;
        self.advance_handshake(&request.from_did, HandshakePhase::Response);
        Ok(response)
    }

    /// Phase 4: accept the Response, go Active, produce the Complete ack.
    pub fn handle_response(
        &self,
        response: &Response,
        peer_public: &PublicKeyBytes,
    ) -> Result<Complete, TransportError> {
        self.ensure_open()?;
        self.check_handshake_state(&response.from_did, HandshakePhase::Request, false)?;
        let (complete, _) = handshake::process_response(&self.ctx(), response, peer_public)?;
        self.handshakes.lock().remove(&response.from_did);
        Ok(complete)
    }

    /// Final initiator step: verify the Complete ack and go Active.
    pub fn handle_complete(
        &self,
        complete: &Complete,
        peer_public: &PublicKeyBytes,
    ) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.check_handshake_state(&complete.from_did, HandshakePhase::Response, true)?;
        handshake::process_complete(&self.ctx(), complete, peer_public)?;
        self.handshakes.lock().remove(&complete.from_did);
        Ok(())
    }

    // ── Messaging ────────────────────────────────────────────────────────

    /// Seal and sign an application payload for an Active session.
    pub fn send_message(
        &self,
        remote_did: &str,
        payload: &serde_json::Value,
    ) -> Result<AppMessage, TransportError> {
        self.ensure_open()?;
        let session = self.registry.get_by_did(remote_did)?;
        if !session.is_active() {
            return Err(TransportError::SessionInactive {
                id: session.id.clone(),
                status: session.status.to_string(),
            });
        }
        let key = session
            .session_key
            .clone()
            .ok_or_else(|| TransportError::SessionInactive {
                id: session.id.clone(),
                status: session.status.to_string(),
            })?;

        let mut message = AppMessage {
            from_did: self.local_did.clone(),
            to_did: remote_did.to_string(),
            session_id: session.id.clone(),
            encrypted_payload: cipher::encrypt(&key, payload)?,
            signature: None,
            timestamp: chrono::Utc::now(),
        };
        signer::sign_record(&mut message, &self.identity, &self.key_id())?;
        self.registry.update(session)?;
        Ok(message)
    }

    /// Verify, decrypt, and apply an inbound application message.
    /// Returns the decrypted payload; the installed handler (if any) is
    /// invoked with it as well.
    pub fn receive_message(
        &self,
        message: &AppMessage,
        sender_public: &PublicKeyBytes,
    ) -> Result<serde_json::Value, TransportError> {
        self.ensure_open()?;
        let wire_size = serde_json::to_vec(message)
            .map_err(|e| TransportError::Internal(e.to_string()))?
            .len();
        if wire_size > self.config.max_message_size {
            return Err(TransportError::InvalidInput {
                field: "message",
                reason: format!(
                    "{wire_size} bytes exceeds the {} byte limit",
                    self.config.max_message_size
                ),
            });
        }

        signer::verify_record(message, &sender_public.0)?;
        signer::check_timestamp(message.timestamp, self.config.max_clock_skew)?;
        // The AEAD nonce is unique per ciphertext and signed, which makes
        // it the replay key for application messages.
        self.nonces.check(&message.encrypted_payload.nonce)?;

        let session = self.registry.get_by_did(&message.from_did)?;
        if !session.is_active() {
            return Err(TransportError::SessionInactive {
                id: session.id.clone(),
                status: session.status.to_string(),
            });
        }
        let key = session
            .session_key
            .clone()
            .ok_or_else(|| TransportError::SessionInactive {
                id: session.id.clone(),
                status: session.status.to_string(),
            })?;

        let payload: serde_json::Value = cipher::decrypt(&key, &message.encrypted_payload)?;
        let session_id = session.id.clone();
        self.registry.update(session)?;

        if let Some(handler) = self.handler.read().as_ref() {
            handler(InboundMessage {
                from_did: message.from_did.clone(),
                session_id,
                payload: payload.clone(),
            });
        }
        Ok(payload)
    }

    pub fn set_message_handler(&self, handler: impl Fn(InboundMessage) + Send + Sync + 'static) {
        *self.handler.write() = Some(Box::new(handler));
    }

    // ── Session management ───────────────────────────────────────────────

    pub fn get_session(&self, remote_did: &str) -> Result<Session, TransportError> {
        Ok(self.registry.get_by_did(remote_did)?)
    }

    pub fn list_sessions(&self) -> Vec<Session> {
        self.registry.list()
    }

    /// Tear down the session and any handshake state for `remote_did`.
    pub fn disconnect(&self, remote_did: &str) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.handshakes.lock().remove(remote_did);
        let id = match self.registry.get_by_did(remote_did) {
            Ok(session) => session.id,
            Err(sage_session::SessionError::Expired { id, .. }) => id,
            Err(e) => return Err(e.into()),
        };
        self.registry.delete(&id)?;
        debug!(remote_did, session_id = %id, "disconnected");
        Ok(())
    }

    /// Cancel the transport: stop the sweeper and fail every subsequent
    /// public operation with `Canceled`. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.registry.stop();
        self.handshakes.lock().clear();
        info!(local_did = %self.local_did, "transport closed");
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        // Belt over the explicit close(): the sweeper thread must not
        // outlive the transport.
        self.registry.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport(did: &str) -> Transport {
        Transport::new(did, IdentityKeyPair::generate(), TransportConfig::default())
    }

    #[test]
    fn connect_twice_is_rejected() {
        let alice = transport("did:sage:alice");
        alice.connect("did:sage:bob").unwrap();
        let err = alice.connect("did:sage:bob").unwrap_err();
        assert!(matches!(err, TransportError::HandshakeStateMismatch { .. }));
    }

    #[test]
    fn connect_to_self_is_invalid() {
        let alice = transport("did:sage:alice");
        assert!(matches!(
            alice.connect("did:sage:alice"),
            Err(TransportError::InvalidInput { .. })
        ));
    }

    #[test]
    fn handlers_require_prior_phase() {
        let alice = transport("did:sage:alice");
        let bob = transport("did:sage:bob");

        let invitation = alice.connect("did:sage:bob").unwrap();
        let request = bob.handle_invitation(&invitation).unwrap();

        // Bob cannot process a Response before one was requested of him:
        // his handshake with Alice sits at Request.
        let bogus = Response {
            phase: HandshakePhase::Response,
            session_id: request.session_id.clone(),
            from_did: "did:sage:carol".into(),
            to_did: "did:sage:bob".into(),
            encrypted_payload: request.encrypted_payload.clone(),
            signature: None,
            timestamp: chrono::Utc::now(),
        };
        let err = bob
            .handle_response(&bogus, alice.identity_public())
            .unwrap_err();
        assert!(matches!(err, TransportError::HandshakeStateMismatch { .. }));

        alice.close();
        bob.close();
    }

    #[test]
    fn closed_transport_cancels_operations() {
        let alice = transport("did:sage:alice");
        alice.close();
        assert!(matches!(
            alice.connect("did:sage:bob"),
            Err(TransportError::Canceled)
        ));
        assert!(matches!(
            alice.send_message("did:sage:bob", &serde_json::json!({})),
            Err(TransportError::Canceled)
        ));
    }

    #[test]
    fn send_without_session_is_not_found() {
        let alice = transport("did:sage:alice");
        let err = alice
            .send_message("did:sage:bob", &serde_json::json!({"x": 1}))
            .unwrap_err();
        assert!(matches!(err, TransportError::SessionNotFound { .. }));
        alice.close();
    }
}
