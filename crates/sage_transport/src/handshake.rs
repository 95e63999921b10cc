//! The four-phase handshake state machine.
//!
//!   initiator                       responder
//!   ─────────                       ─────────
//!   initiate ──── Invitation ──▶ respond_to_invitation
//!   process_request ◀── Request ────┘
//!   └──── Response ──▶ process_response
//!   process_complete ◀── Complete ──┘
//!
//! Each function validates the peer record (phase, fields, timestamp,
//! signature — in that order, so a wrong verification key fails before
//! any payload is touched), performs its key agreement step, and
//! installs the mutated session back into the registry as one update.
//! Failure leaves the session in its prior state.
//!
//! Key material timeline: ephemeral X25519 pairs live from phase 1/2
//! until the session key is installed; the HKDF shared secret lives from
//! phase 2 until phase 4 and is scrubbed the moment the session key
//! lands (`Session::install_session_key`).

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;
use std::time::Instant;
use tracing::debug;

use sage_crypto::cipher::{self, SymmetricKey};
use sage_crypto::keys::{IdentityKeyPair, PublicKeyBytes};
use sage_crypto::signer;
use sage_proto::handshake::{
    Complete, CompletePayload, HandshakePhase, Invitation, Request, RequestPayload, Response,
    ResponsePayload,
};
use sage_session::{SessionRegistry, SessionStatus};

use crate::config::TransportConfig;
use crate::error::TransportError;

/// Per-remote-DID handshake progress, tracked by the transport. `phase`
/// is the last phase this side produced.
#[derive(Debug, Clone)]
pub struct HandshakeState {
    pub phase: HandshakePhase,
    pub session_id: String,
    pub started_at: Instant,
    pub updated_at: Instant,
}

impl HandshakeState {
    pub fn new(phase: HandshakePhase, session_id: String) -> Self {
        let now = Instant::now();
        Self {
            phase,
            session_id,
            started_at: now,
            updated_at: now,
        }
    }

    pub fn advance(&mut self, phase: HandshakePhase) {
        self.phase = phase;
        self.updated_at = Instant::now();
    }
}

pub(crate) struct HandshakeCtx<'a> {
    pub config: &'a TransportConfig,
    pub identity: &'a IdentityKeyPair,
    pub local_did: &'a str,
    pub registry: &'a SessionRegistry,
}

impl HandshakeCtx<'_> {
    fn key_id(&self) -> String {
        format!("{}#key-1", self.local_did)
    }
}

fn expect_phase(did: &str, expected: HandshakePhase, got: HandshakePhase) -> Result<(), TransportError> {
    if got != expected {
        return Err(TransportError::UnexpectedPhase {
            did: did.to_string(),
            expected: expected.to_string(),
            got: got.to_string(),
        });
    }
    Ok(())
}

fn require(field: &'static str, value: &str) -> Result<(), TransportError> {
    if value.is_empty() {
        return Err(TransportError::InvalidInput {
            field,
            reason: "must not be empty".into(),
        });
    }
    Ok(())
}

fn decode_public_key(field: &'static str, b64: &str) -> Result<[u8; 32], TransportError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(b64)
        .map_err(|e| TransportError::DecodeError {
            field,
            reason: e.to_string(),
        })?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| TransportError::DecodeError {
            field,
            reason: format!("expected 32 bytes, got {}", bytes.len()),
        })
}

/// Phase 1 (initiator): create the pending session and the Invitation.
pub(crate) fn initiate(
    ctx: &HandshakeCtx<'_>,
    remote_did: &str,
) -> Result<(Invitation, String), TransportError> {
    let mut session = ctx.registry.create(ctx.local_did, remote_did);
    let ephemeral = cipher::generate_ephemeral();
    let nonce = cipher::generate_nonce();

    let invitation = Invitation {
        phase: HandshakePhase::Invitation,
        from_did: ctx.local_did.to_string(),
        to_did: remote_did.to_string(),
        nonce: nonce.clone(),
        ephemeral_public_key: ephemeral.public_b64(),
        algorithms: ctx.config.algorithms_advertised.clone(),
        timestamp: Utc::now(),
    };

    session.ephemeral = Some(ephemeral);
    session.local_nonce = nonce;
    session.status = SessionStatus::Establishing;
    let session_id = session.id.clone();
    ctx.registry.update(session)?;

    debug!(remote_did, session_id = %session_id, "handshake initiated");
    Ok((invitation, session_id))
}

/// Phase 2 (responder): validate the Invitation, derive the shared
/// secret, and build the signed Request.
pub(crate) fn respond_to_invitation(
    ctx: &HandshakeCtx<'_>,
    invitation: &Invitation,
) -> Result<(Request, String), TransportError> {
    expect_phase(&invitation.from_did, HandshakePhase::Invitation, invitation.phase)?;
    require("from_did", &invitation.from_did)?;
    require("nonce", &invitation.nonce)?;
    if invitation.to_did != ctx.local_did {
        return Err(TransportError::InvalidInput {
            field: "to_did",
            reason: format!("invitation addressed to {}", invitation.to_did),
        });
    }
    signer::check_timestamp(invitation.timestamp, ctx.config.max_clock_skew)?;
    let initiator_public =
        decode_public_key("ephemeral_public_key", &invitation.ephemeral_public_key)?;

    let ephemeral = cipher::generate_ephemeral();
    let shared = cipher::derive_shared(&ephemeral.secret, &initiator_public)?;
    let nonce = cipher::generate_nonce();

    let payload = RequestPayload {
        invitation_nonce: invitation.nonce.clone(),
        response_nonce: nonce.clone(),
        shared_secret_proposal: shared.to_b64(),
    };
    let encrypted_payload = cipher::encrypt_hpke(&shared, &payload)?;

    let mut session = ctx.registry.create(ctx.local_did, &invitation.from_did);
    session.local_nonce = nonce.clone();
    session.remote_nonce = invitation.nonce.clone();
    session.ephemeral = Some(ephemeral.clone());
    session.shared_secret = Some(shared);
    session.status = SessionStatus::Establishing;
    let session_id = session.id.clone();
    ctx.registry.update(session)?;

    let mut request = Request {
        phase: HandshakePhase::Request,
        session_id: session_id.clone(),
        from_did: ctx.local_did.to_string(),
        to_did: invitation.from_did.clone(),
        nonce,
        ephemeral_public_key: ephemeral.public_b64(),
        encrypted_payload,
        signature: None,
        timestamp: Utc::now(),
    };
    signer::sign_record(&mut request, ctx.identity, &ctx.key_id())?;

    debug!(
        remote_did = %invitation.from_did,
        session_id = %session_id,
        "invitation accepted, request issued"
    );
    Ok((request, session_id))
}

/// Phase 3 (initiator): verify the Request, recover the shared secret,
/// mint the session key, and build the signed Response.
pub(crate) fn process_request(
    ctx: &HandshakeCtx<'_>,
    request: &Request,
    peer_public: &PublicKeyBytes,
) -> Result<(Response, String), TransportError> {
    expect_phase(&request.from_did, HandshakePhase::Request, request.phase)?;
    require("session_id", &request.session_id)?;
    require("nonce", &request.nonce)?;
    signer::check_timestamp(request.timestamp, ctx.config.max_clock_skew)?;
    // Identity binding comes first: nothing sealed is opened until the
    // signature holds.
    signer::verify_record(request, &peer_public.0)?;

    let responder_public =
        decode_public_key("ephemeral_public_key", &request.ephemeral_public_key)?;

    let mut session = ctx.registry.get_by_did(&request.from_did)?;
    let ephemeral = session.ephemeral.as_ref().ok_or_else(|| {
        TransportError::HandshakeStateMismatch {
            did: request.from_did.clone(),
            reason: "no ephemeral key for this session".into(),
        }
    })?;

    let (payload, shared): (RequestPayload, SymmetricKey) = cipher::open_from_public(
        &request.encrypted_payload,
        &ephemeral.secret,
        &responder_public,
    )?;

    if payload.invitation_nonce != session.local_nonce {
        return Err(TransportError::HandshakeStateMismatch {
            did: request.from_did.clone(),
            reason: "invitation nonce does not match this session".into(),
        });
    }
    // Mutual key confirmation: the responder's view of the shared secret
    // must equal ours.
    if payload.shared_secret_proposal != shared.to_b64() {
        return Err(TransportError::HandshakeStateMismatch {
            did: request.from_did.clone(),
            reason: "shared secret proposal does not match derivation".into(),
        });
    }

    let session_key = SymmetricKey::generate();
    let expires_at = Utc::now()
        + chrono::Duration::from_std(ctx.config.session_ttl)
            .unwrap_or_else(|_| chrono::Duration::hours(1));

    let response_payload = ResponsePayload {
        request_nonce: request.nonce.clone(),
        session_key: session_key.to_b64(),
        expires_at,
        metadata: session.metadata.clone(),
    };
    let encrypted_payload = cipher::encrypt(&shared, &response_payload)?;

    session.remote_nonce = request.nonce.clone();
    session.expires_at = expires_at;
    session.install_session_key(session_key);
    let session_id = session.id.clone();
    ctx.registry.update(session)?;

    let mut response = Response {
        phase: HandshakePhase::Response,
        session_id: request.session_id.clone(),
        from_did: ctx.local_did.to_string(),
        to_did: request.from_did.clone(),
        encrypted_payload,
        signature: None,
        timestamp: Utc::now(),
    };
    signer::sign_record(&mut response, ctx.identity, &ctx.key_id())?;

    debug!(
        remote_did = %request.from_did,
        session_id = %session_id,
        "request accepted, session key issued"
    );
    Ok((response, session_id))
}

/// Phase 4 (responder): verify the Response, extract the session key,
/// go Active, and build the signed Complete ack.
pub(crate) fn process_response(
    ctx: &HandshakeCtx<'_>,
    response: &Response,
    peer_public: &PublicKeyBytes,
) -> Result<(Complete, String), TransportError> {
    expect_phase(&response.from_did, HandshakePhase::Response, response.phase)?;
    require("session_id", &response.session_id)?;
    signer::check_timestamp(response.timestamp, ctx.config.max_clock_skew)?;
    signer::verify_record(response, &peer_public.0)?;

    let mut session = ctx.registry.get(&response.session_id)?;
    if session.remote_did != response.from_did {
        return Err(TransportError::HandshakeStateMismatch {
            did: response.from_did.clone(),
            reason: format!("session {} belongs to another peer", response.session_id),
        });
    }
    let shared = session.shared_secret.clone().ok_or_else(|| {
        TransportError::HandshakeStateMismatch {
            did: response.from_did.clone(),
            reason: "no shared secret for this session".into(),
        }
    })?;

    let payload: ResponsePayload = cipher::decrypt(&shared, &response.encrypted_payload)?;
    if payload.request_nonce != session.local_nonce {
        return Err(TransportError::HandshakeStateMismatch {
            did: response.from_did.clone(),
            reason: "request nonce does not match this session".into(),
        });
    }

    let session_key = SymmetricKey::from_b64(&payload.session_key)?;
    session.metadata.extend(payload.metadata);

    let ack = CompletePayload {
        ack: true,
        session_metadata: session.metadata.clone(),
    };
    let encrypted_payload = cipher::encrypt(&session_key, &ack)?;

    session.install_session_key(session_key);
    // The ack we are about to send is sealed under the session key, so
    // this side is fully able to converse: Active on sending Complete.
    session.status = SessionStatus::Active;
    let session_id = session.id.clone();
    ctx.registry.update(session)?;

    let mut complete = Complete {
        phase: HandshakePhase::Complete,
        session_id: response.session_id.clone(),
        from_did: ctx.local_did.to_string(),
        to_did: response.from_did.clone(),
        encrypted_payload,
        signature: None,
        timestamp: Utc::now(),
    };
    signer::sign_record(&mut complete, ctx.identity, &ctx.key_id())?;

    debug!(
        remote_did = %response.from_did,
        session_id = %session_id,
        "response accepted, session active"
    );
    Ok((complete, session_id))
}

/// Phase 4 ack (initiator): verify the Complete and go Active.
pub(crate) fn process_complete(
    ctx: &HandshakeCtx<'_>,
    complete: &Complete,
    peer_public: &PublicKeyBytes,
) -> Result<String, TransportError> {
    expect_phase(&complete.from_did, HandshakePhase::Complete, complete.phase)?;
    require("session_id", &complete.session_id)?;
    signer::check_timestamp(complete.timestamp, ctx.config.max_clock_skew)?;
    signer::verify_record(complete, &peer_public.0)?;

    let mut session = ctx.registry.get_by_did(&complete.from_did)?;
    let session_key = session.session_key.clone().ok_or_else(|| {
        TransportError::HandshakeStateMismatch {
            did: complete.from_did.clone(),
            reason: "no session key installed yet".into(),
        }
    })?;

    let ack: CompletePayload = cipher::decrypt(&session_key, &complete.encrypted_payload)?;
    if !ack.ack {
        return Err(TransportError::HandshakeStateMismatch {
            did: complete.from_did.clone(),
            reason: "peer declined the session".into(),
        });
    }

    session.metadata.extend(ack.session_metadata);
    session.status = SessionStatus::Active;
    let session_id = session.id.clone();
    ctx.registry.update(session)?;

    debug!(
        remote_did = %complete.from_did,
        session_id = %session_id,
        "complete accepted, session active"
    );
    Ok(session_id)
}
