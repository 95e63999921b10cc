//! HTTP shim: a thin axum router moving opaque records in and out of the
//! transport. Two endpoints: `POST /sage/message` and `GET /health`.
//! Replies produced while processing a record (e.g. an Invitation
//! produces a Request) ride back in the response body.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use tracing::{debug, warn};

use sage_crypto::structured;
use sage_proto::api::{ErrorResponse, HealthResponse, MessageResponse, WireRecord};
use sage_transport::{DidResolver, StaticResolver, Transport, TransportError};

#[derive(Clone)]
pub struct AppState {
    pub transport: Arc<Transport>,
    pub resolver: Arc<StaticResolver>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/sage/message", post(handle_message))
        .route("/health", get(health))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        did: state.transport.local_did().to_string(),
        active_sessions: state.transport.list_sessions().len(),
    })
}

async fn handle_message(
    State(state): State<AppState>,
    Json(record): Json<WireRecord>,
) -> Result<Json<MessageResponse>, (StatusCode, Json<ErrorResponse>)> {
    let reply = apply_record(&state, record).map_err(|err| {
        warn!(error = %err, "inbound record rejected");
        let (status, code) = status_for(&err);
        (
            status,
            Json(ErrorResponse {
                error: err.to_string(),
                code: code.into(),
            }),
        )
    })?;
    Ok(Json(MessageResponse {
        accepted: true,
        reply,
    }))
}

fn apply_record(
    state: &AppState,
    record: WireRecord,
) -> Result<Option<WireRecord>, TransportError> {
    let transport = &state.transport;
    match record {
        WireRecord::Invitation(invitation) => {
            debug!(from = %invitation.from_did, "invitation received");
            let request = transport.handle_invitation(&invitation)?;
            Ok(Some(WireRecord::Request(request)))
        }
        WireRecord::Request(request) => {
            let key = state.resolver.resolve_ed25519(&request.from_did)?;
            let response = transport.handle_request(&request, &key)?;
            Ok(Some(WireRecord::Response(response)))
        }
        WireRecord::Response(response) => {
            let key = state.resolver.resolve_ed25519(&response.from_did)?;
            let complete = transport.handle_response(&response, &key)?;
            Ok(Some(WireRecord::Complete(complete)))
        }
        WireRecord::Complete(complete) => {
            let key = state.resolver.resolve_ed25519(&complete.from_did)?;
            transport.handle_complete(&complete, &key)?;
            Ok(None)
        }
        WireRecord::Message(message) => {
            let key = state.resolver.resolve_ed25519(&message.from_did)?;
            // Replayed or badly signed application messages are dropped
            // without a protocol reply; everything else surfaces.
            match transport.receive_message(&message, &key) {
                Ok(_) => Ok(None),
                Err(
                    err @ (TransportError::ReplayDetected { .. }
                    | TransportError::SignatureInvalid),
                ) => {
                    warn!(from = %message.from_did, error = %err, "message dropped");
                    Ok(None)
                }
                Err(err) => Err(err),
            }
        }
        WireRecord::Signed(signed) => {
            let key = state.resolver.resolve_ed25519(&signed.agent_did)?;
            structured::verify_structured(&signed, &key.0)
                .map_err(TransportError::from)?;
            debug!(from = %signed.agent_did, message_id = %signed.message_id, "signed message verified");
            Ok(None)
        }
    }
}

fn status_for(err: &TransportError) -> (StatusCode, &'static str) {
    match err {
        TransportError::InvalidInput { .. } => (StatusCode::BAD_REQUEST, "invalid_input"),
        TransportError::DecodeError { .. } => (StatusCode::BAD_REQUEST, "decode_error"),
        TransportError::TimestampSkew { .. } => (StatusCode::BAD_REQUEST, "timestamp_skew"),
        TransportError::SignatureInvalid => (StatusCode::UNAUTHORIZED, "signature_invalid"),
        TransportError::AuthFailure => (StatusCode::UNAUTHORIZED, "auth_failure"),
        TransportError::PublicKeyTypeMismatch { .. } => {
            (StatusCode::UNAUTHORIZED, "public_key_type_mismatch")
        }
        TransportError::ReplayDetected { .. } => (StatusCode::CONFLICT, "replay_detected"),
        TransportError::HandshakeStateMismatch { .. } => {
            (StatusCode::CONFLICT, "handshake_state_mismatch")
        }
        TransportError::UnexpectedPhase { .. } => (StatusCode::CONFLICT, "unexpected_phase"),
        TransportError::SessionNotFound { .. } => (StatusCode::NOT_FOUND, "session_not_found"),
        TransportError::SessionExpired { .. } => (StatusCode::GONE, "session_expired"),
        TransportError::SessionInactive { .. } => (StatusCode::CONFLICT, "session_inactive"),
        TransportError::DerivationFailed(_) => (StatusCode::BAD_REQUEST, "derivation_failed"),
        TransportError::Canceled => (StatusCode::SERVICE_UNAVAILABLE, "canceled"),
        TransportError::Timeout { .. } => (StatusCode::REQUEST_TIMEOUT, "timeout"),
        TransportError::Io(_) | TransportError::Internal(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "internal")
        }
    }
}
