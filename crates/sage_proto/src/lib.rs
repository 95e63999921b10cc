//! sage_proto — wire records for the SAGE agent transport.
//!
//! Everything here maps directly to JSON bodies on the wire. The crypto
//! envelopes ([`sage_crypto::cipher::EncryptedPayload`],
//! [`sage_crypto::signer::SignatureEnvelope`]) are defined next to the
//! operations that produce them; this crate defines the records that
//! carry them.
//!
//! - `handshake` — the four phase records and their sealed payloads
//! - `message`   — application messages inside an established session
//! - `api`       — HTTP shim request/response bodies

pub mod api;
pub mod handshake;
pub mod message;

pub use handshake::{
    Complete, CompletePayload, HandshakePhase, Invitation, Request, RequestPayload, Response,
    ResponsePayload,
};
pub use message::AppMessage;
