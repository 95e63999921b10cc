//! sage_transport — the public surface of the SAGE agent transport.
//!
//! A [`Transport`] owns one agent's identity, a session registry with a
//! background expiry sweep, a nonce replay filter, and the per-peer
//! handshake state. It speaks in `sage_proto` records: `connect`
//! produces an Invitation, the `handle_*` family advances the four-phase
//! handshake, and `send_message` / `receive_message` move application
//! payloads inside an established session.
//!
//! - `transport` — the façade and per-peer handshake-state tracking
//! - `handshake` — the four-phase state machine
//! - `config`    — tunables (TTLs, skew, sizes, advertised algorithms)
//! - `resolver`  — the DID → verification key collaborator interface
//! - `keystore`  — identity key persistence (PEM / JWK)
//! - `error`     — the transport error taxonomy

pub mod config;
pub mod error;
pub mod handshake;
pub mod keystore;
pub mod resolver;
pub mod transport;

pub use config::TransportConfig;
pub use error::TransportError;
pub use keystore::{FileKeyStore, KeyFormat, KeyStore};
pub use resolver::{DidResolver, ResolvedDid, StaticResolver, VerificationKey};
pub use transport::{InboundMessage, Transport};
