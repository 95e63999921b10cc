//! sage_session — session lifecycle and replay protection.
//!
//! - `session`     — one peer relationship: status, key material, expiry
//! - `registry`    — owns sessions, DID↔session index, background sweep
//! - `nonce_cache` — bounded freshness filter for observed nonces
//! - `error`       — unified error type

pub mod error;
pub mod nonce_cache;
pub mod registry;
pub mod session;

pub use error::SessionError;
pub use nonce_cache::NonceCache;
pub use registry::SessionRegistry;
pub use session::{Session, SessionStatus};
