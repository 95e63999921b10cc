//! sage_crypto — cryptographic primitives for the SAGE agent transport
//!
//! # Design principles
//! - NO custom crypto; all primitives come from audited Rust crates.
//! - Zeroize all secret material on drop.
//! - Public APIs return opaque newtypes to prevent accidental misuse.
//!
//! # Module layout
//! - `keys`       — long-term Ed25519 identity keypairs + fingerprints
//! - `cipher`     — X25519 agreement, HKDF-SHA256, ChaCha20-Poly1305 AEAD
//! - `canonical`  — deterministic JSON used for signature bases and payloads
//! - `signer`     — detached Ed25519 signatures over records + freshness check
//! - `structured` — signed structured messages over opaque bodies
//! - `error`      — unified error type

pub mod canonical;
pub mod cipher;
pub mod error;
pub mod keys;
pub mod signer;
pub mod structured;

pub use error::CryptoError;
