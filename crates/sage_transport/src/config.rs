//! Transport configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default algorithms advertised in an Invitation.
pub const DEFAULT_ALGORITHMS: [&str; 3] = ["X25519", "ChaCha20-Poly1305", "Ed25519"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Active session lifetime.
    pub session_ttl: Duration,
    /// Expiry sweep period.
    pub cleanup_interval: Duration,
    /// Max wall time between Connect and the final Complete.
    pub handshake_timeout: Duration,
    /// Accepted |now − timestamp|.
    pub max_clock_skew: Duration,
    /// Inbound messages larger than this (serialised) are rejected.
    pub max_message_size: usize,
    /// Upper bound on retained nonces.
    pub nonce_cache_size: usize,
    /// Algorithm list carried in Invitations.
    pub algorithms_advertised: Vec<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            session_ttl: Duration::from_secs(3600),
            cleanup_interval: Duration::from_secs(300),
            handshake_timeout: Duration::from_secs(30),
            max_clock_skew: Duration::from_secs(300),
            max_message_size: 10 * 1024 * 1024,
            nonce_cache_size: 1000,
            algorithms_advertised: DEFAULT_ALGORITHMS.iter().map(|a| a.to_string()).collect(),
        }
    }
}
