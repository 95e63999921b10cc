//! One session: the state shared with a single remote DID.
//!
//! Status is monotonic (Pending → Establishing → Active → Closed) except
//! for the Active → Expired transition the sweeper applies. Key material
//! moves through three stages: the ephemeral X25519 pair (handshake
//! only), the derived shared secret (phases 2–4), and the installed
//! session key. Installing the session key scrubs the first two.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use sage_crypto::cipher::{EphemeralKeyPair, SymmetricKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Establishing,
    Active,
    Expired,
    Closed,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Establishing => "establishing",
            SessionStatus::Active => "active",
            SessionStatus::Expired => "expired",
            SessionStatus::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Session state owned by the registry. Clones are working copies; the
/// registry's `update` installs them back atomically.
#[derive(Clone)]
pub struct Session {
    pub id: String,
    pub local_did: String,
    pub remote_did: String,
    pub status: SessionStatus,
    /// Initiator's X25519 keypair, held until the session key is derived.
    pub ephemeral: Option<EphemeralKeyPair>,
    /// ECDH+HKDF output, held only between phases 2 and 4.
    pub shared_secret: Option<SymmetricKey>,
    /// The long-lived symmetric key for application messages.
    pub session_key: Option<SymmetricKey>,
    pub local_nonce: String,
    pub remote_nonce: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    pub metadata: HashMap<String, Value>,
}

impl Session {
    pub fn new(local_did: &str, remote_did: &str, ttl: std::time::Duration) -> Self {
        let now = Utc::now();
        let ttl = Duration::from_std(ttl).unwrap_or_else(|_| Duration::hours(1));
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            local_did: local_did.to_string(),
            remote_did: remote_did.to_string(),
            status: SessionStatus::Pending,
            ephemeral: None,
            shared_secret: None,
            session_key: None,
            local_nonce: String::new(),
            remote_nonce: String::new(),
            created_at: now,
            expires_at: now + ttl,
            last_active: now,
            metadata: HashMap::new(),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.status == SessionStatus::Expired || Utc::now() >= self.expires_at
    }

    /// Active means the handshake finished on this side and the TTL has
    /// not elapsed.
    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active && Utc::now() < self.expires_at
    }

    pub fn touch(&mut self) {
        self.last_active = Utc::now();
    }

    /// Install the session key and scrub the handshake-stage material.
    /// Dropping the options zeroizes the secrets (both are ZeroizeOnDrop).
    pub fn install_session_key(&mut self, key: SymmetricKey) {
        self.session_key = Some(key);
        self.shared_secret = None;
        self.ephemeral = None;
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("local_did", &self.local_did)
            .field("remote_did", &self.remote_did)
            .field("status", &self.status)
            .field("has_session_key", &self.session_key.is_some())
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    #[test]
    fn fresh_session_is_pending_and_unexpired() {
        let s = Session::new("did:sage:a", "did:sage:b", StdDuration::from_secs(3600));
        assert_eq!(s.status, SessionStatus::Pending);
        assert!(!s.is_expired());
        assert!(!s.is_active());
    }

    #[test]
    fn millisecond_ttl_expires() {
        let mut s = Session::new("did:sage:a", "did:sage:b", StdDuration::from_millis(1));
        s.status = SessionStatus::Active;
        std::thread::sleep(StdDuration::from_millis(10));
        assert!(s.is_expired());
        assert!(!s.is_active());
    }

    #[test]
    fn installing_session_key_scrubs_handshake_material() {
        let mut s = Session::new("did:sage:a", "did:sage:b", StdDuration::from_secs(3600));
        s.ephemeral = Some(sage_crypto::cipher::generate_ephemeral());
        s.shared_secret = Some(SymmetricKey::generate());
        s.install_session_key(SymmetricKey::generate());
        assert!(s.ephemeral.is_none());
        assert!(s.shared_secret.is_none());
        assert!(s.session_key.is_some());
    }

    #[test]
    fn ids_are_unique() {
        let a = Session::new("did:sage:a", "did:sage:b", StdDuration::from_secs(1));
        let b = Session::new("did:sage:a", "did:sage:b", StdDuration::from_secs(1));
        assert_ne!(a.id, b.id);
    }
}
