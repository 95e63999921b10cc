//! DID resolution collaborator interface.
//!
//! The core needs exactly one thing from the identity layer: a DID's
//! long-term Ed25519 verification key and whether the DID is still
//! live. Blockchain-backed resolvers implement [`DidResolver`];
//! [`StaticResolver`] is the in-memory implementation used by the
//! service binary and tests.

use parking_lot::RwLock;
use std::collections::HashMap;

use sage_crypto::keys::PublicKeyBytes;

use crate::error::TransportError;

/// A verification key as a resolver returns it. The core accepts only
/// Ed25519; anything else is a [`TransportError::PublicKeyTypeMismatch`].
#[derive(Debug, Clone)]
pub enum VerificationKey {
    Ed25519(PublicKeyBytes),
    Unsupported { key_type: String },
}

#[derive(Debug, Clone)]
pub struct ResolvedDid {
    pub key: VerificationKey,
    /// False once the DID has been deactivated upstream.
    pub live: bool,
}

pub trait DidResolver: Send + Sync {
    fn resolve(&self, did: &str) -> Result<ResolvedDid, TransportError>;

    /// Resolve and insist on a live Ed25519 key.
    fn resolve_ed25519(&self, did: &str) -> Result<PublicKeyBytes, TransportError> {
        let resolved = self.resolve(did)?;
        if !resolved.live {
            return Err(TransportError::InvalidInput {
                field: "did",
                reason: format!("{did} has been deactivated"),
            });
        }
        match resolved.key {
            VerificationKey::Ed25519(key) => Ok(key),
            VerificationKey::Unsupported { key_type } => {
                Err(TransportError::PublicKeyTypeMismatch {
                    did: did.to_string(),
                    key_type,
                })
            }
        }
    }
}

/// In-memory resolver: a registered key per DID plus a liveness flag.
#[derive(Default)]
pub struct StaticResolver {
    entries: RwLock<HashMap<String, ResolvedDid>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, did: &str, key: PublicKeyBytes) {
        self.entries.write().insert(
            did.to_string(),
            ResolvedDid {
                key: VerificationKey::Ed25519(key),
                live: true,
            },
        );
    }

    pub fn register_unsupported(&self, did: &str, key_type: &str) {
        self.entries.write().insert(
            did.to_string(),
            ResolvedDid {
                key: VerificationKey::Unsupported {
                    key_type: key_type.to_string(),
                },
                live: true,
            },
        );
    }

    pub fn deactivate(&self, did: &str) {
        if let Some(entry) = self.entries.write().get_mut(did) {
            entry.live = false;
        }
    }
}

impl DidResolver for StaticResolver {
    fn resolve(&self, did: &str) -> Result<ResolvedDid, TransportError> {
        self.entries
            .read()
            .get(did)
            .cloned()
            .ok_or_else(|| TransportError::InvalidInput {
                field: "did",
                reason: format!("unknown DID {did}"),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sage_crypto::keys::IdentityKeyPair;

    #[test]
    fn resolves_registered_key() {
        let resolver = StaticResolver::new();
        let pair = IdentityKeyPair::generate();
        resolver.register("did:sage:alice", pair.public.clone());
        let key = resolver.resolve_ed25519("did:sage:alice").unwrap();
        assert_eq!(key, pair.public);
    }

    #[test]
    fn unknown_did_fails() {
        let resolver = StaticResolver::new();
        assert!(resolver.resolve_ed25519("did:sage:nobody").is_err());
    }

    #[test]
    fn non_ed25519_key_is_a_type_mismatch() {
        let resolver = StaticResolver::new();
        resolver.register_unsupported("did:sage:secp", "EcdsaSecp256k1VerificationKey2019");
        let err = resolver.resolve_ed25519("did:sage:secp").unwrap_err();
        assert!(matches!(
            err,
            TransportError::PublicKeyTypeMismatch { .. }
        ));
    }

    #[test]
    fn deactivated_did_is_rejected() {
        let resolver = StaticResolver::new();
        let pair = IdentityKeyPair::generate();
        resolver.register("did:sage:alice", pair.public.clone());
        resolver.deactivate("did:sage:alice");
        assert!(resolver.resolve_ed25519("did:sage:alice").is_err());
    }
}
