//! Identity key management
//!
//! Each agent has one long-term `IdentityKeyPair` (Ed25519), named on the
//! wire by the agent's DID. The signing key never leaves this type; drop
//! clears memory via ZeroizeOnDrop.
//!
//! Ed25519 is strictly a signing primitive here. Handshake key agreement
//! uses separate X25519 ephemeral keys (see `cipher`); there is no
//! Ed25519 → X25519 conversion.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier as _, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use zeroize::ZeroizeOnDrop;

use crate::error::CryptoError;

/// 32-byte Ed25519 public key, base64url-encoded on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKeyBytes(pub Vec<u8>);

impl PublicKeyBytes {
    pub fn to_b64(&self) -> String {
        URL_SAFE_NO_PAD.encode(&self.0)
    }

    pub fn from_b64(s: &str) -> Result<Self, CryptoError> {
        let bytes = URL_SAFE_NO_PAD.decode(s)?;
        if bytes.len() != 32 {
            return Err(CryptoError::InvalidPublicKey {
                expected: 32,
                got: bytes.len(),
            });
        }
        Ok(Self(bytes))
    }

    /// Human-readable fingerprint: BLAKE3 of the public key, truncated to
    /// 20 bytes, hex-encoded in groups of 4 for display.
    pub fn fingerprint(&self) -> String {
        let hash = blake3::hash(&self.0);
        let hex = hex::encode(&hash.as_bytes()[..20]);
        hex.chars()
            .collect::<Vec<_>>()
            .chunks(4)
            .map(|c| c.iter().collect::<String>())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Long-term identity signing key. Drop clears memory via ZeroizeOnDrop.
#[derive(ZeroizeOnDrop)]
pub struct IdentityKeyPair {
    #[zeroize(skip)]
    pub public: PublicKeyBytes,
    secret_bytes: [u8; 32],
}

impl IdentityKeyPair {
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        let public = PublicKeyBytes(signing_key.verifying_key().to_bytes().to_vec());
        let secret_bytes = signing_key.to_bytes();
        Self {
            public,
            secret_bytes,
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != 32 {
            return Err(CryptoError::InvalidKey(format!(
                "identity key must be 32 bytes, got {}",
                bytes.len()
            )));
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(bytes);
        let signing_key = SigningKey::from_bytes(&arr);
        let public = PublicKeyBytes(signing_key.verifying_key().to_bytes().to_vec());
        Ok(Self {
            public,
            secret_bytes: arr,
        })
    }

    pub fn secret_bytes(&self) -> &[u8; 32] {
        &self.secret_bytes
    }

    pub(crate) fn signing_key(&self) -> SigningKey {
        SigningKey::from_bytes(&self.secret_bytes)
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key().verifying_key()
    }

    /// Sign arbitrary bytes; returns the 64-byte raw Ed25519 signature.
    pub fn sign(&self, msg: &[u8]) -> Vec<u8> {
        self.signing_key().sign(msg).to_bytes().to_vec()
    }

    /// Verify a signature made by any Ed25519 public key.
    pub fn verify(public_bytes: &[u8], msg: &[u8], sig_bytes: &[u8]) -> Result<(), CryptoError> {
        let vk = VerifyingKey::from_bytes(
            public_bytes
                .try_into()
                .map_err(|_| CryptoError::InvalidPublicKey {
                    expected: 32,
                    got: public_bytes.len(),
                })?,
        )
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        let sig = Signature::from_bytes(
            sig_bytes
                .try_into()
                .map_err(|_| CryptoError::InvalidKey("bad signature length".into()))?,
        );
        vk.verify(msg, &sig)
            .map_err(|_| CryptoError::SignatureInvalid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_verify_roundtrip() {
        let pair = IdentityKeyPair::generate();
        let sig = pair.sign(b"hello");
        IdentityKeyPair::verify(&pair.public.0, b"hello", &sig).unwrap();
    }

    #[test]
    fn wrong_key_rejected() {
        let pair = IdentityKeyPair::generate();
        let other = IdentityKeyPair::generate();
        let sig = pair.sign(b"hello");
        let err = IdentityKeyPair::verify(&other.public.0, b"hello", &sig).unwrap_err();
        assert!(matches!(err, CryptoError::SignatureInvalid));
    }

    #[test]
    fn from_bytes_recovers_public_half() {
        let pair = IdentityKeyPair::generate();
        let restored = IdentityKeyPair::from_bytes(pair.secret_bytes()).unwrap();
        assert_eq!(pair.public, restored.public);
    }

    #[test]
    fn fingerprint_is_grouped_hex() {
        let pair = IdentityKeyPair::generate();
        let fp = pair.public.fingerprint();
        assert_eq!(fp.split(' ').count(), 10);
    }
}
