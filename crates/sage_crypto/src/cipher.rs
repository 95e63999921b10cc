//! Key agreement and authenticated encryption.
//!
//! X25519 ECDH → HKDF-SHA256 (info `SAGE-HPKE-v1`, empty salt, 32-byte
//! output) for key derivation; ChaCha20-Poly1305 with a random 12-byte
//! nonce per ciphertext for sealing. Plaintexts are canonical JSON.
//!
//! Envelope wire format: `{algorithm, ciphertext, nonce}` with both
//! binary fields base64url-encoded. `algorithm` is `ChaCha20-Poly1305`
//! for symmetric seals and `HPKE` when the recipient must first derive
//! the key from exchanged ephemeral public keys.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chacha20poly1305::{
    aead::{Aead, AeadCore, KeyInit, OsRng as AeadOsRng},
    ChaCha20Poly1305, Nonce,
};
use hkdf::Hkdf;
use rand::{rngs::OsRng, RngCore};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::Sha256;
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::ZeroizeOnDrop;

use crate::{canonical, error::CryptoError};

/// HKDF domain separator for all handshake-derived keys.
pub const HKDF_INFO: &[u8] = b"SAGE-HPKE-v1";

const NONCE_LEN: usize = 12;

/// 32-byte symmetric key (shared secret or session key). Zeroized on drop.
#[derive(Clone, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; 32]);

impl SymmetricKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_b64(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.0)
    }

    pub fn from_b64(s: &str) -> Result<Self, CryptoError> {
        let bytes = URL_SAFE_NO_PAD.decode(s)?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKey("symmetric key must be 32 bytes".into()))?;
        Ok(Self(arr))
    }

    /// Fresh random session key from the platform CSPRNG.
    pub fn generate() -> Self {
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        Self(key)
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SymmetricKey(..)")
    }
}

/// AEAD envelope as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedPayload {
    pub algorithm: AeadAlgorithm,
    /// base64url ciphertext + tag
    pub ciphertext: String,
    /// base64url 12-byte nonce
    pub nonce: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AeadAlgorithm {
    #[serde(rename = "ChaCha20-Poly1305")]
    ChaCha20Poly1305,
    #[serde(rename = "HPKE")]
    Hpke,
}

/// Ephemeral X25519 keypair, used within a single handshake.
/// The secret zeroizes on drop (x25519-dalek).
#[derive(Clone)]
pub struct EphemeralKeyPair {
    pub secret: StaticSecret,
    pub public: [u8; 32],
}

impl EphemeralKeyPair {
    pub fn public_b64(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.public)
    }
}

/// Generate a fresh ephemeral X25519 keypair.
pub fn generate_ephemeral() -> EphemeralKeyPair {
    let secret = StaticSecret::random_from_rng(OsRng);
    let public = X25519Public::from(&secret).to_bytes();
    EphemeralKeyPair { secret, public }
}

/// ECDH + HKDF: derive the 32-byte shared key from our secret and the
/// peer's ephemeral public key bytes.
pub fn derive_shared(secret: &StaticSecret, peer_public: &[u8]) -> Result<SymmetricKey, CryptoError> {
    let peer: [u8; 32] = peer_public
        .try_into()
        .map_err(|_| CryptoError::InvalidPublicKey {
            expected: 32,
            got: peer_public.len(),
        })?;
    let shared = secret.diffie_hellman(&X25519Public::from(peer));
    if !shared.was_contributory() {
        return Err(CryptoError::DerivationFailed(
            "non-contributory X25519 exchange (low-order point)".into(),
        ));
    }
    let hk = Hkdf::<Sha256>::new(None, shared.as_bytes());
    let mut key = [0u8; 32];
    hk.expand(HKDF_INFO, &mut key)
        .map_err(|e| CryptoError::DerivationFailed(e.to_string()))?;
    Ok(SymmetricKey(key))
}

/// Fresh handshake nonce: 16 CSPRNG bytes, base64url.
pub fn generate_nonce() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn seal<T: Serialize>(
    key: &SymmetricKey,
    value: &T,
    algorithm: AeadAlgorithm,
) -> Result<EncryptedPayload, CryptoError> {
    let plaintext = canonical::to_canonical_vec(value)?;
    let cipher =
        ChaCha20Poly1305::new_from_slice(&key.0).map_err(|_| CryptoError::AeadEncrypt)?;
    let nonce = ChaCha20Poly1305::generate_nonce(&mut AeadOsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext.as_slice())
        .map_err(|_| CryptoError::AeadEncrypt)?;
    Ok(EncryptedPayload {
        algorithm,
        ciphertext: URL_SAFE_NO_PAD.encode(ciphertext),
        nonce: URL_SAFE_NO_PAD.encode(nonce),
    })
}

/// Seal `value` under a 32-byte symmetric key.
pub fn encrypt<T: Serialize>(
    key: &SymmetricKey,
    value: &T,
) -> Result<EncryptedPayload, CryptoError> {
    seal(key, value, AeadAlgorithm::ChaCha20Poly1305)
}

/// Open an envelope and deserialise the plaintext into `T`.
pub fn decrypt<T: DeserializeOwned>(
    key: &SymmetricKey,
    payload: &EncryptedPayload,
) -> Result<T, CryptoError> {
    let nonce_bytes = URL_SAFE_NO_PAD.decode(&payload.nonce)?;
    if nonce_bytes.len() != NONCE_LEN {
        return Err(CryptoError::InvalidKey(format!(
            "AEAD nonce must be {NONCE_LEN} bytes, got {}",
            nonce_bytes.len()
        )));
    }
    let ciphertext = URL_SAFE_NO_PAD.decode(&payload.ciphertext)?;
    let cipher =
        ChaCha20Poly1305::new_from_slice(&key.0).map_err(|_| CryptoError::AuthFailure)?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_slice())
        .map_err(|_| CryptoError::AuthFailure)?;
    Ok(serde_json::from_slice(&plaintext)?)
}

/// Seal `value` under a key the recipient must first derive from
/// exchanged ephemeral public keys. Same AEAD as [`encrypt`]; the `HPKE`
/// label tells the recipient which derivation applies.
pub fn encrypt_hpke<T: Serialize>(
    key: &SymmetricKey,
    value: &T,
) -> Result<EncryptedPayload, CryptoError> {
    seal(key, value, AeadAlgorithm::Hpke)
}

/// Counterpart of [`encrypt_hpke`]: derive the shared key from our
/// ephemeral secret and the sender's ephemeral public key, then open.
/// Returns the plaintext together with the derived key so the caller can
/// continue the exchange under it.
pub fn open_from_public<T: DeserializeOwned>(
    payload: &EncryptedPayload,
    my_secret: &StaticSecret,
    peer_ephemeral_public: &[u8],
) -> Result<(T, SymmetricKey), CryptoError> {
    let shared = derive_shared(my_secret, peer_ephemeral_public)?;
    let value = decrypt(&shared, payload)?;
    Ok((value, shared))
}
