//! Identity key persistence.
//!
//! Two on-disk formats: PKCS#8 PEM (via ed25519-dalek's pkcs8 support)
//! and OKP JWK (RFC 8037: `kty: "OKP"`, `crv: "Ed25519"`). `load`
//! auto-detects the format from the content; `save` takes it
//! explicitly. Private material never transits through intermediate
//! strings beyond what the encoders require.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use ed25519_dalek::pkcs8::{DecodePrivateKey, EncodePrivateKey};
use pkcs8::LineEnding;
use ed25519_dalek::SigningKey;
use serde::{Deserialize, Serialize};
use std::path::Path;
use zeroize::Zeroizing;

use sage_crypto::keys::IdentityKeyPair;

use crate::error::TransportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFormat {
    Pem,
    Jwk,
}

pub trait KeyStore: Send + Sync {
    /// Load an identity keypair, auto-detecting PEM vs JWK.
    fn load(&self, path: &Path) -> Result<IdentityKeyPair, TransportError>;

    fn save(
        &self,
        key: &IdentityKeyPair,
        path: &Path,
        format: KeyFormat,
    ) -> Result<(), TransportError>;

    /// Public half as a JWK string, suitable for publication.
    fn export_public(&self, key: &IdentityKeyPair) -> Result<String, TransportError>;
}

/// OKP JWK as serialised to disk. `d` is present only for private keys.
#[derive(Serialize, Deserialize)]
struct OkpJwk {
    kty: String,
    crv: String,
    x: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    d: Option<String>,
}

#[derive(Default)]
pub struct FileKeyStore;

impl FileKeyStore {
    pub fn new() -> Self {
        Self
    }

    fn load_pem(content: &str) -> Result<IdentityKeyPair, TransportError> {
        let signing_key =
            SigningKey::from_pkcs8_pem(content).map_err(|e| TransportError::DecodeError {
                field: "pem",
                reason: e.to_string(),
            })?;
        Ok(IdentityKeyPair::from_bytes(&signing_key.to_bytes())?)
    }

    fn load_jwk(content: &str) -> Result<IdentityKeyPair, TransportError> {
        let jwk: OkpJwk =
            serde_json::from_str(content).map_err(|e| TransportError::DecodeError {
                field: "jwk",
                reason: e.to_string(),
            })?;
        if jwk.kty != "OKP" || jwk.crv != "Ed25519" {
            return Err(TransportError::DecodeError {
                field: "jwk",
                reason: format!("unsupported key type {}/{}", jwk.kty, jwk.crv),
            });
        }
        let d = jwk.d.ok_or(TransportError::DecodeError {
            field: "jwk",
            reason: "missing private component d".into(),
        })?;
        let secret = Zeroizing::new(URL_SAFE_NO_PAD.decode(d.as_bytes()).map_err(|e| {
            TransportError::DecodeError {
                field: "jwk",
                reason: e.to_string(),
            }
        })?);
        let pair = IdentityKeyPair::from_bytes(&secret)?;
        // The x component must agree with the derived public key.
        if jwk.x != pair.public.to_b64() {
            return Err(TransportError::DecodeError {
                field: "jwk",
                reason: "public component x does not match private key".into(),
            });
        }
        Ok(pair)
    }
}

impl KeyStore for FileKeyStore {
    fn load(&self, path: &Path) -> Result<IdentityKeyPair, TransportError> {
        let content = Zeroizing::new(std::fs::read_to_string(path)?);
        if content.trim_start().starts_with("-----BEGIN") {
            Self::load_pem(&content)
        } else {
            Self::load_jwk(&content)
        }
    }

    fn save(
        &self,
        key: &IdentityKeyPair,
        path: &Path,
        format: KeyFormat,
    ) -> Result<(), TransportError> {
        let content = match format {
            KeyFormat::Pem => {
                let signing_key = SigningKey::from_bytes(key.secret_bytes());
                signing_key
                    .to_pkcs8_pem(LineEnding::LF)
                    .map_err(|e| TransportError::Internal(format!("pkcs8 encode: {e}")))?
            }
            KeyFormat::Jwk => {
                let jwk = OkpJwk {
                    kty: "OKP".into(),
                    crv: "Ed25519".into(),
                    x: key.public.to_b64(),
                    d: Some(URL_SAFE_NO_PAD.encode(key.secret_bytes())),
                };
                Zeroizing::new(
                    serde_json::to_string_pretty(&jwk)
                        .map_err(|e| TransportError::Internal(format!("jwk encode: {e}")))?,
                )
            }
        };
        std::fs::write(path, content.as_bytes())?;
        Ok(())
    }

    fn export_public(&self, key: &IdentityKeyPair) -> Result<String, TransportError> {
        let jwk = OkpJwk {
            kty: "OKP".into(),
            crv: "Ed25519".into(),
            x: key.public.to_b64(),
            d: None,
        };
        serde_json::to_string_pretty(&jwk)
            .map_err(|e| TransportError::Internal(format!("jwk encode: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pem_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.pem");
        let store = FileKeyStore::new();
        let pair = IdentityKeyPair::generate();
        store.save(&pair, &path, KeyFormat::Pem).unwrap();
        let loaded = store.load(&path).unwrap();
        assert_eq!(pair.public, loaded.public);
    }

    #[test]
    fn jwk_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.jwk");
        let store = FileKeyStore::new();
        let pair = IdentityKeyPair::generate();
        store.save(&pair, &path, KeyFormat::Jwk).unwrap();
        let loaded = store.load(&path).unwrap();
        assert_eq!(pair.public, loaded.public);
    }

    #[test]
    fn load_detects_format_from_content() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileKeyStore::new();
        let pair = IdentityKeyPair::generate();

        let pem_path = dir.path().join("k1");
        store.save(&pair, &pem_path, KeyFormat::Pem).unwrap();
        assert_eq!(store.load(&pem_path).unwrap().public, pair.public);

        let jwk_path = dir.path().join("k2");
        store.save(&pair, &jwk_path, KeyFormat::Jwk).unwrap();
        assert_eq!(store.load(&jwk_path).unwrap().public, pair.public);
    }

    #[test]
    fn public_jwk_has_no_private_component() {
        let store = FileKeyStore::new();
        let pair = IdentityKeyPair::generate();
        let jwk = store.export_public(&pair).unwrap();
        assert!(jwk.contains(r#""x""#));
        assert!(!jwk.contains(r#""d""#));
    }

    #[test]
    fn tampered_jwk_public_component_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.jwk");
        let store = FileKeyStore::new();
        let pair = IdentityKeyPair::generate();
        let other = IdentityKeyPair::generate();
        store.save(&pair, &path, KeyFormat::Jwk).unwrap();

        let mut jwk: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        jwk["x"] = serde_json::Value::String(other.public.to_b64());
        std::fs::write(&path, serde_json::to_string(&jwk).unwrap()).unwrap();

        assert!(store.load(&path).is_err());
    }
}
