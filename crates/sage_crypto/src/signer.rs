//! Detached signatures over wire records.
//!
//! The signature base for a record R is
//! `BASE64(BLAKE3-256(canonical_json(R with signature cleared)))`; the
//! signature itself is Ed25519 over `BLAKE3-256(base)`. Both peers must
//! rebuild the base identically, which is what [`crate::canonical`]
//! guarantees.
//!
//! Freshness is a signer concern too: records carry a UTC timestamp and
//! [`check_timestamp`] bounds the accepted wall-clock skew.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{canonical, error::CryptoError, keys::IdentityKeyPair};

/// The only signature algorithm accepted on the wire.
pub const ALGORITHM_EDDSA: &str = "EdDSA";

/// Signature envelope embedded in signed records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureEnvelope {
    pub algorithm: String,
    /// Key identifier chosen by the signer, typically `<did>#key-1`.
    pub key_id: String,
    /// base64url 64-byte Ed25519 signature
    pub value: String,
}

/// A record that carries a detached signature. The base is computed with
/// the signature field cleared, so signing and verification agree on the
/// exact bytes covered.
pub trait SignedRecord: Serialize + Clone {
    fn signature(&self) -> Option<&SignatureEnvelope>;
    fn clear_signature(&mut self);
    fn set_signature(&mut self, envelope: SignatureEnvelope);
}

/// Compute the deterministic signature base for a record.
pub fn signature_base<R: SignedRecord>(record: &R) -> Result<String, CryptoError> {
    let mut unsigned = record.clone();
    unsigned.clear_signature();
    let bytes = canonical::to_canonical_vec(&unsigned)?;
    Ok(URL_SAFE_NO_PAD.encode(blake3::hash(&bytes).as_bytes()))
}

/// Sign `record` in place with the agent's identity key.
pub fn sign_record<R: SignedRecord>(
    record: &mut R,
    key: &IdentityKeyPair,
    key_id: &str,
) -> Result<(), CryptoError> {
    let base = signature_base(record)?;
    let digest = blake3::hash(base.as_bytes());
    let sig = key.sign(digest.as_bytes());
    record.set_signature(SignatureEnvelope {
        algorithm: ALGORITHM_EDDSA.to_string(),
        key_id: key_id.to_string(),
        value: URL_SAFE_NO_PAD.encode(sig),
    });
    Ok(())
}

/// Verify a record's detached signature against an Ed25519 public key.
///
/// Rejects a missing envelope, an algorithm other than `EdDSA`, an empty
/// key id, an undecodable signature, and of course a bad signature — all
/// as [`CryptoError::SignatureInvalid`].
pub fn verify_record<R: SignedRecord>(record: &R, public_key: &[u8]) -> Result<(), CryptoError> {
    let envelope = record.signature().ok_or(CryptoError::SignatureInvalid)?;
    if envelope.algorithm != ALGORITHM_EDDSA || envelope.key_id.is_empty() {
        return Err(CryptoError::SignatureInvalid);
    }
    let sig_bytes = URL_SAFE_NO_PAD
        .decode(&envelope.value)
        .map_err(|_| CryptoError::SignatureInvalid)?;
    let base = signature_base(record)?;
    let digest = blake3::hash(base.as_bytes());
    IdentityKeyPair::verify(public_key, digest.as_bytes(), &sig_bytes)
}

/// Reject timestamps outside `|now − t| ≤ max_skew`.
pub fn check_timestamp(timestamp: DateTime<Utc>, max_skew: Duration) -> Result<(), CryptoError> {
    let max_skew_secs = max_skew.as_secs() as i64;
    let delta = (Utc::now() - timestamp).num_seconds().abs();
    if delta > max_skew_secs {
        return Err(CryptoError::TimestampSkew {
            timestamp,
            max_skew_secs,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Ping {
        from_did: String,
        seq: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        signature: Option<SignatureEnvelope>,
    }

    impl SignedRecord for Ping {
        fn signature(&self) -> Option<&SignatureEnvelope> {
            self.signature.as_ref()
        }
        fn clear_signature(&mut self) {
            self.signature = None;
        }
        fn set_signature(&mut self, envelope: SignatureEnvelope) {
            self.signature = Some(envelope);
        }
    }

    fn ping() -> Ping {
        Ping {
            from_did: "did:sage:alice".into(),
            seq: 7,
            signature: None,
        }
    }

    #[test]
    fn sign_verify_roundtrip() {
        let key = IdentityKeyPair::generate();
        let mut record = ping();
        sign_record(&mut record, &key, "did:sage:alice#key-1").unwrap();
        verify_record(&record, &key.public.0).unwrap();
    }

    #[test]
    fn base_is_stable_across_signing() {
        let key = IdentityKeyPair::generate();
        let mut record = ping();
        let before = signature_base(&record).unwrap();
        sign_record(&mut record, &key, "did:sage:alice#key-1").unwrap();
        // The envelope is cleared before hashing, so the base is unchanged.
        assert_eq!(before, signature_base(&record).unwrap());
    }

    #[test]
    fn mutated_field_breaks_verification() {
        let key = IdentityKeyPair::generate();
        let mut record = ping();
        sign_record(&mut record, &key, "did:sage:alice#key-1").unwrap();
        record.seq = 8;
        let err = verify_record(&record, &key.public.0).unwrap_err();
        assert!(matches!(err, CryptoError::SignatureInvalid));
    }

    #[test]
    fn wrong_key_rejected() {
        let key = IdentityKeyPair::generate();
        let other = IdentityKeyPair::generate();
        let mut record = ping();
        sign_record(&mut record, &key, "did:sage:alice#key-1").unwrap();
        let err = verify_record(&record, &other.public.0).unwrap_err();
        assert!(matches!(err, CryptoError::SignatureInvalid));
    }

    #[test]
    fn foreign_algorithm_rejected() {
        let key = IdentityKeyPair::generate();
        let mut record = ping();
        sign_record(&mut record, &key, "did:sage:alice#key-1").unwrap();
        record.signature.as_mut().unwrap().algorithm = "ES256".into();
        assert!(verify_record(&record, &key.public.0).is_err());
    }

    #[test]
    fn skew_check() {
        let max = Duration::from_secs(300);
        check_timestamp(Utc::now(), max).unwrap();
        let stale = Utc::now() - chrono::Duration::seconds(400);
        let err = check_timestamp(stale, max).unwrap_err();
        assert!(matches!(err, CryptoError::TimestampSkew { .. }));
    }
}
