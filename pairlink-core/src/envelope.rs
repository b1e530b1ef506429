//! Secure envelope codec.
//!
//! Envelope format (JSON):
//! ```text
//! { "data": <hex ciphertext||tag>, "iv": <hex 96-bit nonce> }
//! ```
//!
//! AES-256-GCM under a key derived from the pairing secret. Each encryption
//! generates a fresh random nonce, transmitted in the `iv` field; the GCM
//! tag rides at the end of `data`.
//!
//! Inbound signaling payloads are classified three ways for compatibility
//! with older counterparts:
//! 1. peer version known to always encrypt - decrypt unconditionally
//! 2. payload carries an `iv` field - decrypt
//! 3. otherwise - legacy plaintext, passed through unchanged

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::error::ProtocolError;
use crate::identity::{is_encrypting_version, PairingSecret};

/// Nonce length: 96 bits.
pub const NONCE_LENGTH: usize = 12;

/// GCM authentication tag length.
pub const TAG_LENGTH: usize = 16;

/// An authenticated-encrypted wrapper around a payload.
///
/// Opaque to every component except the codec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecureEnvelope {
    /// Hex ciphertext with the authentication tag appended.
    pub data: String,
    /// Hex 96-bit nonce.
    pub iv: String,
}

/// Classification of an inbound signaling payload.
#[derive(Debug)]
pub enum SignalClass {
    /// Encrypted envelope to decrypt.
    Envelope(SecureEnvelope),
    /// Legacy plaintext from an old counterpart, passed through unchanged.
    LegacyPlaintext(Value),
}

/// Classify an inbound signaling payload per the compatibility policy.
///
/// The first two branches are deliberately identical in behavior; the split
/// mirrors the version-negotiation history and must not be collapsed into
/// hidden semantic differences.
///
/// # Errors
///
/// Returns `MalformedEnvelope` when a branch requires an envelope but the
/// payload is not one.
pub fn classify_signal(
    peer_version: Option<&str>,
    payload: &Value,
) -> Result<SignalClass, ProtocolError> {
    if peer_version.is_some_and(is_encrypting_version) {
        return parse_envelope(payload).map(SignalClass::Envelope);
    }
    if payload.get("iv").is_some() {
        return parse_envelope(payload).map(SignalClass::Envelope);
    }
    Ok(SignalClass::LegacyPlaintext(payload.clone()))
}

fn parse_envelope(payload: &Value) -> Result<SecureEnvelope, ProtocolError> {
    serde_json::from_value(payload.clone()).map_err(|_| ProtocolError::MalformedEnvelope)
}

/// Symmetric codec bound to one pairing secret.
///
/// The AES-256 key is SHA-256 of the 32-byte secret; both ends derive it
/// independently from the display code. Zeroized on drop.
pub struct EnvelopeCodec {
    key: Zeroizing<[u8; 32]>,
}

impl EnvelopeCodec {
    /// Derive the codec from a pairing secret.
    pub fn new(secret: &PairingSecret) -> Self {
        let digest = Sha256::digest(secret.as_bytes());
        let mut key = Zeroizing::new([0u8; 32]);
        key.copy_from_slice(&digest);
        Self { key }
    }

    /// Encrypt a plaintext into an envelope with a fresh random nonce.
    ///
    /// # Errors
    ///
    /// Returns `EncryptionFailed` if the RNG or cipher fails.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<SecureEnvelope, ProtocolError> {
        let mut nonce_bytes = [0u8; NONCE_LENGTH];
        OsRng
            .try_fill_bytes(&mut nonce_bytes)
            .map_err(|_| ProtocolError::EncryptionFailed)?;

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&*self.key));
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|_| ProtocolError::EncryptionFailed)?;

        Ok(SecureEnvelope {
            data: hex::encode(ciphertext),
            iv: hex::encode(nonce_bytes),
        })
    }

    /// Decrypt an envelope back to plaintext.
    ///
    /// # Errors
    ///
    /// `MalformedEnvelope` on bad hex or impossible lengths,
    /// `DecryptionFailed` on authentication tag mismatch.
    pub fn decrypt(&self, envelope: &SecureEnvelope) -> Result<Vec<u8>, ProtocolError> {
        let nonce_bytes =
            hex::decode(&envelope.iv).map_err(|_| ProtocolError::MalformedEnvelope)?;
        if nonce_bytes.len() != NONCE_LENGTH {
            return Err(ProtocolError::MalformedEnvelope);
        }

        let ciphertext =
            hex::decode(&envelope.data).map_err(|_| ProtocolError::MalformedEnvelope)?;
        if ciphertext.len() < TAG_LENGTH {
            return Err(ProtocolError::MalformedEnvelope);
        }

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&*self.key));
        cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_slice())
            .map_err(|_| ProtocolError::DecryptionFailed)
    }

    /// Decrypt an envelope carried as a JSON value.
    ///
    /// Used for data-channel frames and the encrypted version field of the
    /// pairing confirmation. A value that is not envelope-shaped is a
    /// `MalformedEnvelope`; the caller isolates the failure to the frame.
    pub fn decrypt_value(&self, value: &Value) -> Result<Vec<u8>, ProtocolError> {
        let envelope = parse_envelope(value)?;
        self.decrypt(&envelope)
    }

    /// Decrypt an envelope and interpret the plaintext as UTF-8.
    pub fn decrypt_string(&self, envelope: &SecureEnvelope) -> Result<String, ProtocolError> {
        let plaintext = self.decrypt(envelope)?;
        String::from_utf8(plaintext).map_err(|_| ProtocolError::DecryptionFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::SessionKeypair;
    use serde_json::json;

    fn codec() -> EnvelopeCodec {
        let kp = SessionKeypair::generate().unwrap();
        EnvelopeCodec::new(&kp.pairing_secret())
    }

    #[test]
    fn test_roundtrip() {
        let codec = codec();
        let plaintext = br#"{"type":"offer","sdp":"v=0..."}"#;
        let envelope = codec.encrypt(plaintext).unwrap();
        assert_eq!(codec.decrypt(&envelope).unwrap(), plaintext);
    }

    #[test]
    fn test_fresh_nonce_per_call() {
        let codec = codec();
        let a = codec.encrypt(b"same input").unwrap();
        let b = codec.encrypt(b"same input").unwrap();
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.data, b.data);
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let codec = codec();
        let mut envelope = codec.encrypt(b"secret").unwrap();
        let mut raw = hex::decode(&envelope.data).unwrap();
        raw[0] ^= 0xff;
        envelope.data = hex::encode(raw);
        assert_eq!(
            codec.decrypt(&envelope),
            Err(ProtocolError::DecryptionFailed)
        );
    }

    #[test]
    fn test_wrong_key_fails() {
        let envelope = codec().encrypt(b"secret").unwrap();
        assert_eq!(
            codec().decrypt(&envelope),
            Err(ProtocolError::DecryptionFailed)
        );
    }

    #[test]
    fn test_malformed_envelope() {
        let codec = codec();
        let bad_hex = SecureEnvelope {
            data: "zz".into(),
            iv: "00".repeat(NONCE_LENGTH),
        };
        assert_eq!(
            codec.decrypt(&bad_hex),
            Err(ProtocolError::MalformedEnvelope)
        );

        let short = SecureEnvelope {
            data: "aa".into(),
            iv: "00".repeat(NONCE_LENGTH),
        };
        assert_eq!(codec.decrypt(&short), Err(ProtocolError::MalformedEnvelope));

        let bad_iv = SecureEnvelope {
            data: "00".repeat(TAG_LENGTH),
            iv: "0011".into(),
        };
        assert_eq!(
            codec.decrypt(&bad_iv),
            Err(ProtocolError::MalformedEnvelope)
        );
    }

    #[test]
    fn test_classify_known_version_decrypts() {
        let codec = codec();
        let envelope = codec.encrypt(b"payload").unwrap();
        let value = serde_json::to_value(&envelope).unwrap();

        match classify_signal(Some("0.2.0"), &value).unwrap() {
            SignalClass::Envelope(e) => assert_eq!(e, envelope),
            other => panic!("expected envelope, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_iv_presence_decrypts() {
        let codec = codec();
        let envelope = codec.encrypt(b"payload").unwrap();
        let value = serde_json::to_value(&envelope).unwrap();

        // Unknown version, but the iv field marks it encrypted
        match classify_signal(Some("0.0.1"), &value).unwrap() {
            SignalClass::Envelope(e) => assert_eq!(e, envelope),
            other => panic!("expected envelope, got {other:?}"),
        }
        match classify_signal(None, &value).unwrap() {
            SignalClass::Envelope(e) => assert_eq!(e, envelope),
            other => panic!("expected envelope, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_legacy_passthrough() {
        let legacy = json!(r#"{"type":"answer","sdp":"v=0..."}"#);
        match classify_signal(Some("0.0.1"), &legacy).unwrap() {
            SignalClass::LegacyPlaintext(v) => assert_eq!(v, legacy),
            other => panic!("expected legacy passthrough, got {other:?}"),
        }
        match classify_signal(None, &legacy).unwrap() {
            SignalClass::LegacyPlaintext(v) => assert_eq!(v, legacy),
            other => panic!("expected legacy passthrough, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_known_version_rejects_non_envelope() {
        // A counterpart that claims an encrypting version must send envelopes
        let legacy = json!({"type": "answer"});
        assert!(matches!(
            classify_signal(Some("0.2.0"), &legacy),
            Err(ProtocolError::MalformedEnvelope)
        ));
    }

    #[test]
    fn test_decrypt_value() {
        let codec = codec();
        let envelope = codec.encrypt(b"hello").unwrap();
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(codec.decrypt_value(&value).unwrap(), b"hello");
        assert_eq!(
            codec.decrypt_value(&json!("not an envelope")),
            Err(ProtocolError::MalformedEnvelope)
        );
    }
}
