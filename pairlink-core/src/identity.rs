//! Session identity and pairing code.
//!
//! Each pairing attempt owns exactly one keypair, generated fresh from the
//! OS CSPRNG and never persisted. The 32-byte seed doubles as the pairing
//! secret shared out-of-band through the display code; the counterpart
//! derives the same envelope key from it.
//!
//! # Security Invariants
//!
//! - Key material is zeroized on drop
//! - The connection id is derived once and is immutable for the attempt
//! - A terminal failure requires a fresh keypair to retry

use ed25519_dalek::{Signer, SigningKey};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use zeroize::Zeroizing;

use crate::error::ProtocolError;

/// Protocol version advertised in the display code.
pub const PROTOCOL_VERSION: &str = "0.2.0";

/// Separator between the display code fields.
pub const CODE_SEPARATOR: char = '_';

/// Peer versions known to always envelope their signaling payloads.
///
/// A counterpart reporting any of these versions is decrypted
/// unconditionally; anything else falls back to the iv-presence check.
pub const ENCRYPTED_PEER_VERSIONS: &[&str] = &["0.1.1", "0.2.0"];

/// Check whether a reported peer version always encrypts.
pub fn is_encrypting_version(version: &str) -> bool {
    ENCRYPTED_PEER_VERSIONS.contains(&version)
}

/// The 32-byte pairing secret shared out-of-band via the display code.
///
/// Zeroized on drop. Does not implement `Clone`.
pub struct PairingSecret(Zeroizing<[u8; 32]>);

impl PairingSecret {
    /// Wrap raw secret bytes (e.g. parsed from a scanned pairing code).
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(Zeroizing::new(bytes))
    }

    /// Raw secret bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex rendering for the display code.
    pub fn to_hex(&self) -> String {
        hex::encode(*self.0)
    }
}

impl fmt::Debug for PairingSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PairingSecret(..)")
    }
}

/// Public routing identifier: hex SHA-256 digest of the public key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Derive from a 32-byte public key. Deterministic.
    pub fn derive(public_key: &[u8; 32]) -> Self {
        let digest = Sha256::digest(public_key);
        Self(hex::encode(digest))
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Random challenge material signed at session start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeMaterial(String);

impl ChallengeMaterial {
    /// Generate 32 random bytes of challenge material, hex encoded.
    pub fn generate() -> Result<Self, ProtocolError> {
        let mut bytes = [0u8; 32];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|_| ProtocolError::IdentityFailure)?;
        Ok(Self(hex::encode(bytes)))
    }

    /// The material as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Session-scoped keypair.
///
/// Generated fresh for each pairing attempt. Never persisted.
/// `ed25519_dalek::SigningKey` zeroizes its seed on drop.
pub struct SessionKeypair {
    signing: SigningKey,
}

impl SessionKeypair {
    /// Generate a new keypair from the OS CSPRNG.
    ///
    /// # Errors
    ///
    /// Returns `IdentityFailure` if the random source fails. Fatal: the
    /// session cannot proceed without an identity.
    pub fn generate() -> Result<Self, ProtocolError> {
        let mut seed = Zeroizing::new([0u8; 32]);
        OsRng
            .try_fill_bytes(&mut *seed)
            .map_err(|_| ProtocolError::IdentityFailure)?;
        Ok(Self {
            signing: SigningKey::from_bytes(&seed),
        })
    }

    /// Reconstruct the keypair from a pairing secret.
    ///
    /// Used by the counterpart after scanning the display code.
    pub fn from_secret(secret: &PairingSecret) -> Self {
        Self {
            signing: SigningKey::from_bytes(secret.as_bytes()),
        }
    }

    /// The 32-byte public key.
    pub fn public_key(&self) -> [u8; 32] {
        self.signing.verifying_key().to_bytes()
    }

    /// Derive the immutable connection id for this keypair.
    pub fn connection_id(&self) -> ConnectionId {
        ConnectionId::derive(&self.public_key())
    }

    /// The pairing secret embedded in the display code.
    pub fn pairing_secret(&self) -> PairingSecret {
        PairingSecret::from_bytes(self.signing.to_bytes())
    }

    /// Sign challenge material, returning the hex-encoded signature.
    pub fn sign(&self, material: &ChallengeMaterial) -> String {
        let signature = self.signing.sign(material.as_str().as_bytes());
        hex::encode(signature.to_bytes())
    }
}

impl fmt::Debug for SessionKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionKeypair")
            .field("connection_id", &self.connection_id())
            .finish()
    }
}

/// Assemble the display code: `version _ secret-hex _ connection-id`.
///
/// The secret hex is the raw private key material; the code is the pairing
/// secret shared out-of-band (QR scan) with the counterpart.
pub fn pairing_code(secret_hex: &str, conn_id: &ConnectionId) -> String {
    format!(
        "{}{}{}{}{}",
        PROTOCOL_VERSION,
        CODE_SEPARATOR,
        secret_hex,
        CODE_SEPARATOR,
        conn_id
    )
}

/// A parsed display code.
#[derive(Debug)]
pub struct ParsedCode {
    /// Protocol version the initiator advertised.
    pub version: String,
    /// The shared pairing secret.
    pub secret: PairingSecret,
    /// The initiator's connection id.
    pub connection_id: ConnectionId,
}

/// Parse a display code scanned from the initiator.
///
/// # Errors
///
/// Returns `InvalidPairingCode` if the code does not have exactly three
/// separator-delimited fields or the secret is not 32 bytes of hex.
pub fn parse_pairing_code(code: &str) -> Result<ParsedCode, ProtocolError> {
    let mut parts = code.split(CODE_SEPARATOR);
    let (version, secret_hex, conn_id) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(v), Some(s), Some(c), None) if !v.is_empty() && !c.is_empty() => (v, s, c),
        _ => return Err(ProtocolError::InvalidPairingCode),
    };

    let raw = hex::decode(secret_hex).map_err(|_| ProtocolError::InvalidPairingCode)?;
    let bytes: [u8; 32] = raw
        .try_into()
        .map_err(|_| ProtocolError::InvalidPairingCode)?;

    Ok(ParsedCode {
        version: version.to_string(),
        secret: PairingSecret::from_bytes(bytes),
        connection_id: ConnectionId(conn_id.to_string()),
    })
}
