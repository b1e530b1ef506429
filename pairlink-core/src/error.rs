//! Protocol errors.
//!
//! Identity failures are fatal: the session cannot start without a keypair.
//! Envelope failures are scoped to the offending frame; the caller decides
//! whether to drop the frame or tear the session down.

use std::fmt;

/// All possible protocol-core errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    /// Key generation or challenge material generation failed (RNG failure)
    IdentityFailure,

    /// Envelope encryption failed
    EncryptionFailed,

    /// Authentication tag mismatch or undecryptable ciphertext
    DecryptionFailed,

    /// Payload is not a well-formed envelope (bad hex, bad lengths, wrong shape)
    MalformedEnvelope,

    /// Pairing code does not match `version_secret_connectionid`
    InvalidPairingCode,

    /// Lifecycle event not allowed in the current stage
    StageViolation,

    /// Session has reached a terminal stage
    SessionTerminal,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Deliberately terse. Do not leak details.
        match self {
            Self::IdentityFailure => write!(f, "identity failure"),
            Self::EncryptionFailed => write!(f, "encryption failed"),
            Self::DecryptionFailed => write!(f, "decryption failed"),
            Self::MalformedEnvelope => write!(f, "malformed envelope"),
            Self::InvalidPairingCode => write!(f, "invalid pairing code"),
            Self::StageViolation => write!(f, "stage violation"),
            Self::SessionTerminal => write!(f, "session terminal"),
        }
    }
}

impl std::error::Error for ProtocolError {}
