//! Session errors.

use std::fmt;

use pairlink_core::{FailureReason, ProtocolError};

/// Errors surfaced by the session layer.
///
/// Identity and pairing-rejection failures are terminal for the connection
/// id. Per-frame failures (decryption, parse) never appear here; they are
/// logged and the frame dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Key generation or signing failed; the session cannot start.
    Identity(ProtocolError),

    /// Protocol-core error in a fatal position.
    Protocol(ProtocolError),

    /// Failed to open or use the relay connection.
    RelayFailed(String),

    /// The relay rejected the pairing. Terminal for this connection id.
    PairingRejected(FailureReason),

    /// The peer transport failed before or instead of connecting.
    TransportFailed,

    /// The session has already closed.
    Closed,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Identity(e) => write!(f, "identity error: {}", e),
            Self::Protocol(e) => write!(f, "protocol error: {}", e),
            Self::RelayFailed(msg) => write!(f, "relay failed: {}", msg),
            Self::PairingRejected(reason) => write!(f, "pairing rejected: {}", reason),
            Self::TransportFailed => write!(f, "transport failed"),
            Self::Closed => write!(f, "session closed"),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<ProtocolError> for SessionError {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e)
    }
}

impl SessionError {
    /// Map a terminal failure reason to the error surfaced from `run`.
    pub(crate) fn from_failure(reason: FailureReason) -> Self {
        match reason {
            FailureReason::Identity => Self::Identity(ProtocolError::IdentityFailure),
            FailureReason::Transport => Self::TransportFailed,
            other => Self::PairingRejected(other),
        }
    }
}
