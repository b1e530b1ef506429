//! Relay (signaling server) capability.
//!
//! The relay is an external message broker consumed as an event-and-message
//! bus. Control metadata travels in the clear; every payload beyond it is
//! an opaque encrypted blob plus the connection id for routing.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use pairlink_core::{ConnectionId, SecureEnvelope};

use crate::error::SessionError;
use crate::peer::IceServer;

/// Connection parameters carried when opening the relay session.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectParams {
    /// Endpoint role; always `initiator` in this crate.
    pub stage: String,
    /// Hex signature over the challenge material.
    pub signed: String,
    /// The challenge material itself.
    pub message: String,
    /// Routing identifier derived from the session public key.
    #[serde(rename = "connectionId")]
    pub conn_id: ConnectionId,
}

/// Inbound named events from the relay.
#[derive(Debug, Clone)]
pub enum RelayEvent {
    /// Relay connection established.
    Connected,
    /// Counterpart matched. `version` is the counterpart's encrypted
    /// protocol version, absent for counterparts that predate it.
    Confirmation {
        /// Encrypted version envelope, when advertised.
        version: Option<Value>,
    },
    /// The counterpart's answer payload (classified per codec policy).
    Answer {
        /// Envelope or legacy plaintext.
        data: Value,
    },
    /// Pairing rejected: both peer slots occupied.
    ConfirmationFailedBusy,
    /// Pairing rejected: handshake verification failed.
    ConfirmationFailed,
    /// No counterpart exists for the connection id.
    InvalidConnection,
    /// Relay is preparing a TURN fallback. Informational.
    AttemptingTurn,
    /// TURN credentials for a full transport restart.
    TurnCredentials {
        /// Replacement server set; TURN entries only.
        servers: Vec<IceServer>,
    },
    /// Relay connection lost. Does not tear down the peer transport.
    Disconnected,
}

/// Outbound named messages to the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayMessage {
    /// Encrypted local signaling data, tagged for routing.
    OfferSignal {
        /// The enveloped signal payload.
        data: SecureEnvelope,
        /// Routing identifier.
        conn_id: ConnectionId,
    },
    /// Acknowledge direct connectivity; the relay is done after this.
    RtcConnected {
        /// Correlation key: the original display-code secret.
        key: String,
    },
}

/// A live relay connection.
#[async_trait]
pub trait RelayLink: Send {
    /// Emit one outbound message.
    async fn emit(&mut self, message: RelayMessage) -> Result<(), SessionError>;

    /// Close the relay connection. Idempotent.
    async fn close(&mut self);
}

/// Opens relay connections.
///
/// Injected at session construction so tests substitute doubles.
#[async_trait]
pub trait RelayConnector: Send + Sync {
    /// Connect to the relay and join as the given party.
    async fn connect(
        &self,
        url: &str,
        params: &ConnectParams,
    ) -> Result<(Box<dyn RelayLink>, mpsc::Receiver<RelayEvent>), SessionError>;
}
