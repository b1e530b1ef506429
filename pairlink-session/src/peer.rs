//! Peer-to-peer transport capability.
//!
//! The negotiation engine (ICE/SDP, NAT traversal) is an external
//! collaborator. The session consumes it through these traits and never
//! inspects the signaling blobs it produces.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::SessionError;

/// A STUN or TURN server description.
///
/// STUN entries carry no credentials; TURN entries carry both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    /// Server URL, e.g. `stun:host:3478` or `turn:host:443?transport=tcp`.
    pub urls: String,
    /// TURN username.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// TURN credential.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    /// A credential-less STUN entry.
    pub fn stun(urls: impl Into<String>) -> Self {
        Self {
            urls: urls.into(),
            username: None,
            credential: None,
        }
    }

    /// A TURN entry with credentials.
    pub fn turn(
        urls: impl Into<String>,
        username: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            urls: urls.into(),
            username: Some(username.into()),
            credential: Some(credential.into()),
        }
    }

    /// Whether this entry is a TURN relay (carries credentials).
    pub fn is_turn(&self) -> bool {
        self.credential.is_some()
    }
}

/// Candidate gathering policy for the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceTransportPolicy {
    /// Gather all candidate types.
    All,
    /// Relay-only candidates (TURN in use).
    Relay,
}

/// Configuration handed to the peer transport factory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerConfig {
    /// This end creates the offer.
    pub initiator: bool,
    /// Batch all candidates before the first signal emission.
    pub trickle: bool,
    /// Candidate gathering policy.
    pub policy: IceTransportPolicy,
    /// Servers the transport gathers candidates against.
    pub ice_servers: Vec<IceServer>,
}

/// Events emitted by a live peer transport.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// Local signaling data (offer/candidates) to ship to the counterpart.
    Signal(Value),
    /// Direct connection established.
    Connected,
    /// One inbound data-channel frame.
    Data(Vec<u8>),
    /// Transport closed.
    Closed,
    /// Transport error. Informational; `Closed` decides the session's fate.
    Error(String),
}

/// Handle to a live peer transport instance.
#[async_trait]
pub trait PeerHandle: Send {
    /// Feed remote signaling data into the negotiation engine.
    async fn signal(&mut self, data: Value) -> Result<(), SessionError>;

    /// Send one frame over the reliable/ordered data channel.
    async fn send(&mut self, frame: Vec<u8>) -> Result<(), SessionError>;

    /// Release the transport. Must stop all event emission.
    async fn destroy(&mut self);
}

/// Factory constructing peer transports.
///
/// Injected at session construction so tests substitute doubles.
#[async_trait]
pub trait PeerFactory: Send + Sync {
    /// Create a transport and its event stream.
    async fn create(
        &self,
        config: PeerConfig,
    ) -> Result<(Box<dyn PeerHandle>, mpsc::Receiver<PeerEvent>), SessionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turn_detection() {
        assert!(!IceServer::stun("stun:example.org:3478").is_turn());
        assert!(IceServer::turn("turn:example.org:443", "user", "pass").is_turn());
    }

    #[test]
    fn test_ice_server_wire_shape() {
        let json = serde_json::to_value(IceServer::stun("stun:example.org:3478")).unwrap();
        assert_eq!(json["urls"], "stun:example.org:3478");
        assert!(json.get("username").is_none());
        assert!(json.get("credential").is_none());

        let turn: IceServer = serde_json::from_value(serde_json::json!({
            "urls": "turn:relay.example.org:443?transport=tcp",
            "username": "u",
            "credential": "c",
        }))
        .unwrap();
        assert!(turn.is_turn());
    }
}
