//! In-process loopback doubles for the relay and the peer transport.
//!
//! The counterpart tasks receive the pairing code through a watch channel,
//! standing in for the out-of-band QR scan, and derive the envelope codec
//! from it exactly the way a real counterpart would.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use pairlink_core::identity::parse_pairing_code;
use pairlink_core::EnvelopeCodec;
use pairlink_session::{
    ConnectParams, PeerConfig, PeerEvent, PeerFactory, PeerHandle, RelayConnector, RelayEvent,
    RelayLink, RelayMessage, SessionError,
};

/// Shared pairing-code slot, written by the host once the display code
/// notification arrives.
pub type CodeSlot = watch::Receiver<Option<String>>;

async fn wait_for_code(rx: &mut CodeSlot) -> Option<String> {
    loop {
        if let Some(code) = rx.borrow().clone() {
            return Some(code);
        }
        if rx.changed().await.is_err() {
            return None;
        }
    }
}

async fn codec_from_code(rx: &mut CodeSlot) -> Option<EnvelopeCodec> {
    let code = wait_for_code(rx).await?;
    match parse_pairing_code(&code) {
        Ok(parsed) => Some(EnvelopeCodec::new(&parsed.secret)),
        Err(e) => {
            warn!(error = %e, "loopback counterpart could not parse the code");
            None
        }
    }
}

// ---- relay ----

/// Loopback relay: scripts the counterpart's side of the signaling flow.
pub struct LoopbackRelay {
    code: CodeSlot,
}

impl LoopbackRelay {
    /// Build with the shared code slot.
    pub fn new(code: CodeSlot) -> Arc<Self> {
        Arc::new(Self { code })
    }
}

struct LoopbackRelayLink {
    tx: mpsc::Sender<RelayMessage>,
}

#[async_trait]
impl RelayLink for LoopbackRelayLink {
    async fn emit(&mut self, message: RelayMessage) -> Result<(), SessionError> {
        self.tx
            .send(message)
            .await
            .map_err(|_| SessionError::RelayFailed("loopback relay gone".to_string()))
    }

    async fn close(&mut self) {
        debug!("loopback relay link closed");
    }
}

#[async_trait]
impl RelayConnector for LoopbackRelay {
    async fn connect(
        &self,
        _url: &str,
        params: &ConnectParams,
    ) -> Result<(Box<dyn RelayLink>, mpsc::Receiver<RelayEvent>), SessionError> {
        info!(conn_id = %params.conn_id, stage = %params.stage, "loopback relay joined");
        let (event_tx, event_rx) = mpsc::channel(32);
        let (emit_tx, emit_rx) = mpsc::channel(32);
        tokio::spawn(counterpart_relay(self.code.clone(), event_tx, emit_rx));
        Ok((Box::new(LoopbackRelayLink { tx: emit_tx }), event_rx))
    }
}

async fn counterpart_relay(
    mut code: CodeSlot,
    events: mpsc::Sender<RelayEvent>,
    mut emitted: mpsc::Receiver<RelayMessage>,
) {
    let Some(codec) = codec_from_code(&mut code).await else {
        return;
    };

    let _ = events.send(RelayEvent::Connected).await;

    let version = match codec.encrypt(b"0.2.0") {
        Ok(envelope) => serde_json::to_value(envelope).ok(),
        Err(_) => None,
    };
    let _ = events.send(RelayEvent::Confirmation { version }).await;

    while let Some(message) = emitted.recv().await {
        match message {
            RelayMessage::OfferSignal { data, conn_id } => {
                match codec.decrypt_string(&data) {
                    Ok(offer) => {
                        debug!(%conn_id, offer, "counterpart received offer");
                        let answer = json!({"type": "answer", "sdp": "v=0 loopback"});
                        let Ok(envelope) = codec.encrypt(answer.to_string().as_bytes()) else {
                            return;
                        };
                        let Ok(value) = serde_json::to_value(envelope) else {
                            return;
                        };
                        let _ = events.send(RelayEvent::Answer { data: value }).await;
                    }
                    Err(e) => warn!(error = %e, "counterpart could not decrypt the offer"),
                }
            }
            RelayMessage::RtcConnected { key } => {
                info!(key_len = key.len(), "relay acknowledgment received, slot released");
                return;
            }
        }
    }
}

// ---- peer transport ----

/// Loopback peer factory: scripts the direct-transport counterpart.
pub struct LoopbackPeerFactory {
    code: CodeSlot,
}

impl LoopbackPeerFactory {
    /// Build with the shared code slot.
    pub fn new(code: CodeSlot) -> Arc<Self> {
        Arc::new(Self { code })
    }
}

enum PeerCommand {
    Signal(Value),
    Send(Vec<u8>),
}

struct LoopbackPeerHandle {
    tx: Option<mpsc::Sender<PeerCommand>>,
}

#[async_trait]
impl PeerHandle for LoopbackPeerHandle {
    async fn signal(&mut self, data: Value) -> Result<(), SessionError> {
        match self.tx.as_ref() {
            Some(tx) => tx
                .send(PeerCommand::Signal(data))
                .await
                .map_err(|_| SessionError::TransportFailed),
            None => Err(SessionError::Closed),
        }
    }

    async fn send(&mut self, frame: Vec<u8>) -> Result<(), SessionError> {
        match self.tx.as_ref() {
            Some(tx) => tx
                .send(PeerCommand::Send(frame))
                .await
                .map_err(|_| SessionError::TransportFailed),
            None => Err(SessionError::Closed),
        }
    }

    async fn destroy(&mut self) {
        self.tx = None;
    }
}

#[async_trait]
impl PeerFactory for LoopbackPeerFactory {
    async fn create(
        &self,
        config: PeerConfig,
    ) -> Result<(Box<dyn PeerHandle>, mpsc::Receiver<PeerEvent>), SessionError> {
        info!(
            policy = ?config.policy,
            servers = config.ice_servers.len(),
            "loopback transport created"
        );
        let (event_tx, event_rx) = mpsc::channel(32);
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        tokio::spawn(counterpart_peer(self.code.clone(), event_tx, cmd_rx));
        Ok((Box::new(LoopbackPeerHandle { tx: Some(cmd_tx) }), event_rx))
    }
}

async fn counterpart_peer(
    mut code: CodeSlot,
    events: mpsc::Sender<PeerEvent>,
    mut commands: mpsc::Receiver<PeerCommand>,
) {
    let Some(codec) = codec_from_code(&mut code).await else {
        return;
    };

    // Non-trickle: one batched offer after construction
    let offer = json!({"type": "offer", "sdp": "v=0 loopback"});
    let _ = events.send(PeerEvent::Signal(offer)).await;

    while let Some(command) = commands.recv().await {
        match command {
            PeerCommand::Signal(answer) => {
                debug!(?answer, "counterpart answer applied, transport up");
                let _ = events.send(PeerEvent::Connected).await;

                // The counterpart greets over the encrypted channel
                let greeting = json!({"type": "text", "data": "hello from receiver"});
                let Ok(envelope) = codec.encrypt(greeting.to_string().as_bytes()) else {
                    return;
                };
                let Ok(frame) = serde_json::to_vec(&envelope) else {
                    return;
                };
                let _ = events.send(PeerEvent::Data(frame)).await;
            }
            PeerCommand::Send(frame) => {
                let decrypted = serde_json::from_slice::<Value>(&frame)
                    .map_err(|_| ())
                    .and_then(|value| codec.decrypt_value(&value).map_err(|_| ()))
                    .and_then(|bytes| String::from_utf8(bytes).map_err(|_| ()));
                match decrypted {
                    Ok(plaintext) => info!(plaintext, "counterpart received frame"),
                    Err(()) => warn!("counterpart received an undecryptable frame"),
                }
            }
        }
    }
}
