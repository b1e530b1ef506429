//! Initiator session orchestrator.
//!
//! Owns the lifecycle, the relay connection, and at most one live peer
//! transport, and runs the single event loop tying them together. Relay
//! events, peer events, and host commands are processed strictly in
//! arrival order; once a terminal stage is reached no further events are
//! processed and in-flight results are discarded.

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use pairlink_core::envelope::SignalClass;
use pairlink_core::identity::pairing_code;
use pairlink_core::{
    ChallengeMaterial, ConnectionId, EnvelopeCodec, FailureReason, Lifecycle, SessionKeypair,
    SessionStage,
};

use crate::bootstrap::TransportBootstrapper;
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::event::{DataPayload, HostEvent, HostNotifier};
use crate::peer::{IceServer, PeerEvent, PeerFactory, PeerHandle};
use crate::relay::{ConnectParams, RelayConnector, RelayEvent, RelayLink, RelayMessage};

use std::sync::Arc;

/// Host commands accepted while the session runs.
#[derive(Debug)]
pub enum Command {
    /// Encrypt and transmit one application payload.
    Send(DataPayload),
    /// Tear the session down.
    Disconnect,
}

/// Cloneable handle for driving a running session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl SessionHandle {
    /// Queue an application payload for the data channel.
    ///
    /// # Errors
    ///
    /// Returns `Closed` if the session has already ended.
    pub fn send(&self, payload: DataPayload) -> Result<(), SessionError> {
        self.tx
            .send(Command::Send(payload))
            .map_err(|_| SessionError::Closed)
    }

    /// Request a disconnect. Safe to call on an ended session.
    pub fn disconnect(&self) {
        let _ = self.tx.send(Command::Disconnect);
    }
}

enum Wake {
    Relay(Option<RelayEvent>),
    Peer(Option<PeerEvent>),
    Cmd(Option<Command>),
}

async fn next_event<T>(rx: Option<&mut mpsc::Receiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_command(rx: Option<&mut mpsc::UnboundedReceiver<Command>>) -> Option<Command> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// The web/initiator end of a pairing session.
pub struct InitiatorSession {
    lifecycle: Lifecycle,
    identity: SessionKeypair,
    codec: EnvelopeCodec,
    /// Display-code secret hex; correlation key for the relay acknowledgment.
    check_key: String,
    conn_id: ConnectionId,
    /// Set once from the pairing confirmation, read-only afterward.
    peer_version: Option<String>,
    notifier: HostNotifier,
    stun_servers: Vec<IceServer>,

    relay: Option<Box<dyn RelayLink>>,
    relay_events: Option<mpsc::Receiver<RelayEvent>>,
    socket_connected: bool,

    bootstrapper: TransportBootstrapper,
    peer: Option<Box<dyn PeerHandle>>,
    peer_events: Option<mpsc::Receiver<PeerEvent>>,

    commands: Option<mpsc::UnboundedReceiver<Command>>,
}

impl InitiatorSession {
    /// Start a pairing session.
    ///
    /// Generates the session identity, notifies the host with the display
    /// code material, and opens the relay connection. Returns the session
    /// (drive it with [`run`](Self::run)), a command handle, and the host
    /// event stream.
    ///
    /// # Errors
    ///
    /// `Identity` if key or challenge generation fails (fatal, no retry);
    /// `RelayFailed` if the relay connection cannot be opened.
    pub async fn start(
        config: SessionConfig,
        connector: Arc<dyn RelayConnector>,
        factory: Arc<dyn PeerFactory>,
    ) -> Result<
        (
            Self,
            SessionHandle,
            mpsc::UnboundedReceiver<HostEvent>,
        ),
        SessionError,
    > {
        let (notifier, host_rx) = HostNotifier::channel();

        let mut lifecycle = Lifecycle::new();
        let identity = SessionKeypair::generate().map_err(SessionError::Identity)?;
        lifecycle.identity_ready()?;

        let conn_id = identity.connection_id();
        let secret = identity.pairing_secret();
        let check_key = secret.to_hex();
        let codec = EnvelopeCodec::new(&secret);

        let material = ChallengeMaterial::generate().map_err(SessionError::Identity)?;
        let signed = identity.sign(&material);

        // The code embeds the raw private key: it is the pairing secret
        // shared out-of-band with the counterpart.
        let code = pairing_code(&check_key, &conn_id);
        notifier.notify(HostEvent::DisplayCode(code));
        notifier.notify(HostEvent::CheckNumber(check_key.clone()));
        notifier.notify(HostEvent::ConnectionId(conn_id.to_string()));
        notifier.notify(HostEvent::SignatureCheck(signed.clone()));

        lifecycle.relay_opening()?;
        let params = ConnectParams {
            stage: "initiator".to_string(),
            signed,
            message: material.as_str().to_string(),
            conn_id: conn_id.clone(),
        };
        let (relay, relay_events) = connector.connect(&config.relay_url, &params).await?;
        info!(conn_id = %conn_id, "relay session opened");

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        let session = Self {
            lifecycle,
            identity,
            codec,
            check_key,
            conn_id,
            peer_version: None,
            notifier,
            stun_servers: config.stun_servers,
            relay: Some(relay),
            relay_events: Some(relay_events),
            socket_connected: false,
            bootstrapper: TransportBootstrapper::new(factory),
            peer: None,
            peer_events: None,
            commands: Some(cmd_rx),
        };
        Ok((session, SessionHandle { tx: cmd_tx }, host_rx))
    }

    /// Current lifecycle stage.
    pub fn stage(&self) -> SessionStage {
        self.lifecycle.stage()
    }

    /// The session's routing identifier.
    pub fn connection_id(&self) -> ConnectionId {
        self.identity.connection_id()
    }

    /// Whether the relay connection is currently up.
    pub fn is_relay_connected(&self) -> bool {
        self.socket_connected
    }

    /// Drive the session to completion.
    ///
    /// Returns `Ok(())` when the session closes (explicit disconnect or
    /// transport close after connecting) and an error for terminal
    /// failures. Either way every resource is released on return.
    pub async fn run(mut self) -> Result<(), SessionError> {
        loop {
            if self.lifecycle.is_terminal() {
                break;
            }
            if self.relay_events.is_none() && self.peer_events.is_none() && self.commands.is_none()
            {
                // Nothing can ever wake us again
                self.lifecycle.close();
                break;
            }

            let wake = {
                let relay_rx = self.relay_events.as_mut();
                let peer_rx = self.peer_events.as_mut();
                let cmd_rx = self.commands.as_mut();
                tokio::select! {
                    ev = next_event(relay_rx) => Wake::Relay(ev),
                    ev = next_event(peer_rx) => Wake::Peer(ev),
                    cmd = next_command(cmd_rx) => Wake::Cmd(cmd),
                }
            };

            match wake {
                Wake::Relay(Some(event)) => self.on_relay_event(event).await,
                Wake::Relay(None) => self.on_relay_gone(),
                Wake::Peer(Some(event)) => self.on_peer_event(event).await,
                Wake::Peer(None) => self.peer_events = None,
                Wake::Cmd(Some(command)) => self.on_command(command).await,
                Wake::Cmd(None) => self.commands = None,
            }
        }

        self.shutdown().await;
        match self.lifecycle.stage() {
            SessionStage::Failed(reason) => Err(SessionError::from_failure(reason)),
            _ => Ok(()),
        }
    }

    /// Release the transport and the relay connection. Idempotent.
    pub async fn shutdown(&mut self) {
        self.lifecycle.close();
        self.release_transport().await;
        self.close_relay().await;
    }

    // ---- relay events ----

    async fn on_relay_event(&mut self, event: RelayEvent) {
        match event {
            RelayEvent::Connected => {
                if self.lifecycle.relay_connected().is_err() {
                    warn!(stage = ?self.stage(), "stray relay connect event ignored");
                    return;
                }
                self.socket_connected = true;
                self.notifier.notify(HostEvent::SocketConnected);
            }
            RelayEvent::Confirmation { version } => {
                if self.stage() != SessionStage::AwaitingPairing {
                    warn!(stage = ?self.stage(), "stray pairing confirmation ignored");
                    return;
                }
                if let Some(value) = version {
                    self.record_peer_version(&value);
                }
                // Guarded above; the transition cannot fail here
                let _ = self.lifecycle.pairing_confirmed();
                let servers = self.stun_servers.clone();
                self.bootstrap_transport(servers).await;
            }
            RelayEvent::Answer { data } => {
                self.on_answer(data).await;
            }
            RelayEvent::ConfirmationFailedBusy => {
                self.reject_pairing(HostEvent::ConfirmationFailedBusy, FailureReason::PeerSlotOccupied);
            }
            RelayEvent::ConfirmationFailed => {
                self.reject_pairing(HostEvent::ConfirmationFailed, FailureReason::HandshakeInvalid);
            }
            RelayEvent::InvalidConnection => {
                self.reject_pairing(HostEvent::InvalidConnection, FailureReason::NoCounterpart);
            }
            RelayEvent::AttemptingTurn => {
                info!("relay preparing turn fallback");
            }
            RelayEvent::TurnCredentials { servers } => {
                if self.lifecycle.turn_fallback().is_err() {
                    warn!(stage = ?self.stage(), "turn credentials outside transport setup ignored");
                    return;
                }
                info!(servers = servers.len(), "restarting transport via turn");
                self.bootstrap_transport(servers).await;
            }
            RelayEvent::Disconnected => {
                debug!("relay connection lost");
                self.socket_connected = false;
            }
        }
    }

    fn record_peer_version(&mut self, value: &Value) {
        match self.codec.decrypt_value(value) {
            Ok(plaintext) => match String::from_utf8(plaintext) {
                Ok(version) => {
                    debug!(%version, "counterpart version recorded");
                    self.notifier.notify(HostEvent::ReceiverVersion(version.clone()));
                    self.peer_version = Some(version);
                }
                Err(_) => warn!("counterpart version is not utf-8, ignored"),
            },
            Err(e) => warn!(error = %e, "undecryptable counterpart version, ignored"),
        }
    }

    async fn on_answer(&mut self, data: Value) {
        if self.stage() != SessionStage::AwaitingAnswer {
            warn!(stage = ?self.stage(), "stray answer ignored");
            return;
        }

        let plaintext = match pairlink_core::envelope::classify_signal(
            self.peer_version.as_deref(),
            &data,
        ) {
            Ok(SignalClass::Envelope(envelope)) => match self.codec.decrypt_string(&envelope) {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "answer dropped: decryption failed");
                    return;
                }
            },
            Ok(SignalClass::LegacyPlaintext(value)) => match value {
                Value::String(text) => text,
                other => other.to_string(),
            },
            Err(e) => {
                warn!(error = %e, "answer dropped: malformed envelope");
                return;
            }
        };

        let signal: Value = match serde_json::from_str(&plaintext) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "answer dropped: not a signal payload");
                return;
            }
        };

        // Guarded above; the transition cannot fail here
        let _ = self.lifecycle.answer_received();

        if let Some(peer) = self.peer.as_mut() {
            if let Err(e) = peer.signal(signal).await {
                warn!(error = %e, "transport rejected the answer");
                self.lifecycle.fail(FailureReason::Transport);
            }
        } else {
            warn!("answer arrived without a live transport");
            self.lifecycle.fail(FailureReason::Transport);
        }
    }

    fn reject_pairing(&mut self, event: HostEvent, reason: FailureReason) {
        if self.stage() == SessionStage::Connected {
            warn!(%reason, "pairing rejection after connect ignored");
            return;
        }
        info!(%reason, "pairing rejected by relay");
        self.notifier.notify(event);
        self.lifecycle.fail(reason);
    }

    fn on_relay_gone(&mut self) {
        self.relay_events = None;
        if self.relay.is_none() {
            // We closed it ourselves after the acknowledgment
            return;
        }
        self.socket_connected = false;
        if self.peer.is_none() && self.stage() != SessionStage::Connected {
            warn!("relay stream ended before pairing completed");
            self.lifecycle.fail(FailureReason::Transport);
        }
    }

    // ---- peer events ----

    async fn on_peer_event(&mut self, event: PeerEvent) {
        match event {
            PeerEvent::Signal(data) => self.on_local_signal(data).await,
            PeerEvent::Connected => self.on_transport_connected().await,
            PeerEvent::Data(frame) => {
                if self.stage() != SessionStage::Connected {
                    warn!(stage = ?self.stage(), "data frame before connect dropped");
                    return;
                }
                self.dispatch_frame(&frame);
            }
            PeerEvent::Closed => {
                debug!("peer transport closed");
                self.notifier.notify(HostEvent::RtcClosed);
                if self.stage() == SessionStage::Connected {
                    self.lifecycle.close();
                } else {
                    self.lifecycle.fail(FailureReason::Transport);
                }
            }
            PeerEvent::Error(message) => {
                // Logged and surfaced; a subsequent close event decides fate
                warn!(error = %message, "peer transport error");
            }
        }
    }

    async fn on_local_signal(&mut self, data: Value) {
        if self.stage() != SessionStage::OfferNegotiating {
            warn!(stage = ?self.stage(), "stray local signal ignored");
            return;
        }

        let plaintext = data.to_string();
        let envelope = match self.codec.encrypt(plaintext.as_bytes()) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "failed to encrypt local signal");
                self.lifecycle.fail(FailureReason::Transport);
                return;
            }
        };

        let message = RelayMessage::OfferSignal {
            data: envelope,
            conn_id: self.conn_id.clone(),
        };
        if self.emit_relay(message).await {
            // Guarded above; the transition cannot fail here
            let _ = self.lifecycle.offer_sent();
        } else {
            // The counterpart can never see the offer
            self.lifecycle.fail(FailureReason::Transport);
        }
    }

    async fn on_transport_connected(&mut self) {
        if self.lifecycle.transport_connected().is_err() {
            warn!(stage = ?self.stage(), "stray transport connect ignored");
            return;
        }
        info!(conn_id = %self.conn_id, "direct transport established");

        // One encrypted greeting frame opens the channel
        self.send_frame(DataPayload::Structured(json!({
            "type": "text",
            "data": "channel open",
        })))
        .await;

        self.notifier.notify(HostEvent::RtcConnected);

        // Exactly one acknowledgment, keyed by the display-code secret,
        // then the relay has served its purpose
        let ack = RelayMessage::RtcConnected {
            key: self.check_key.clone(),
        };
        self.emit_relay(ack).await;
        self.close_relay().await;
    }

    fn dispatch_frame(&mut self, frame: &[u8]) {
        let text = match std::str::from_utf8(frame) {
            Ok(text) => text,
            Err(_) => {
                warn!("frame dropped: not utf-8");
                return;
            }
        };
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "frame dropped: not an envelope");
                return;
            }
        };
        let plaintext = match self.codec.decrypt_value(&value) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "frame dropped: decryption failed");
                return;
            }
        };
        let plaintext = match String::from_utf8(plaintext) {
            Ok(text) => text,
            Err(_) => {
                warn!("frame dropped: plaintext not utf-8");
                return;
            }
        };

        match serde_json::from_str::<Value>(&plaintext) {
            Ok(structured) => self
                .notifier
                .notify(HostEvent::Data(DataPayload::Structured(structured))),
            Err(_) => self
                .notifier
                .notify(HostEvent::Data(DataPayload::Text(plaintext))),
        }
    }

    // ---- commands ----

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::Send(payload) => {
                if self.stage() != SessionStage::Connected {
                    warn!(stage = ?self.stage(), "send before connect dropped");
                    return;
                }
                self.send_frame(payload).await;
            }
            Command::Disconnect => {
                info!("host-initiated disconnect");
                self.notifier.notify(HostEvent::RtcDisconnected);
                self.lifecycle.close();
            }
        }
    }

    async fn send_frame(&mut self, payload: DataPayload) {
        let plaintext = payload.into_plaintext();
        let envelope = match self.codec.encrypt(plaintext.as_bytes()) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "outbound frame dropped: encryption failed");
                return;
            }
        };
        let frame = match serde_json::to_vec(&envelope) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "outbound frame dropped: serialization failed");
                return;
            }
        };
        if let Some(peer) = self.peer.as_mut() {
            if let Err(e) = peer.send(frame).await {
                warn!(error = %e, "outbound frame dropped: transport send failed");
            }
        } else {
            warn!("outbound frame dropped: no live transport");
        }
    }

    // ---- transport and relay plumbing ----

    async fn bootstrap_transport(&mut self, servers: Vec<IceServer>) {
        // Release the previous instance and its event subscription before
        // the replacement is wired; one live transport at a time
        self.peer_events = None;
        if let Some(mut old) = self.peer.take() {
            old.destroy().await;
        }

        self.notifier.notify(HostEvent::RtcInitiated);
        match self.bootstrapper.start(servers).await {
            Ok((peer, events)) => {
                self.peer = Some(peer);
                self.peer_events = Some(events);
            }
            Err(e) => {
                warn!(error = %e, "transport construction failed");
                self.lifecycle.fail(FailureReason::Transport);
            }
        }
    }

    async fn emit_relay(&mut self, message: RelayMessage) -> bool {
        match self.relay.as_mut() {
            Some(relay) => match relay.emit(message).await {
                Ok(()) => true,
                Err(e) => {
                    warn!(error = %e, "relay emit failed");
                    false
                }
            },
            None => {
                warn!("relay emit after close dropped");
                false
            }
        }
    }

    async fn close_relay(&mut self) {
        if let Some(mut relay) = self.relay.take() {
            relay.close().await;
        }
        self.relay_events = None;
        self.socket_connected = false;
    }

    async fn release_transport(&mut self) {
        self.peer_events = None;
        if let Some(mut peer) = self.peer.take() {
            peer.destroy().await;
        }
    }
}
