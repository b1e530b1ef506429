//! Host notification sink.
//!
//! One-way stream of named notifications from the session to the host
//! application. The host owns the receiving end; a dropped receiver never
//! affects the session.

use serde_json::Value;
use tokio::sync::mpsc;

/// Application payload crossing the data channel boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum DataPayload {
    /// JSON-structured event.
    Structured(Value),
    /// Raw string.
    Text(String),
}

impl DataPayload {
    /// Render to the plaintext that gets encrypted into a frame.
    pub fn into_plaintext(self) -> String {
        match self {
            Self::Structured(value) => value.to_string(),
            Self::Text(text) => text,
        }
    }
}

/// Named notifications delivered to the host.
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    /// The assembled display code (QR payload).
    DisplayCode(String),
    /// The verification number: the raw pairing secret hex.
    CheckNumber(String),
    /// The derived connection id.
    ConnectionId(String),
    /// The hex signature over the challenge material.
    SignatureCheck(String),
    /// Counterpart-reported protocol version, decrypted.
    ReceiverVersion(String),
    /// Relay connection established.
    SocketConnected,
    /// A peer transport construction began.
    RtcInitiated,
    /// Direct transport established.
    RtcConnected,
    /// Direct transport closed.
    RtcClosed,
    /// Host-initiated disconnect acknowledged.
    RtcDisconnected,
    /// Pairing rejected: both peer slots occupied. Terminal.
    ConfirmationFailedBusy,
    /// Pairing rejected: handshake verification failed. Terminal.
    ConfirmationFailed,
    /// Pairing rejected: no counterpart found. Terminal.
    InvalidConnection,
    /// Decrypted application data from the counterpart.
    Data(DataPayload),
}

/// Sending half of the host notification channel.
#[derive(Debug, Clone)]
pub struct HostNotifier {
    tx: mpsc::UnboundedSender<HostEvent>,
}

impl HostNotifier {
    /// Create the notifier and the host-side receiver.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<HostEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Deliver a notification. A dropped host receiver is not an error.
    pub fn notify(&self, event: HostEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("host sink dropped, notification discarded");
        }
    }
}
