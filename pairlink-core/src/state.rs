//! Connection lifecycle state machine.
//!
//! Stages: Idle -> KeysGenerated -> RelayConnecting -> AwaitingPairing ->
//! OfferNegotiating -> AwaitingAnswer -> TransportConnecting -> Connected
//! -> Closed, with a Failed(reason) terminal absorbing stage reachable from
//! any non-terminal stage, and a TURN retry edge re-entering
//! OfferNegotiating from TransportConnecting.
//!
//! The orchestrator is the only writer. A terminal stage is permanent for
//! the connection id; retrying requires a fresh identity.

use std::fmt;

use crate::error::ProtocolError;

/// Why a session reached the `Failed` stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// Key generation or signing failed; the session never started.
    Identity,
    /// Relay rejected the pairing: both peer slots already occupied.
    PeerSlotOccupied,
    /// Relay rejected the pairing: handshake verification failed.
    HandshakeInvalid,
    /// Relay found no counterpart for the connection id.
    NoCounterpart,
    /// The relay or peer transport failed before the session connected.
    Transport,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Identity => write!(f, "identity failure"),
            Self::PeerSlotOccupied => write!(f, "peer slot occupied"),
            Self::HandshakeInvalid => write!(f, "handshake invalid"),
            Self::NoCounterpart => write!(f, "no counterpart"),
            Self::Transport => write!(f, "transport failure"),
        }
    }
}

/// Session stage enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStage {
    /// Nothing generated yet.
    Idle,
    /// Keypair and connection id exist; relay not yet contacted.
    KeysGenerated,
    /// Relay connection being opened.
    RelayConnecting,
    /// Relay connected; waiting for the counterpart to pair.
    AwaitingPairing,
    /// Counterpart matched; peer transport gathering the offer.
    OfferNegotiating,
    /// Offer emitted; waiting for the counterpart's answer.
    AwaitingAnswer,
    /// Answer applied; direct transport connecting.
    TransportConnecting,
    /// Direct transport established.
    Connected,
    /// Session ended by explicit disconnect or transport close. Terminal.
    Closed,
    /// Session failed. Terminal for this connection id.
    Failed(FailureReason),
}

impl SessionStage {
    /// Whether the stage is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Failed(_))
    }
}

/// The lifecycle tracker owned by the orchestrator.
///
/// Transition methods validate the current stage; a disallowed event is a
/// `StageViolation` and leaves the stage untouched, letting the caller
/// decide between ignoring a stray event and failing the session.
#[derive(Debug)]
pub struct Lifecycle {
    stage: SessionStage,
}

impl Lifecycle {
    /// Start at `Idle`.
    pub fn new() -> Self {
        Self {
            stage: SessionStage::Idle,
        }
    }

    /// Current stage.
    pub fn stage(&self) -> SessionStage {
        self.stage
    }

    /// Whether the session has reached a terminal stage.
    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }

    fn advance(&mut self, from: SessionStage, to: SessionStage) -> Result<(), ProtocolError> {
        if self.stage.is_terminal() {
            return Err(ProtocolError::SessionTerminal);
        }
        if self.stage != from {
            return Err(ProtocolError::StageViolation);
        }
        self.stage = to;
        Ok(())
    }

    /// Keypair generated: Idle -> KeysGenerated.
    pub fn identity_ready(&mut self) -> Result<(), ProtocolError> {
        self.advance(SessionStage::Idle, SessionStage::KeysGenerated)
    }

    /// Relay connection opening: KeysGenerated -> RelayConnecting.
    pub fn relay_opening(&mut self) -> Result<(), ProtocolError> {
        self.advance(SessionStage::KeysGenerated, SessionStage::RelayConnecting)
    }

    /// Relay connected: RelayConnecting -> AwaitingPairing.
    pub fn relay_connected(&mut self) -> Result<(), ProtocolError> {
        self.advance(SessionStage::RelayConnecting, SessionStage::AwaitingPairing)
    }

    /// Counterpart matched: AwaitingPairing -> OfferNegotiating.
    pub fn pairing_confirmed(&mut self) -> Result<(), ProtocolError> {
        self.advance(SessionStage::AwaitingPairing, SessionStage::OfferNegotiating)
    }

    /// Offer emitted to the relay: OfferNegotiating -> AwaitingAnswer.
    pub fn offer_sent(&mut self) -> Result<(), ProtocolError> {
        self.advance(SessionStage::OfferNegotiating, SessionStage::AwaitingAnswer)
    }

    /// Answer applied to the transport: AwaitingAnswer -> TransportConnecting.
    pub fn answer_received(&mut self) -> Result<(), ProtocolError> {
        self.advance(SessionStage::AwaitingAnswer, SessionStage::TransportConnecting)
    }

    /// TURN credentials received: TransportConnecting -> OfferNegotiating.
    ///
    /// Same connection id; the transport restarts negotiation from scratch.
    pub fn turn_fallback(&mut self) -> Result<(), ProtocolError> {
        self.advance(
            SessionStage::TransportConnecting,
            SessionStage::OfferNegotiating,
        )
    }

    /// Direct transport established: TransportConnecting -> Connected.
    pub fn transport_connected(&mut self) -> Result<(), ProtocolError> {
        self.advance(SessionStage::TransportConnecting, SessionStage::Connected)
    }

    /// Close the session. Idempotent; never downgrades a `Failed` stage.
    pub fn close(&mut self) {
        if !self.stage.is_terminal() {
            self.stage = SessionStage::Closed;
        }
    }

    /// Fail the session. The first terminal stage wins.
    pub fn fail(&mut self, reason: FailureReason) {
        if !self.stage.is_terminal() {
            self.stage = SessionStage::Failed(reason);
        }
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected_lifecycle() -> Lifecycle {
        let mut lc = Lifecycle::new();
        lc.identity_ready().unwrap();
        lc.relay_opening().unwrap();
        lc.relay_connected().unwrap();
        lc.pairing_confirmed().unwrap();
        lc.offer_sent().unwrap();
        lc.answer_received().unwrap();
        lc.transport_connected().unwrap();
        lc
    }

    #[test]
    fn test_happy_path() {
        let lc = connected_lifecycle();
        assert_eq!(lc.stage(), SessionStage::Connected);
        assert!(!lc.is_terminal());
    }

    #[test]
    fn test_answer_transitions_to_transport_connecting() {
        let mut lc = Lifecycle::new();
        lc.identity_ready().unwrap();
        lc.relay_opening().unwrap();
        lc.relay_connected().unwrap();
        lc.pairing_confirmed().unwrap();
        lc.offer_sent().unwrap();
        assert_eq!(lc.stage(), SessionStage::AwaitingAnswer);

        lc.answer_received().unwrap();
        assert_eq!(lc.stage(), SessionStage::TransportConnecting);
    }

    #[test]
    fn test_turn_retry_reenters_offer_negotiation() {
        let mut lc = Lifecycle::new();
        lc.identity_ready().unwrap();
        lc.relay_opening().unwrap();
        lc.relay_connected().unwrap();
        lc.pairing_confirmed().unwrap();
        lc.offer_sent().unwrap();
        lc.answer_received().unwrap();

        lc.turn_fallback().unwrap();
        assert_eq!(lc.stage(), SessionStage::OfferNegotiating);

        // The retry walks the same offer/answer path again
        lc.offer_sent().unwrap();
        lc.answer_received().unwrap();
        lc.transport_connected().unwrap();
        assert_eq!(lc.stage(), SessionStage::Connected);
    }

    #[test]
    fn test_out_of_order_event_is_violation() {
        let mut lc = Lifecycle::new();
        lc.identity_ready().unwrap();
        assert_eq!(
            lc.pairing_confirmed(),
            Err(ProtocolError::StageViolation)
        );
        // Stage untouched
        assert_eq!(lc.stage(), SessionStage::KeysGenerated);
    }

    #[test]
    fn test_fail_is_terminal_and_sticky() {
        let mut lc = Lifecycle::new();
        lc.identity_ready().unwrap();
        lc.relay_opening().unwrap();
        lc.relay_connected().unwrap();

        lc.fail(FailureReason::PeerSlotOccupied);
        assert_eq!(
            lc.stage(),
            SessionStage::Failed(FailureReason::PeerSlotOccupied)
        );
        assert!(lc.is_terminal());

        // Neither a later failure nor a close overwrites the first reason
        lc.fail(FailureReason::Transport);
        lc.close();
        assert_eq!(
            lc.stage(),
            SessionStage::Failed(FailureReason::PeerSlotOccupied)
        );

        assert_eq!(lc.pairing_confirmed(), Err(ProtocolError::SessionTerminal));
    }

    #[test]
    fn test_close_from_connected() {
        let mut lc = connected_lifecycle();
        lc.close();
        assert_eq!(lc.stage(), SessionStage::Closed);

        // Idempotent
        lc.close();
        assert_eq!(lc.stage(), SessionStage::Closed);
        assert_eq!(lc.transport_connected(), Err(ProtocolError::SessionTerminal));
    }

    #[test]
    fn test_fail_reachable_from_every_pre_connected_stage() {
        let build: Vec<fn(&mut Lifecycle)> = vec![
            |_| {},
            |lc| {
                lc.identity_ready().unwrap();
            },
            |lc| {
                lc.identity_ready().unwrap();
                lc.relay_opening().unwrap();
            },
            |lc| {
                lc.identity_ready().unwrap();
                lc.relay_opening().unwrap();
                lc.relay_connected().unwrap();
            },
            |lc| {
                lc.identity_ready().unwrap();
                lc.relay_opening().unwrap();
                lc.relay_connected().unwrap();
                lc.pairing_confirmed().unwrap();
            },
        ];
        for setup in build {
            let mut lc = Lifecycle::new();
            setup(&mut lc);
            lc.fail(FailureReason::NoCounterpart);
            assert_eq!(
                lc.stage(),
                SessionStage::Failed(FailureReason::NoCounterpart)
            );
        }
    }
}
