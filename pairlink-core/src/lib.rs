//! Pairlink Protocol Core
//!
//! Synchronous, I/O-free core of the pairlink pairing protocol:
//! - Session identity: keypair, connection id, signed challenge, display code
//! - Secure envelope codec with backward-compatible inbound classification
//! - Connection lifecycle state machine
//!
//! # Security Invariants
//!
//! - Key material is session-scoped, never persisted, zeroized on drop
//! - A terminal stage is permanent for its connection id
//! - Direct use of `unsafe` is forbidden (#![forbid(unsafe_code)])

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

pub mod envelope;
pub mod error;
pub mod identity;
pub mod state;

pub use envelope::{EnvelopeCodec, SecureEnvelope, SignalClass};
pub use error::ProtocolError;
pub use identity::{ChallengeMaterial, ConnectionId, PairingSecret, SessionKeypair};
pub use state::{FailureReason, Lifecycle, SessionStage};
