//! Pairlink Session
//!
//! Async orchestration of the pairlink pairing flow: the signaling session
//! over the relay, the peer transport bootstrapper with TURN fallback, and
//! the encrypted data channel protocol.
//!
//! The relay and the peer-to-peer negotiation engine are external
//! collaborators consumed through the [`relay::RelayConnector`] and
//! [`peer::PeerFactory`] capability traits; concrete implementations are
//! injected at session construction.
//!
//! # Invariants
//!
//! - Exactly one relay connection and at most one live peer transport per
//!   session; TURN fallback fully releases the previous instance first
//! - Every relay/data-channel payload beyond the signed challenge is
//!   enveloped
//! - Per-frame failures are logged and dropped; they never end a session
//! - Terminal stages stop event processing; in-flight results are discarded

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod event;
pub mod peer;
pub mod relay;
pub mod session;

pub use config::SessionConfig;
pub use error::SessionError;
pub use event::{DataPayload, HostEvent, HostNotifier};
pub use peer::{IceServer, IceTransportPolicy, PeerConfig, PeerEvent, PeerFactory, PeerHandle};
pub use relay::{ConnectParams, RelayConnector, RelayEvent, RelayLink, RelayMessage};
pub use session::{Command, InitiatorSession, SessionHandle};
