//! Peer transport bootstrapper.
//!
//! Builds transport configurations against a given server set and asks the
//! injected factory for an instance. Non-trickle: the transport batches all
//! candidates before its first signal emission. When any server in the set
//! is a TURN relay the candidate policy is forced to relay-only.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::SessionError;
use crate::peer::{IceServer, IceTransportPolicy, PeerConfig, PeerEvent, PeerFactory, PeerHandle};

/// Constructs peer transports for the session.
///
/// Holds no live transport itself; the session owns the current instance
/// and releases it before asking for a replacement.
pub struct TransportBootstrapper {
    factory: Arc<dyn PeerFactory>,
}

impl TransportBootstrapper {
    /// Wrap a transport factory.
    pub fn new(factory: Arc<dyn PeerFactory>) -> Self {
        Self { factory }
    }

    /// Start a transport as initiator against the given server set.
    pub async fn start(
        &self,
        ice_servers: Vec<IceServer>,
    ) -> Result<(Box<dyn PeerHandle>, mpsc::Receiver<PeerEvent>), SessionError> {
        let policy = if ice_servers.iter().any(IceServer::is_turn) {
            IceTransportPolicy::Relay
        } else {
            IceTransportPolicy::All
        };

        let config = PeerConfig {
            initiator: true,
            trickle: false,
            policy,
            ice_servers,
        };

        self.factory.create(config).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::Mutex;

    struct NullHandle;

    #[async_trait]
    impl PeerHandle for NullHandle {
        async fn signal(&mut self, _data: Value) -> Result<(), SessionError> {
            Ok(())
        }
        async fn send(&mut self, _frame: Vec<u8>) -> Result<(), SessionError> {
            Ok(())
        }
        async fn destroy(&mut self) {}
    }

    struct CapturingFactory {
        configs: Mutex<Vec<PeerConfig>>,
    }

    #[async_trait]
    impl PeerFactory for CapturingFactory {
        async fn create(
            &self,
            config: PeerConfig,
        ) -> Result<(Box<dyn PeerHandle>, mpsc::Receiver<PeerEvent>), SessionError> {
            self.configs.lock().unwrap().push(config);
            let (_tx, rx) = mpsc::channel(8);
            Ok((Box::new(NullHandle), rx))
        }
    }

    #[tokio::test]
    async fn test_stun_set_gathers_all_candidates() {
        let factory = Arc::new(CapturingFactory {
            configs: Mutex::new(Vec::new()),
        });
        let bootstrapper = TransportBootstrapper::new(factory.clone());

        bootstrapper
            .start(vec![IceServer::stun("stun:example.org:3478")])
            .await
            .unwrap();

        let configs = factory.configs.lock().unwrap();
        assert_eq!(configs.len(), 1);
        assert!(configs[0].initiator);
        assert!(!configs[0].trickle);
        assert_eq!(configs[0].policy, IceTransportPolicy::All);
    }

    #[tokio::test]
    async fn test_turn_set_forces_relay_policy() {
        let factory = Arc::new(CapturingFactory {
            configs: Mutex::new(Vec::new()),
        });
        let bootstrapper = TransportBootstrapper::new(factory.clone());

        bootstrapper
            .start(vec![IceServer::turn("turn:relay.example.org:443", "u", "c")])
            .await
            .unwrap();

        let configs = factory.configs.lock().unwrap();
        assert_eq!(configs[0].policy, IceTransportPolicy::Relay);
    }
}
