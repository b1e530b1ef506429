//! Session configuration.

use crate::peer::IceServer;

/// Default STUN server for the initial connection attempt.
pub const DEFAULT_STUN_SERVER: &str = "stun:global.stun.twilio.com:3478?transport=udp";

/// Configuration for one pairing session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Relay (signaling server) URL.
    pub relay_url: String,
    /// Initial STUN server set. Replaced wholesale on TURN fallback.
    pub stun_servers: Vec<IceServer>,
}

impl SessionConfig {
    /// Configuration with the default STUN set.
    pub fn new(relay_url: impl Into<String>) -> Self {
        Self {
            relay_url: relay_url.into(),
            stun_servers: vec![IceServer::stun(DEFAULT_STUN_SERVER)],
        }
    }

    /// Replace the initial STUN server set.
    pub fn with_stun_servers(mut self, servers: Vec<IceServer>) -> Self {
        self.stun_servers = servers;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_stun_set() {
        let config = SessionConfig::new("wss://relay.example.org");
        assert_eq!(config.stun_servers.len(), 1);
        assert!(!config.stun_servers[0].is_turn());
        assert_eq!(config.stun_servers[0].urls, DEFAULT_STUN_SERVER);
    }
}
