use crate::transport::{RfcommConfig, TcpConfig};
use std::time::Duration;

/// Which link backend the manager runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportMode {
    /// Use real RFCOMM Bluetooth (requires BlueZ)
    #[default]
    Rfcomm,
    /// Use TCP simulation (for development)
    TcpSimulation,
}

/// Configuration for the connection manager
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Largest chunk a single read hands to the observer
    pub read_buffer_size: usize,
    /// How long a dialer may wait for the peer before giving up
    pub connect_timeout: Duration,
    /// Grace period for closing a port before it is dropped
    pub close_timeout: Duration,
    /// Upper bound on waiting for one role to terminate in `stop()`
    pub shutdown_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: 1024,
            connect_timeout: Duration::from_secs(12),
            close_timeout: Duration::from_millis(500),
            shutdown_timeout: Duration::from_secs(2),
        }
    }
}

/// Transport selection and per-backend settings
#[derive(Debug, Clone, Default)]
pub struct TransportConfig {
    pub mode: TransportMode,
    pub rfcomm: RfcommConfig,
    pub tcp: TcpConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ConnectionConfig::default();
        assert_eq!(config.read_buffer_size, 1024);
        assert!(config.close_timeout < config.shutdown_timeout);

        let transport = TransportConfig::default();
        assert_eq!(transport.mode, TransportMode::Rfcomm);
        assert_eq!(transport.rfcomm.channel, 1);
    }
}
