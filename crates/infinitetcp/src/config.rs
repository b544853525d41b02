//! Connection configuration.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default upper bound for one inbound line (1MB).
pub const DEFAULT_MAX_LINE_LENGTH: usize = 1024 * 1024;

/// Settings shared by a [`Client`](crate::Client) or [`Server`](crate::Server)
/// and every connection it creates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Longest accepted inbound line in bytes; longer lines are skipped as malformed.
    pub max_line_length: usize,
    /// Capacity of the per-connection ordered outbound queue.
    pub outbound_queue: usize,
    /// Bound on the client's connect attempt.
    pub connect_timeout: Duration,
    /// Bound on how long a client stop waits for its receive loop to finish.
    pub shutdown_timeout: Duration,
    /// Set `TCP_NODELAY` on every socket.
    pub nodelay: bool,
    /// Interface the server listens on.
    pub server_ip: IpAddr,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            outbound_queue: 100,
            connect_timeout: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(5),
            nodelay: true,
            server_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        }
    }
}

impl ConnectionConfig {
    /// Start building a configuration from the defaults
    #[must_use]
    pub fn builder() -> ConnectionConfigBuilder {
        ConnectionConfigBuilder::new()
    }
}

/// Builder for [`ConnectionConfig`]
#[derive(Debug, Default)]
pub struct ConnectionConfigBuilder {
    config: ConnectionConfig,
}

impl ConnectionConfigBuilder {
    /// Create a new builder with default settings
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum inbound line length
    #[must_use]
    pub const fn max_line_length(mut self, bytes: usize) -> Self {
        self.config.max_line_length = bytes;
        self
    }

    /// Set the outbound queue capacity (clamped to at least 1)
    #[must_use]
    pub fn outbound_queue(mut self, capacity: usize) -> Self {
        self.config.outbound_queue = capacity.max(1);
        self
    }

    /// Set the connect timeout
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set the shutdown wait bound
    #[must_use]
    pub const fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.config.shutdown_timeout = timeout;
        self
    }

    /// Enable or disable `TCP_NODELAY`
    #[must_use]
    pub const fn nodelay(mut self, enabled: bool) -> Self {
        self.config.nodelay = enabled;
        self
    }

    /// Set the interface the server listens on
    #[must_use]
    pub const fn server_ip(mut self, ip: IpAddr) -> Self {
        self.config.server_ip = ip;
        self
    }

    /// Build the configuration
    #[must_use]
    pub fn build(self) -> ConnectionConfig {
        self.config
    }
}
