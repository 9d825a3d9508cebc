//! Manager session configuration.

use std::time::Duration;

/// Default manager interface port.
pub const DEFAULT_PORT: u16 = 5038;

const DEFAULT_KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(10);
const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(10);
const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 99;

/// Configuration for a manager session.
///
/// Reconnect uses a fixed delay between attempts, bounded by
/// `max_reconnect_attempts`; once exhausted the session reports an internal
/// error and stops.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Manager host to connect to
    pub host: String,
    /// Manager port (5038 unless overridden)
    pub port: u16,
    /// Login username
    pub username: String,
    /// Login secret
    pub secret: String,
    /// Interval between keep-alive pings
    pub keep_alive_interval: Duration,
    /// Fixed delay between reconnect attempts
    pub reconnect_delay: Duration,
    /// Maximum number of consecutive reconnect attempts
    pub max_reconnect_attempts: u32,
}

impl ManagerConfig {
    /// Create a configuration with the default port and timing parameters.
    pub fn new(
        host: impl Into<String>,
        username: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        ManagerConfig {
            host: host.into(),
            port: DEFAULT_PORT,
            username: username.into(),
            secret: secret.into(),
            keep_alive_interval: DEFAULT_KEEP_ALIVE_INTERVAL,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
        }
    }

    /// Override the manager port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Override the keep-alive interval.
    pub fn with_keep_alive_interval(mut self, interval: Duration) -> Self {
        self.keep_alive_interval = interval;
        self
    }

    /// Override the fixed reconnect delay.
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Override the reconnect attempt bound.
    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }
}
