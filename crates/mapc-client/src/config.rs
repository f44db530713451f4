//! Client configuration.

use std::time::Duration;

use mapc_core::SessionConfig;
use mapc_proto::DEFAULT_MAX_FRAME_LEN;

/// Host the simulation server listens on by default.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Port the simulation server listens on by default.
pub const DEFAULT_PORT: u16 = 12300;

/// Default bound for connecting, authenticating and each action.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Agent connection settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Server host name or address
    pub host: String,
    /// Server port
    pub port: u16,
    /// Bound on establishing the transport
    pub connect_timeout: Duration,
    /// Bound on receiving the auth-response
    pub auth_timeout: Duration,
    /// Timeout used by the verb methods
    pub action_timeout: Duration,
    /// Largest accepted inbound frame
    pub max_frame_len: usize,
    /// Session state machine settings
    pub session: SessionConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            connect_timeout: DEFAULT_TIMEOUT,
            auth_timeout: DEFAULT_TIMEOUT,
            action_timeout: DEFAULT_TIMEOUT,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            session: SessionConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Default settings for a server at `host:port`.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port, ..Self::default() }
    }

    /// Use `timeout` for the verb methods.
    #[must_use]
    pub fn with_action_timeout(mut self, timeout: Duration) -> Self {
        self.action_timeout = timeout;
        self
    }
}
