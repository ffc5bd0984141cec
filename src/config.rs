//! Configuration for the AtlasKV client
//!
//! Centralized configuration with sensible defaults. Consumed once at
//! connection construction; a running connection never re-reads it.

use std::fmt;
#[cfg(unix)]
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{ClientError, Result};

/// Where the store is listening
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// TCP address in `host:port` form
    Tcp(String),

    /// Unix domain socket path
    #[cfg(unix)]
    Unix(PathBuf),
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp(addr) => write!(f, "tcp://{}", addr),
            #[cfg(unix)]
            Endpoint::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}

/// What to do with commands submitted while the connection is down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectedBehavior {
    /// Buffer when auto-reconnect is enabled, reject otherwise
    Default,

    /// Always buffer for replay after reconnect
    AcceptCommands,

    /// Always reject immediately
    RejectCommands,
}

/// Exponential backoff bounds between reconnect attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectDelay {
    /// Delay before the first attempt
    pub initial: Duration,

    /// Upper bound for any single delay
    pub max: Duration,
}

impl Default for ReconnectDelay {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(10),
            max: Duration::from_secs(30),
        }
    }
}

/// Main configuration for a client and its connections
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // -------------------------------------------------------------------------
    // Transport Configuration
    // -------------------------------------------------------------------------
    /// Store address
    pub endpoint: Endpoint,

    /// Upper bound for establishing the transport and running the handshake
    pub connect_timeout: Duration,

    /// Size of the reader's socket read chunk (bytes)
    pub read_buffer_size: usize,

    // -------------------------------------------------------------------------
    // Command Configuration
    // -------------------------------------------------------------------------
    /// Fail a command's handle if no reply arrives within this duration
    pub command_timeout: Option<Duration>,

    /// Max outstanding commands (written + buffered) before rejecting
    pub request_queue_size: usize,

    // -------------------------------------------------------------------------
    // Reconnect Configuration
    // -------------------------------------------------------------------------
    /// Attempt reconnection after a transport failure
    pub auto_reconnect: bool,

    /// Fail buffered commands when a reconnect attempt fails
    pub cancel_commands_on_reconnect_failure: bool,

    /// Require a PING round trip before a connection is marked usable
    pub ping_before_activate_connection: bool,

    /// Stop auto-reconnecting after a protocol-level failure
    pub suspend_reconnect_on_protocol_failure: bool,

    /// Buffer-or-reject decision while disconnected
    pub disconnected_behavior: DisconnectedBehavior,

    /// Backoff between reconnect attempts
    pub reconnect_delay: ReconnectDelay,

    // -------------------------------------------------------------------------
    // Handshake Configuration
    // -------------------------------------------------------------------------
    /// Sent as AUTH on every (re)connect
    pub password: Option<String>,

    /// Sent as SELECT on every (re)connect
    pub database: Option<u32>,

    /// Sent as CLIENT SETNAME on every (re)connect
    pub client_name: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::Tcp("127.0.0.1:6379".to_string()),
            connect_timeout: Duration::from_secs(10),
            read_buffer_size: 16 * 1024, // 16 KB
            command_timeout: Some(Duration::from_secs(60)),
            request_queue_size: usize::MAX,
            auto_reconnect: true,
            cancel_commands_on_reconnect_failure: false,
            ping_before_activate_connection: false,
            suspend_reconnect_on_protocol_failure: false,
            disconnected_behavior: DisconnectedBehavior::Default,
            reconnect_delay: ReconnectDelay::default(),
            password: None,
            database: None,
            client_name: None,
        }
    }
}

impl ClientConfig {
    /// Create a new config builder
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Reject settings a connection cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.request_queue_size == 0 {
            return Err(ClientError::Config(
                "request_queue_size must be at least 1".to_string(),
            ));
        }
        if self.read_buffer_size == 0 {
            return Err(ClientError::Config(
                "read_buffer_size must be at least 1".to_string(),
            ));
        }
        if self.connect_timeout.is_zero() {
            return Err(ClientError::Config(
                "connect_timeout must be non-zero".to_string(),
            ));
        }
        if self.reconnect_delay.initial > self.reconnect_delay.max {
            return Err(ClientError::Config(format!(
                "reconnect delay initial {:?} exceeds max {:?}",
                self.reconnect_delay.initial, self.reconnect_delay.max
            )));
        }
        if let Some(timeout) = self.command_timeout {
            if timeout.is_zero() {
                return Err(ClientError::Config(
                    "command_timeout must be non-zero (use None to disable)".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Builder for ClientConfig
#[derive(Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    /// Connect over TCP to `host:port`
    pub fn address(mut self, addr: impl Into<String>) -> Self {
        self.config.endpoint = Endpoint::Tcp(addr.into());
        self
    }

    /// Connect over a unix domain socket
    #[cfg(unix)]
    pub fn unix_socket(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.endpoint = Endpoint::Unix(path.into());
        self
    }

    /// Set the endpoint directly
    pub fn endpoint(mut self, endpoint: Endpoint) -> Self {
        self.config.endpoint = endpoint;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.config.read_buffer_size = size;
        self
    }

    /// Set the per-command timeout (`None` disables it)
    pub fn command_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.command_timeout = timeout;
        self
    }

    pub fn request_queue_size(mut self, size: usize) -> Self {
        self.config.request_queue_size = size;
        self
    }

    pub fn auto_reconnect(mut self, enabled: bool) -> Self {
        self.config.auto_reconnect = enabled;
        self
    }

    pub fn cancel_commands_on_reconnect_failure(mut self, enabled: bool) -> Self {
        self.config.cancel_commands_on_reconnect_failure = enabled;
        self
    }

    pub fn ping_before_activate_connection(mut self, enabled: bool) -> Self {
        self.config.ping_before_activate_connection = enabled;
        self
    }

    pub fn suspend_reconnect_on_protocol_failure(mut self, enabled: bool) -> Self {
        self.config.suspend_reconnect_on_protocol_failure = enabled;
        self
    }

    pub fn disconnected_behavior(mut self, behavior: DisconnectedBehavior) -> Self {
        self.config.disconnected_behavior = behavior;
        self
    }

    /// Set the reconnect backoff bounds
    pub fn reconnect_delay(mut self, initial: Duration, max: Duration) -> Self {
        self.config.reconnect_delay = ReconnectDelay { initial, max };
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.config.password = Some(password.into());
        self
    }

    pub fn database(mut self, db: u32) -> Self {
        self.config.database = Some(db);
        self
    }

    pub fn client_name(mut self, name: impl Into<String>) -> Self {
        self.config.client_name = Some(name.into());
        self
    }

    pub fn build(self) -> ClientConfig {
        self.config
    }
}
