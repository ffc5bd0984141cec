//! Reconnection policy
//!
//! Decides, from configuration alone, whether a lost transport is
//! re-established, how long to back off between attempts, and what happens
//! to commands submitted while no transport is available.

use std::fmt;
use std::time::Duration;

use crate::config::{ClientConfig, DisconnectedBehavior, ReconnectDelay};
use crate::error::ClientError;

/// Largest doubling applied to the initial delay
const MAX_BACKOFF_SHIFT: u32 = 20;

/// Why a connection lost its transport
#[derive(Debug)]
pub enum DisconnectCause {
    /// The store closed the stream
    Eof,

    /// Read or write on the transport failed
    Transport(ClientError),

    /// The reply stream could not be interpreted; the connection is out of sync
    Protocol(ClientError),
}

impl DisconnectCause {
    pub fn is_protocol_failure(&self) -> bool {
        matches!(self, DisconnectCause::Protocol(_))
    }

    /// Error handed to every command outstanding at the time of the loss
    pub fn to_error(&self) -> ClientError {
        match self {
            DisconnectCause::Eof => {
                ClientError::Connection("connection closed by peer".to_string())
            }
            DisconnectCause::Transport(e) => {
                ClientError::Connection(format!("transport failure: {}", e))
            }
            DisconnectCause::Protocol(e) => e.clone(),
        }
    }
}

impl fmt::Display for DisconnectCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectCause::Eof => write!(f, "end of stream"),
            DisconnectCause::Transport(e) => write!(f, "transport: {}", e),
            DisconnectCause::Protocol(e) => write!(f, "protocol: {}", e),
        }
    }
}

/// Reconnect behavior of one connection
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    auto_reconnect: bool,
    cancel_on_failure: bool,
    suspend_on_protocol_failure: bool,
    behavior: DisconnectedBehavior,
    delay: ReconnectDelay,
}

impl ReconnectPolicy {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            auto_reconnect: config.auto_reconnect,
            cancel_on_failure: config.cancel_commands_on_reconnect_failure,
            suspend_on_protocol_failure: config.suspend_reconnect_on_protocol_failure,
            behavior: config.disconnected_behavior,
            delay: config.reconnect_delay,
        }
    }

    /// Whether to start reconnecting after losing the transport
    pub fn should_reconnect(&self, cause: &DisconnectCause) -> bool {
        self.auto_reconnect && !(cause.is_protocol_failure() && self.suspend_on_protocol_failure)
    }

    /// Backoff before attempt `attempt` (0-based): doubles, capped at the max
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(MAX_BACKOFF_SHIFT);
        self.delay.initial.saturating_mul(factor).min(self.delay.max)
    }

    /// Whether commands submitted while disconnected are buffered for replay
    pub fn accepts_while_disconnected(&self) -> bool {
        match self.behavior {
            DisconnectedBehavior::Default => self.auto_reconnect,
            DisconnectedBehavior::AcceptCommands => true,
            DisconnectedBehavior::RejectCommands => false,
        }
    }

    /// Whether buffered commands are failed when a reconnect attempt fails
    pub fn cancel_on_reconnect_failure(&self) -> bool {
        self.cancel_on_failure
    }
}
