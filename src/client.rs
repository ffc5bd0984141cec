//! Client facade
//!
//! Owns a validated configuration and a handle to shared resources, and
//! opens connections from them.

use crate::config::ClientConfig;
use crate::error::Result;
use crate::network::{Connection, ConnectionKind};
use crate::resources::ClientResources;

/// Entry point for opening connections
pub struct Client {
    config: ClientConfig,
    resources: ClientResources,
}

impl Client {
    /// Create a client with its own resources
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let resources = ClientResources::create()?;
        Ok(Self { config, resources })
    }

    /// Create a client sharing existing resources
    pub fn with_resources(config: ClientConfig, resources: ClientResources) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, resources })
    }

    /// Open a connection for commands and transactions
    pub fn connect(&self) -> Result<Connection> {
        Connection::open(
            self.config.clone(),
            self.resources.clone(),
            ConnectionKind::Standard,
        )
    }

    /// Open a connection dedicated to subscriptions
    pub fn connect_pubsub(&self) -> Result<Connection> {
        Connection::open(
            self.config.clone(),
            self.resources.clone(),
            ConnectionKind::PubSub,
        )
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn resources(&self) -> &ClientResources {
        &self.resources
    }
}
