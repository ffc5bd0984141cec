//! Network Module
//!
//! Connections to the store and their transport lifecycle.
//!
//! ## Architecture
//! - One reader thread per connection, owning decode and completion
//! - Writes serialized by a per-connection write lock
//! - Handshake replayed on every (re)connect
//! - Reconnect with exponential backoff, driven by the reader

mod connection;
mod handshake;
mod reconnect;
mod transport;

pub use connection::{Connection, ConnectionState};
pub(crate) use connection::ConnectionKind;
pub use reconnect::{DisconnectCause, ReconnectPolicy};
