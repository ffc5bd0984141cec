//! # AtlasKV Client
//!
//! Command-pipelining client engine for the AtlasKV protocol with:
//! - Any number of in-flight commands per connection, replies matched in order
//! - Resumable reply decoding across arbitrary read boundaries
//! - Completion handles with blocking, listener and bulk-await styles
//! - Automatic reconnection with command buffering and replay
//! - MULTI/EXEC/DISCARD transactions and WATCH
//! - Pub/Sub with per-connection ordered delivery
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Caller Threads                             │
//! │        submit / begin_transaction / subscribe                │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │  write lock: append + write
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                   Connection                                 │
//! │      CommandQueue (FIFO)  ──────▶  Transport (TCP / Unix)    │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │  replies
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │   Reader    │          │  Resources  │
//!   │ decode +    │─ push ──▶│ event lanes │
//!   │ complete    │          │ timer       │
//!   └──────┬──────┘          └─────────────┘
//!          │ transport lost
//!          ▼
//!   ┌─────────────┐
//!   │  Reconnect  │
//!   │  (backoff)  │
//!   └─────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod protocol;
pub mod value;
pub mod completion;
pub mod command;
pub mod commands;
pub mod network;
pub mod transaction;
pub mod pubsub;
pub mod resources;
pub mod client;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{ClientError, ErrorKind, Result};
pub use config::{ClientConfig, DisconnectedBehavior, Endpoint};
pub use client::Client;
pub use command::{Command, CommandQueue};
pub use commands::Commands;
pub use completion::{await_all, Awaitable, CompletionHandle};
pub use network::{Connection, ConnectionState};
pub use protocol::{CommandArgs, CommandType, Reply};
pub use pubsub::{Message, MessageListener};
pub use resources::ClientResources;
pub use transaction::{ExecOutcome, Transaction, TxResult};
pub use value::{BincodeCodec, ByteArrayCodec, Utf8Codec, ValueCodec};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of the AtlasKV client
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
