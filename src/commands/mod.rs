//! Commands Module
//!
//! Typed command builders. Keys and values go through the injected
//! [`ValueCodec`]; replies are decoded back through the same codec. The
//! builders only produce [`Command`](crate::command::Command) values, so
//! they work with any connection, inside or outside a transaction.
//!
//! ```text
//!   Commands<Utf8Codec>::get("k") ──▶ Command<Option<String>> ──▶ Connection::submit
//! ```

mod keys;
mod pubsub;
mod server;
mod strings;
mod transactions;

use bytes::Bytes;

use crate::error::Result;
use crate::value::ValueCodec;

/// Typed command factory for one codec
#[derive(Debug, Clone, Default)]
pub struct Commands<C> {
    codec: C,
}

impl<C: ValueCodec> Commands<C> {
    pub fn new(codec: C) -> Self {
        Self { codec }
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    fn key(&self, key: &C::Key) -> Result<Bytes> {
        self.codec.encode_key(key)
    }

    fn keys(&self, keys: &[C::Key]) -> Result<Vec<Bytes>> {
        keys.iter().map(|k| self.codec.encode_key(k)).collect()
    }

    fn value(&self, value: &C::Value) -> Result<Bytes> {
        self.codec.encode_value(value)
    }
}
