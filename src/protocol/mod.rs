//! Protocol Module
//!
//! Defines the wire protocol spoken between client and store.
//!
//! ## Request Format
//! An array of binary-safe bulk strings, keyword first.
//!
//! ## Reply Types
//! - `+` status
//! - `-` error
//! - `:` integer
//! - `$` bulk (binary-safe, `$-1` is nil)
//! - `*` array (nested, `*-1` is nil)
//!
//! Encoding is pure. Decoding is incremental and resumable across reads.

mod command;
mod reply;
mod codec;

pub use command::{CommandArgs, CommandType};
pub use reply::Reply;
pub use codec::{
    decode_reply, encode_command, encode_command_into, encode_reply, encode_reply_into,
    read_reply, write_command, Decoded, ReplyDecoder, MAX_BULK_LEN, MAX_DEPTH, MAX_INLINE_LEN,
};
