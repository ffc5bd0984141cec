//! Protocol codec
//!
//! Encoding and decoding functions for the wire protocol.
//!
//! ## Wire Format
//!
//! ### Request Format
//! Every request is an array of bulk strings, keyword first:
//! ```text
//! *<argc>\r\n  $<len>\r\n<keyword>\r\n  $<len>\r\n<arg>\r\n ...
//! ```
//!
//! ### Reply Format
//! ```text
//! ┌──────────┬─────────────────────────────────────────────┐
//! │ Type (1) │ Body                                        │
//! ├──────────┼─────────────────────────────────────────────┤
//! │   '+'    │ status line \r\n                            │
//! │   '-'    │ error line \r\n                             │
//! │   ':'    │ signed decimal \r\n                         │
//! │   '$'    │ len \r\n <len bytes> \r\n   (len -1 = nil)  │
//! │   '*'    │ count \r\n <count replies>  (count -1 = nil)│
//! └──────────┴─────────────────────────────────────────────┘
//! ```
//!
//! The decoder is resumable: transport reads land on arbitrary boundaries, so
//! completed lines and bulk bodies are consumed as soon as they are whole and
//! partially-built arrays are kept on a stack between calls.

use std::io::{Read, Write};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::{CommandArgs, Reply};
use crate::error::{ClientError, Result};

/// Line terminator
pub const CRLF: &[u8] = b"\r\n";

/// Maximum bulk string size (512 MB)
pub const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// Maximum array nesting depth
pub const MAX_DEPTH: usize = 64;

/// Maximum length of a single status/error/integer/header line (64 KB)
pub const MAX_INLINE_LEN: usize = 64 * 1024;

/// Cap on pre-allocation for a declared array length
const MAX_PREALLOC: usize = 1024;

// =============================================================================
// Command Encoding
// =============================================================================

/// Encode a command to bytes
///
/// Fails only for a keyword that cannot be framed (empty, whitespace or
/// control bytes); arguments are binary-safe.
pub fn encode_command(args: &CommandArgs) -> Result<Bytes> {
    let mut dst = BytesMut::with_capacity(encoded_len_hint(args));
    encode_command_into(args, &mut dst)?;
    Ok(dst.freeze())
}

/// Encode a command, appending to `dst`
pub fn encode_command_into(args: &CommandArgs, dst: &mut BytesMut) -> Result<()> {
    let keyword = args.command_type().as_str();
    if keyword.is_empty() {
        return Err(ClientError::InvalidCommand("empty command keyword".to_string()));
    }
    if keyword
        .bytes()
        .any(|b| b.is_ascii_whitespace() || b.is_ascii_control())
    {
        return Err(ClientError::InvalidCommand(format!(
            "keyword {:?} contains whitespace or control bytes",
            keyword
        )));
    }

    let arguments = args.arguments();
    put_header(dst, b'*', (arguments.len() + 1) as i64);
    put_bulk(dst, keyword.as_bytes());
    for arg in arguments {
        put_bulk(dst, arg);
    }
    Ok(())
}

fn encoded_len_hint(args: &CommandArgs) -> usize {
    let payload: usize = args.arguments().iter().map(|a| a.len() + 16).sum();
    payload + args.command_type().as_str().len() + 32
}

fn put_header(dst: &mut BytesMut, type_byte: u8, value: i64) {
    dst.put_u8(type_byte);
    dst.extend_from_slice(value.to_string().as_bytes());
    dst.extend_from_slice(CRLF);
}

fn put_bulk(dst: &mut BytesMut, data: &[u8]) {
    put_header(dst, b'$', data.len() as i64);
    dst.extend_from_slice(data);
    dst.extend_from_slice(CRLF);
}

// =============================================================================
// Reply Encoding
// =============================================================================

/// Encode a reply to bytes (server side of the protocol)
pub fn encode_reply(reply: &Reply) -> Bytes {
    let mut dst = BytesMut::new();
    encode_reply_into(reply, &mut dst);
    dst.freeze()
}

/// Encode a reply, appending to `dst`
pub fn encode_reply_into(reply: &Reply, dst: &mut BytesMut) {
    match reply {
        Reply::Status(s) => {
            dst.put_u8(b'+');
            dst.extend_from_slice(s.as_bytes());
            dst.extend_from_slice(CRLF);
        }
        Reply::Error(s) => {
            dst.put_u8(b'-');
            dst.extend_from_slice(s.as_bytes());
            dst.extend_from_slice(CRLF);
        }
        Reply::Integer(i) => put_header(dst, b':', *i),
        Reply::Bulk(b) => put_bulk(dst, b),
        Reply::Nil => dst.extend_from_slice(b"$-1\r\n"),
        Reply::NilArray => dst.extend_from_slice(b"*-1\r\n"),
        Reply::Array(items) => {
            put_header(dst, b'*', items.len() as i64);
            for item in items {
                encode_reply_into(item, dst);
            }
        }
    }
}

// =============================================================================
// Reply Decoding
// =============================================================================

/// Outcome of a one-shot decode over a byte slice
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// A whole reply and the number of bytes it occupied
    Complete { reply: Reply, consumed: usize },

    /// The slice ends mid-frame
    NeedMoreData,
}

/// Decode the first reply in `bytes` without keeping state
pub fn decode_reply(bytes: &[u8]) -> Result<Decoded> {
    let mut buf = BytesMut::from(bytes);
    let mut decoder = ReplyDecoder::new();
    match decoder.decode(&mut buf)? {
        Some(reply) => Ok(Decoded::Complete {
            reply,
            consumed: bytes.len() - buf.len(),
        }),
        None => Ok(Decoded::NeedMoreData),
    }
}

/// An array whose elements are still arriving
#[derive(Debug)]
struct PartialArray {
    remaining: usize,
    items: Vec<Reply>,
}

/// What one parsing step produced
enum Step {
    Value(Reply),
    Continue,
    NeedMore,
}

/// Incremental reply decoder
///
/// Feed it the connection's read buffer after every read. Bytes belonging to
/// completed pieces are removed from the buffer even when the enclosing reply
/// is not finished yet; the decoder remembers where it was.
#[derive(Debug)]
pub struct ReplyDecoder {
    stack: Vec<PartialArray>,
    pending_bulk: Option<usize>,
    max_depth: usize,
    max_bulk_len: usize,
}

impl Default for ReplyDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplyDecoder {
    /// Create a decoder with default limits
    pub fn new() -> Self {
        Self::with_limits(MAX_DEPTH, MAX_BULK_LEN)
    }

    /// Create a decoder with explicit nesting and bulk size limits
    pub fn with_limits(max_depth: usize, max_bulk_len: usize) -> Self {
        Self {
            stack: Vec::new(),
            pending_bulk: None,
            max_depth,
            max_bulk_len,
        }
    }

    /// True while a reply has been started but not finished
    pub fn is_mid_frame(&self) -> bool {
        !self.stack.is_empty() || self.pending_bulk.is_some()
    }

    /// Forget any partially decoded reply
    pub fn reset(&mut self) {
        self.stack.clear();
        self.pending_bulk = None;
    }

    /// Decode the next complete reply from `src`
    ///
    /// Returns `Ok(None)` when more bytes are needed. Any error is fatal for
    /// the byte stream: framing can no longer be trusted.
    pub fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Reply>> {
        loop {
            match self.step(src)? {
                Step::Value(value) => {
                    if let Some(reply) = self.attach(value) {
                        return Ok(Some(reply));
                    }
                }
                Step::Continue => {}
                Step::NeedMore => return Ok(None),
            }
        }
    }

    /// Push a finished value into the innermost open array, closing arrays
    /// that become full. Returns the top-level reply once it is complete.
    fn attach(&mut self, mut value: Reply) -> Option<Reply> {
        while let Some(top) = self.stack.last_mut() {
            top.items.push(value);
            top.remaining -= 1;
            if top.remaining > 0 {
                return None;
            }
            let finished = self.stack.pop()?;
            value = Reply::Array(finished.items);
        }
        Some(value)
    }

    fn step(&mut self, src: &mut BytesMut) -> Result<Step> {
        if let Some(len) = self.pending_bulk {
            if src.len() < len + CRLF.len() {
                return Ok(Step::NeedMore);
            }
            if &src[len..len + CRLF.len()] != CRLF {
                return Err(ClientError::Protocol(format!(
                    "bulk string of {} bytes not terminated by CRLF",
                    len
                )));
            }
            let data = src.split_to(len).freeze();
            src.advance(CRLF.len());
            self.pending_bulk = None;
            return Ok(Step::Value(Reply::Bulk(data)));
        }

        let type_byte = match src.first() {
            Some(b) => *b,
            None => return Ok(Step::NeedMore),
        };
        if !matches!(type_byte, b'+' | b'-' | b':' | b'$' | b'*') {
            return Err(ClientError::Protocol(format!(
                "unknown reply type byte 0x{:02x}",
                type_byte
            )));
        }

        let line_end = match find_crlf(src) {
            Some(pos) => pos,
            None => {
                if src.len() > MAX_INLINE_LEN {
                    return Err(ClientError::Protocol(format!(
                        "reply line exceeds {} bytes",
                        MAX_INLINE_LEN
                    )));
                }
                return Ok(Step::NeedMore);
            }
        };

        let line = src.split_to(line_end + CRLF.len());
        let body = &line[1..line_end];

        match type_byte {
            b'+' => Ok(Step::Value(Reply::Status(
                String::from_utf8_lossy(body).into_owned(),
            ))),
            b'-' => Ok(Step::Value(Reply::Error(
                String::from_utf8_lossy(body).into_owned(),
            ))),
            b':' => Ok(Step::Value(Reply::Integer(parse_integer(body)?))),
            b'$' => {
                let len = parse_integer(body)?;
                if len == -1 {
                    return Ok(Step::Value(Reply::Nil));
                }
                if len < 0 {
                    return Err(ClientError::Protocol(format!(
                        "invalid bulk length {}",
                        len
                    )));
                }
                let len = len as usize;
                if len > self.max_bulk_len {
                    return Err(ClientError::Protocol(format!(
                        "bulk length {} exceeds limit {}",
                        len, self.max_bulk_len
                    )));
                }
                self.pending_bulk = Some(len);
                Ok(Step::Continue)
            }
            b'*' => {
                let count = parse_integer(body)?;
                if count == -1 {
                    return Ok(Step::Value(Reply::NilArray));
                }
                if count < 0 {
                    return Err(ClientError::Protocol(format!(
                        "invalid array length {}",
                        count
                    )));
                }
                if count == 0 {
                    return Ok(Step::Value(Reply::Array(Vec::new())));
                }
                if self.stack.len() >= self.max_depth {
                    return Err(ClientError::Protocol(format!(
                        "array nesting exceeds depth {}",
                        self.max_depth
                    )));
                }
                let count = count as usize;
                self.stack.push(PartialArray {
                    remaining: count,
                    items: Vec::with_capacity(count.min(MAX_PREALLOC)),
                });
                Ok(Step::Continue)
            }
            other => Err(ClientError::Protocol(format!(
                "unknown reply type byte 0x{:02x}",
                other
            ))),
        }
    }
}

fn find_crlf(bytes: &[u8]) -> Option<usize> {
    bytes.windows(CRLF.len()).position(|w| w == CRLF)
}

fn parse_integer(body: &[u8]) -> Result<i64> {
    std::str::from_utf8(body)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| {
            ClientError::Protocol(format!(
                "invalid integer {:?}",
                String::from_utf8_lossy(body)
            ))
        })
}

// =============================================================================
// Stream-based I/O helpers
// =============================================================================

/// Write a command to a stream
pub fn write_command<W: Write>(writer: &mut W, args: &CommandArgs) -> Result<()> {
    let bytes = encode_command(args)?;
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(())
}

/// Read one complete reply from a stream
///
/// Blocks until a reply is decoded. Bytes past the reply stay in `buf`.
pub fn read_reply<R: Read>(
    reader: &mut R,
    decoder: &mut ReplyDecoder,
    buf: &mut BytesMut,
) -> Result<Reply> {
    let mut chunk = [0u8; 4096];
    loop {
        if let Some(reply) = decoder.decode(buf)? {
            return Ok(reply);
        }
        let n = reader.read(&mut chunk)?;
        if n == 0 {
            return Err(ClientError::Connection(
                "connection closed while reading reply".to_string(),
            ));
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}
