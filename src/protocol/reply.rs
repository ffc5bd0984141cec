//! Reply definitions
//!
//! A decoded reply tree. Produced once per command by the reader and consumed
//! immediately to resolve a completion handle.

use bytes::Bytes;

/// A decoded reply, possibly nested
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// `+OK`
    Status(String),

    /// `-ERR message`
    Error(String),

    /// `:42`
    Integer(i64),

    /// `$5\r\nhello` (binary-safe)
    Bulk(Bytes),

    /// `$-1`
    Nil,

    /// `*N` followed by N replies
    Array(Vec<Reply>),

    /// `*-1` (aborted transaction, timed-out blocking pop)
    NilArray,
}

impl Reply {
    /// Create a status reply
    pub fn status(message: &str) -> Self {
        Reply::Status(message.to_string())
    }

    /// Create an error reply
    pub fn error(message: &str) -> Self {
        Reply::Error(message.to_string())
    }

    /// Create a bulk reply from anything byte-like
    pub fn bulk(data: impl Into<Bytes>) -> Self {
        Reply::Bulk(data.into())
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }

    /// Either null variant
    pub fn is_nil(&self) -> bool {
        matches!(self, Reply::Nil | Reply::NilArray)
    }

    /// True for `+OK`
    pub fn is_ok(&self) -> bool {
        matches!(self, Reply::Status(s) if s == "OK")
    }

    /// Payload of a bulk or status reply
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Reply::Bulk(b) => Some(b),
            Reply::Status(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Reply::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Short variant name for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Reply::Status(_) => "status",
            Reply::Error(_) => "error",
            Reply::Integer(_) => "integer",
            Reply::Bulk(_) => "bulk",
            Reply::Nil => "nil",
            Reply::Array(_) => "array",
            Reply::NilArray => "nil array",
        }
    }
}
