//! Reply outputs
//!
//! Reusable reply-to-value transforms for [`Command::new`](super::Command::new).
//! Error replies never reach these; the dispatcher maps them to
//! `ClientError::Server` first.

use bytes::Bytes;

use crate::error::{ClientError, Result};
use crate::protocol::Reply;

fn unexpected(expected: &str, reply: &Reply) -> ClientError {
    ClientError::UnexpectedReply(format!(
        "expected {}, got {}",
        expected,
        reply.type_name()
    ))
}

/// `+OK`
pub fn ok(reply: Reply) -> Result<()> {
    match reply {
        Reply::Status(ref s) if s == "OK" => Ok(()),
        other => Err(unexpected("OK", &other)),
    }
}

/// Any status line
pub fn status(reply: Reply) -> Result<String> {
    match reply {
        Reply::Status(s) => Ok(s),
        other => Err(unexpected("status", &other)),
    }
}

pub fn integer(reply: Reply) -> Result<i64> {
    match reply {
        Reply::Integer(i) => Ok(i),
        other => Err(unexpected("integer", &other)),
    }
}

/// Integer reply read as a flag (`:1` / `:0`)
pub fn boolean(reply: Reply) -> Result<bool> {
    integer(reply).map(|i| i != 0)
}

/// Non-null bulk (a status line is accepted too)
pub fn bulk(reply: Reply) -> Result<Bytes> {
    match reply {
        Reply::Bulk(b) => Ok(b),
        Reply::Status(s) => Ok(Bytes::from(s)),
        other => Err(unexpected("bulk", &other)),
    }
}

/// Bulk that may be nil
pub fn optional_bulk(reply: Reply) -> Result<Option<Bytes>> {
    match reply {
        Reply::Nil => Ok(None),
        other => bulk(other).map(Some),
    }
}

pub fn array(reply: Reply) -> Result<Vec<Reply>> {
    match reply {
        Reply::Array(items) => Ok(items),
        other => Err(unexpected("array", &other)),
    }
}

/// Array of nullable bulks (MGET)
pub fn optional_bulk_array(reply: Reply) -> Result<Vec<Option<Bytes>>> {
    array(reply)?.into_iter().map(optional_bulk).collect()
}

/// Subscribe/unsubscribe acknowledgement `[kind, name, count]`
///
/// Yields the number of subscriptions the connection holds afterwards.
pub fn subscription_count(reply: Reply) -> Result<i64> {
    let items = array(reply)?;
    match items.as_slice() {
        [Reply::Bulk(_), _, Reply::Integer(count)] => Ok(*count),
        _ => Err(ClientError::UnexpectedReply(format!(
            "malformed subscription acknowledgement with {} elements",
            items.len()
        ))),
    }
}
