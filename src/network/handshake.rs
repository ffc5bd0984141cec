//! Connection handshake
//!
//! Runs on a fresh transport before it is handed to the reader, on the
//! initial connect and on every reconnect:
//!
//! 1. `AUTH password` if a password is configured
//! 2. `SELECT db` if a database is configured
//! 3. `CLIENT SETNAME name` if a client name is configured
//! 4. `PING`, expecting `PONG`, if ping-before-activate is enabled
//!
//! Each step is a synchronous round trip bounded by the connect timeout.

use bytes::BytesMut;

use super::transport::Stream;
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::protocol::{read_reply, write_command, CommandArgs, CommandType, Reply, ReplyDecoder};

/// Run the handshake on `stream`
///
/// Returns bytes read past the last handshake reply, which belong to the
/// reader's stream.
pub(crate) fn perform(stream: &mut Stream, config: &ClientConfig) -> Result<BytesMut> {
    let mut decoder = ReplyDecoder::new();
    let mut buffer = BytesMut::with_capacity(config.read_buffer_size);

    stream.set_read_timeout(Some(config.connect_timeout))?;

    if let Some(password) = &config.password {
        let args = CommandArgs::new(CommandType::Auth).arg(password.clone());
        expect_ok(round_trip(stream, &mut decoder, &mut buffer, &args)?, "AUTH")?;
    }

    if let Some(db) = config.database {
        let args = CommandArgs::new(CommandType::Select).arg_int(i64::from(db));
        expect_ok(round_trip(stream, &mut decoder, &mut buffer, &args)?, "SELECT")?;
    }

    if let Some(name) = &config.client_name {
        let args = CommandArgs::new(CommandType::Client)
            .arg("SETNAME")
            .arg(name.clone());
        expect_ok(round_trip(stream, &mut decoder, &mut buffer, &args)?, "CLIENT SETNAME")?;
    }

    if config.ping_before_activate_connection {
        let args = CommandArgs::new(CommandType::Ping);
        match round_trip(stream, &mut decoder, &mut buffer, &args)? {
            Reply::Status(s) if s.eq_ignore_ascii_case("PONG") => {}
            other => {
                return Err(ClientError::Connection(format!(
                    "PING before activation returned {}",
                    other.type_name()
                )))
            }
        }
    }

    stream.set_read_timeout(None)?;
    Ok(buffer)
}

fn round_trip(
    stream: &mut Stream,
    decoder: &mut ReplyDecoder,
    buffer: &mut BytesMut,
    args: &CommandArgs,
) -> Result<Reply> {
    write_command(stream, args)?;
    match read_reply(stream, decoder, buffer)? {
        Reply::Error(message) => Err(ClientError::Connection(format!(
            "{} rejected during handshake: {}",
            args.command_type(),
            message
        ))),
        reply => Ok(reply),
    }
}

fn expect_ok(reply: Reply, step: &str) -> Result<()> {
    if reply.is_ok() {
        Ok(())
    } else {
        Err(ClientError::Connection(format!(
            "{} returned {} instead of OK",
            step,
            reply.type_name()
        )))
    }
}
