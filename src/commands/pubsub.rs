//! Publishing
//!
//! Subscribing is connection state, not a command; see
//! [`Connection::subscribe`](crate::network::Connection::subscribe).

use super::Commands;
use crate::command::{output, Command};
use crate::error::Result;
use crate::protocol::{CommandArgs, CommandType};
use crate::value::ValueCodec;

impl<C: ValueCodec> Commands<C> {
    /// `PUBLISH channel message`; yields the number of receivers
    ///
    /// The channel name is encoded with the key codec.
    pub fn publish(&self, channel: &C::Key, message: &C::Value) -> Result<Command<i64>> {
        let args = CommandArgs::new(CommandType::Publish)
            .arg(self.key(channel)?)
            .arg(self.value(message)?);
        Ok(Command::new(args, output::integer))
    }
}
