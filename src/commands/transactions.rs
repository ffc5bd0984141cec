//! Optimistic locking
//!
//! MULTI/EXEC/DISCARD are not built here; they are driven by
//! [`Connection::begin_transaction`](crate::network::Connection::begin_transaction).

use super::Commands;
use crate::command::{output, Command};
use crate::error::{ClientError, Result};
use crate::protocol::{CommandArgs, CommandType};
use crate::value::ValueCodec;

impl<C: ValueCodec> Commands<C> {
    /// `WATCH key...`
    pub fn watch(&self, keys: &[C::Key]) -> Result<Command<()>> {
        if keys.is_empty() {
            return Err(ClientError::InvalidCommand(
                "WATCH needs at least one key".to_string(),
            ));
        }
        let args = CommandArgs::new(CommandType::Watch).args(self.keys(keys)?);
        Ok(Command::new(args, output::ok))
    }

    pub fn unwatch(&self) -> Command<()> {
        Command::new(CommandArgs::new(CommandType::Unwatch), output::ok)
    }
}
