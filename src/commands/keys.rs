//! Key-space commands

use super::Commands;
use crate::command::{output, Command};
use crate::error::{ClientError, Result};
use crate::protocol::{CommandArgs, CommandType};
use crate::value::ValueCodec;

impl<C: ValueCodec> Commands<C> {
    /// `DEL key...`; yields the number of keys removed
    pub fn del(&self, keys: &[C::Key]) -> Result<Command<i64>> {
        let args = CommandArgs::new(CommandType::Del).args(non_empty(self.keys(keys)?, "DEL")?);
        Ok(Command::new(args, output::integer))
    }

    /// `EXISTS key...`; yields how many of the keys exist
    pub fn exists(&self, keys: &[C::Key]) -> Result<Command<i64>> {
        let args =
            CommandArgs::new(CommandType::Exists).args(non_empty(self.keys(keys)?, "EXISTS")?);
        Ok(Command::new(args, output::integer))
    }

    /// `EXPIRE key seconds`; `false` if the key does not exist
    pub fn expire(&self, key: &C::Key, seconds: u64) -> Result<Command<bool>> {
        let args = CommandArgs::new(CommandType::Expire)
            .arg(self.key(key)?)
            .arg(seconds.to_string());
        Ok(Command::new(args, output::boolean))
    }

    /// `TTL key`; -1 without expiry, -2 for a missing key
    pub fn ttl(&self, key: &C::Key) -> Result<Command<i64>> {
        let args = CommandArgs::new(CommandType::Ttl).arg(self.key(key)?);
        Ok(Command::new(args, output::integer))
    }
}

fn non_empty<T>(items: Vec<T>, command: &str) -> Result<Vec<T>> {
    if items.is_empty() {
        return Err(ClientError::InvalidCommand(format!(
            "{} needs at least one key",
            command
        )));
    }
    Ok(items)
}
