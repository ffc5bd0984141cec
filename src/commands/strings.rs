//! String commands

use super::Commands;
use crate::command::{output, Command};
use crate::error::Result;
use crate::protocol::{CommandArgs, CommandType};
use crate::value::ValueCodec;

impl<C: ValueCodec> Commands<C> {
    /// `GET key`; `None` when the key does not exist
    pub fn get(&self, key: &C::Key) -> Result<Command<Option<C::Value>>> {
        let args = CommandArgs::new(CommandType::Get).arg(self.key(key)?);
        let codec = self.codec.clone();
        Ok(Command::new(args, move |reply| {
            output::optional_bulk(reply)?
                .map(|bytes| codec.decode_value(&bytes))
                .transpose()
        }))
    }

    /// `SET key value`
    pub fn set(&self, key: &C::Key, value: &C::Value) -> Result<Command<()>> {
        let args = CommandArgs::new(CommandType::Set)
            .arg(self.key(key)?)
            .arg(self.value(value)?);
        Ok(Command::new(args, output::ok))
    }

    /// `SET key value EX seconds`
    pub fn set_ex(&self, key: &C::Key, value: &C::Value, seconds: u64) -> Result<Command<()>> {
        let args = CommandArgs::new(CommandType::Set)
            .arg(self.key(key)?)
            .arg(self.value(value)?)
            .arg("EX")
            .arg(seconds.to_string());
        Ok(Command::new(args, output::ok))
    }

    pub fn incr(&self, key: &C::Key) -> Result<Command<i64>> {
        let args = CommandArgs::new(CommandType::Incr).arg(self.key(key)?);
        Ok(Command::new(args, output::integer))
    }

    pub fn incr_by(&self, key: &C::Key, delta: i64) -> Result<Command<i64>> {
        let args = CommandArgs::new(CommandType::IncrBy)
            .arg(self.key(key)?)
            .arg_int(delta);
        Ok(Command::new(args, output::integer))
    }

    pub fn decr(&self, key: &C::Key) -> Result<Command<i64>> {
        let args = CommandArgs::new(CommandType::Decr).arg(self.key(key)?);
        Ok(Command::new(args, output::integer))
    }

    /// `APPEND key value`; yields the new length
    pub fn append(&self, key: &C::Key, value: &C::Value) -> Result<Command<i64>> {
        let args = CommandArgs::new(CommandType::Append)
            .arg(self.key(key)?)
            .arg(self.value(value)?);
        Ok(Command::new(args, output::integer))
    }

    pub fn strlen(&self, key: &C::Key) -> Result<Command<i64>> {
        let args = CommandArgs::new(CommandType::StrLen).arg(self.key(key)?);
        Ok(Command::new(args, output::integer))
    }

    /// `MGET key...`; one slot per key, `None` for missing keys
    pub fn mget(&self, keys: &[C::Key]) -> Result<Command<Vec<Option<C::Value>>>> {
        let args = CommandArgs::new(CommandType::MGet).args(self.keys(keys)?);
        let codec = self.codec.clone();
        Ok(Command::new(args, move |reply| {
            output::optional_bulk_array(reply)?
                .into_iter()
                .map(|slot| slot.map(|bytes| codec.decode_value(&bytes)).transpose())
                .collect()
        }))
    }
}
