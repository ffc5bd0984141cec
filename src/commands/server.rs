//! Connection and server commands

use super::Commands;
use crate::command::{output, Command};
use crate::error::Result;
use crate::protocol::{CommandArgs, CommandType};
use crate::value::ValueCodec;

impl<C: ValueCodec> Commands<C> {
    /// `PING`; yields the status text (`PONG`)
    pub fn ping(&self) -> Command<String> {
        Command::new(CommandArgs::new(CommandType::Ping), output::status)
    }

    /// `ECHO value`
    pub fn echo(&self, value: &C::Value) -> Result<Command<C::Value>> {
        let args = CommandArgs::new(CommandType::Echo).arg(self.value(value)?);
        let codec = self.codec.clone();
        Ok(Command::new(args, move |reply| {
            codec.decode_value(&output::bulk(reply)?)
        }))
    }

    pub fn select(&self, db: u32) -> Command<()> {
        let args = CommandArgs::new(CommandType::Select).arg_int(i64::from(db));
        Command::new(args, output::ok)
    }

    pub fn auth(&self, password: &str) -> Command<()> {
        let args = CommandArgs::new(CommandType::Auth).arg(password.to_string());
        Command::new(args, output::ok)
    }

    pub fn client_setname(&self, name: &str) -> Command<()> {
        let args = CommandArgs::new(CommandType::Client)
            .arg("SETNAME")
            .arg(name.to_string());
        Command::new(args, output::ok)
    }
}
