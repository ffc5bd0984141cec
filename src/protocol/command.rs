//! Command definitions
//!
//! The wire-level shape of a request: a keyword plus binary-safe arguments.
//! Arguments are already encoded (by a [`ValueCodec`](crate::value::ValueCodec)
//! or by the caller); nothing here interprets payload bytes.

use std::fmt;

use bytes::Bytes;

/// Command keywords
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CommandType {
    // Connection / server
    Ping,
    Echo,
    Auth,
    Select,
    Client,
    Quit,

    // Strings
    Get,
    Set,
    Incr,
    IncrBy,
    Decr,
    Append,
    StrLen,
    MGet,

    // Keys
    Del,
    Exists,
    Expire,
    Ttl,

    // Transactions
    Multi,
    Exec,
    Discard,
    Watch,
    Unwatch,

    // Pub/Sub
    Subscribe,
    Unsubscribe,
    PSubscribe,
    PUnsubscribe,
    Publish,

    /// Any keyword without a dedicated variant
    Custom(String),
}

impl CommandType {
    /// Keyword as sent on the wire
    pub fn as_str(&self) -> &str {
        match self {
            CommandType::Ping => "PING",
            CommandType::Echo => "ECHO",
            CommandType::Auth => "AUTH",
            CommandType::Select => "SELECT",
            CommandType::Client => "CLIENT",
            CommandType::Quit => "QUIT",
            CommandType::Get => "GET",
            CommandType::Set => "SET",
            CommandType::Incr => "INCR",
            CommandType::IncrBy => "INCRBY",
            CommandType::Decr => "DECR",
            CommandType::Append => "APPEND",
            CommandType::StrLen => "STRLEN",
            CommandType::MGet => "MGET",
            CommandType::Del => "DEL",
            CommandType::Exists => "EXISTS",
            CommandType::Expire => "EXPIRE",
            CommandType::Ttl => "TTL",
            CommandType::Multi => "MULTI",
            CommandType::Exec => "EXEC",
            CommandType::Discard => "DISCARD",
            CommandType::Watch => "WATCH",
            CommandType::Unwatch => "UNWATCH",
            CommandType::Subscribe => "SUBSCRIBE",
            CommandType::Unsubscribe => "UNSUBSCRIBE",
            CommandType::PSubscribe => "PSUBSCRIBE",
            CommandType::PUnsubscribe => "PUNSUBSCRIBE",
            CommandType::Publish => "PUBLISH",
            CommandType::Custom(name) => name,
        }
    }

    /// Resolve a keyword, case-insensitively
    pub fn parse(name: &str) -> CommandType {
        match name.to_ascii_uppercase().as_str() {
            "PING" => CommandType::Ping,
            "ECHO" => CommandType::Echo,
            "AUTH" => CommandType::Auth,
            "SELECT" => CommandType::Select,
            "CLIENT" => CommandType::Client,
            "QUIT" => CommandType::Quit,
            "GET" => CommandType::Get,
            "SET" => CommandType::Set,
            "INCR" => CommandType::Incr,
            "INCRBY" => CommandType::IncrBy,
            "DECR" => CommandType::Decr,
            "APPEND" => CommandType::Append,
            "STRLEN" => CommandType::StrLen,
            "MGET" => CommandType::MGet,
            "DEL" => CommandType::Del,
            "EXISTS" => CommandType::Exists,
            "EXPIRE" => CommandType::Expire,
            "TTL" => CommandType::Ttl,
            "MULTI" => CommandType::Multi,
            "EXEC" => CommandType::Exec,
            "DISCARD" => CommandType::Discard,
            "WATCH" => CommandType::Watch,
            "UNWATCH" => CommandType::Unwatch,
            "SUBSCRIBE" => CommandType::Subscribe,
            "UNSUBSCRIBE" => CommandType::Unsubscribe,
            "PSUBSCRIBE" => CommandType::PSubscribe,
            "PUNSUBSCRIBE" => CommandType::PUnsubscribe,
            "PUBLISH" => CommandType::Publish,
            _ => CommandType::Custom(name.to_string()),
        }
    }

    /// Map a `Custom` keyword that names a known command onto its variant
    pub fn normalize(self) -> CommandType {
        match self {
            CommandType::Custom(name) => CommandType::parse(&name),
            known => known,
        }
    }

    /// MULTI / EXEC / DISCARD, which only the transaction coordinator may send
    pub fn is_transaction_control(&self) -> bool {
        match self {
            CommandType::Multi | CommandType::Exec | CommandType::Discard => true,
            CommandType::Custom(name) => matches!(
                CommandType::parse(name),
                CommandType::Multi | CommandType::Exec | CommandType::Discard
            ),
            _ => false,
        }
    }

    /// Subscription commands, whose replies are acknowledgements
    pub fn is_subscription(&self) -> bool {
        match self {
            CommandType::Subscribe
            | CommandType::Unsubscribe
            | CommandType::PSubscribe
            | CommandType::PUnsubscribe => true,
            CommandType::Custom(name) => matches!(
                CommandType::parse(name),
                CommandType::Subscribe
                    | CommandType::Unsubscribe
                    | CommandType::PSubscribe
                    | CommandType::PUnsubscribe
            ),
            _ => false,
        }
    }
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A command keyword plus its encoded arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandArgs {
    command_type: CommandType,
    args: Vec<Bytes>,
}

impl CommandArgs {
    /// Start a command with no arguments
    ///
    /// A `Custom` keyword naming a known command resolves to its variant.
    pub fn new(command_type: CommandType) -> Self {
        Self {
            command_type: command_type.normalize(),
            args: Vec::new(),
        }
    }

    /// Append a binary-safe argument
    pub fn arg(mut self, arg: impl Into<Bytes>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append an integer argument in decimal form
    pub fn arg_int(mut self, value: i64) -> Self {
        self.args.push(Bytes::from(value.to_string()));
        self
    }

    /// Append several arguments
    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Bytes>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Get the command type
    pub fn command_type(&self) -> &CommandType {
        &self.command_type
    }

    /// Encoded arguments, keyword excluded
    pub fn arguments(&self) -> &[Bytes] {
        &self.args
    }
}
