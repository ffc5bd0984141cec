//! Command Module
//!
//! A command pairs encoded request arguments with the transform that turns
//! its reply into a typed value. When submitted, the connection pairs it with
//! a [`CompletionHandle`] and a submission timestamp and parks it in the
//! [`CommandQueue`] until its reply arrives.
//!
//! ## Lifecycle
//! ```text
//!  caller            write path                    reader
//!  ──────            ──────────                    ──────
//!  Command<T> ──▶ Dispatch<T> + handle ──▶ queue ──▶ complete(reply)
//!                  (append + write, atomic)          └─▶ handle settled
//! ```

mod queue;
pub mod output;

use std::time::Instant;

pub use queue::CommandQueue;

use crate::completion::CompletionHandle;
use crate::error::{ClientError, Result};
use crate::protocol::{CommandArgs, CommandType, Reply};

pub(crate) type Output<T> = Box<dyn FnOnce(Reply) -> Result<T> + Send>;

/// A unit of work: request arguments plus a reply transform
pub struct Command<T> {
    args: CommandArgs,
    output: Output<T>,
}

impl<T: Send + Sync + 'static> Command<T> {
    /// Create a command with a reply transform
    ///
    /// The transform never sees error replies; those always complete the
    /// handle with [`ClientError::Server`].
    pub fn new<F>(args: CommandArgs, output: F) -> Self
    where
        F: FnOnce(Reply) -> Result<T> + Send + 'static,
    {
        Self {
            args,
            output: Box::new(output),
        }
    }

    /// Transform the decoded value
    pub fn map<U, F>(self, f: F) -> Command<U>
    where
        U: Send + Sync + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        let output = self.output;
        Command {
            args: self.args,
            output: Box::new(move |reply| output(reply).map(f)),
        }
    }

    pub(crate) fn into_parts(self) -> (CommandArgs, Output<T>) {
        (self.args, self.output)
    }
}

impl<T> Command<T> {
    pub fn args(&self) -> &CommandArgs {
        &self.args
    }

    pub fn command_type(&self) -> &CommandType {
        self.args.command_type()
    }
}

impl Command<Reply> {
    /// A command whose value is the raw reply tree
    pub fn raw(args: CommandArgs) -> Self {
        Command::new(args, Ok)
    }
}

/// A type-erased command waiting for its reply in a [`CommandQueue`]
pub trait QueuedCommand: Send {
    fn command_type(&self) -> &CommandType;

    /// Consume the reply matched to this command
    fn complete(self: Box<Self>, reply: Reply);

    /// Fail the command without a reply
    fn fail(self: Box<Self>, error: ClientError);

    /// Already settled (cancelled or timed out) while still queued
    fn is_done(&self) -> bool;

    fn submitted_at(&self) -> Instant;
}

/// A submitted command paired with its handle
pub(crate) struct Dispatch<T> {
    command_type: CommandType,
    output: Output<T>,
    handle: CompletionHandle<T>,
    submitted_at: Instant,
}

impl<T: Send + Sync + 'static> Dispatch<T> {
    pub(crate) fn new(command_type: CommandType, output: Output<T>) -> Self {
        Self {
            command_type,
            output,
            handle: CompletionHandle::new(),
            submitted_at: Instant::now(),
        }
    }

    pub(crate) fn handle(&self) -> CompletionHandle<T> {
        self.handle.clone()
    }
}

impl<T: Send + Sync + 'static> QueuedCommand for Dispatch<T> {
    fn command_type(&self) -> &CommandType {
        &self.command_type
    }

    fn complete(self: Box<Self>, reply: Reply) {
        let Dispatch {
            command_type,
            output,
            handle,
            submitted_at,
        } = *self;

        if handle.is_done() {
            tracing::trace!(
                "Consumed late reply for {} after {:?}",
                command_type,
                submitted_at.elapsed()
            );
            return;
        }

        let outcome = match reply {
            Reply::Error(message) => Err(ClientError::Server(message)),
            reply => output(reply),
        };
        match outcome {
            Ok(value) => handle.complete(value),
            Err(e) => handle.complete_exceptionally(e),
        };
    }

    fn fail(self: Box<Self>, error: ClientError) {
        self.handle.complete_exceptionally(error);
    }

    fn is_done(&self) -> bool {
        self.handle.is_done()
    }

    fn submitted_at(&self) -> Instant {
        self.submitted_at
    }
}
