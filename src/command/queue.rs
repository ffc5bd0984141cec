//! Command queue
//!
//! Outstanding commands of one connection in write order. Producers are the
//! caller threads (serialized by the connection's write lock); the only
//! regular consumer is the connection's reader. Replies are matched purely by
//! position, never by content.

use crossbeam::queue::SegQueue;

use super::QueuedCommand;
use crate::error::ClientError;

/// FIFO of commands awaiting replies
#[derive(Default)]
pub struct CommandQueue {
    entries: SegQueue<Box<dyn QueuedCommand>>,
}

impl CommandQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self {
            entries: SegQueue::new(),
        }
    }

    /// Append a command whose bytes are about to be written
    pub fn append(&self, command: Box<dyn QueuedCommand>) {
        self.entries.push(command);
    }

    /// Remove the command the next reply belongs to
    pub fn poll_oldest(&self) -> Option<Box<dyn QueuedCommand>> {
        self.entries.pop()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fail every remaining command, oldest first
    ///
    /// Returns the number of commands failed.
    pub fn drain_and_fail_all(&self, error: &ClientError) -> usize {
        let mut failed = 0;
        while let Some(command) = self.entries.pop() {
            command.fail(error.clone());
            failed += 1;
        }
        failed
    }
}
