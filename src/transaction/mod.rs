//! Transaction Module
//!
//! Client-side coordination of MULTI/EXEC/DISCARD and WATCH.
//!
//! ## Flow
//! ```text
//!   begin_transaction ──▶ MULTI            (+OK)
//!   queue(cmd)        ──▶ cmd              (+QUEUED, member parked)
//!   queue(cmd)        ──▶ cmd              (+QUEUED, member parked)
//!   commit            ──▶ EXEC             (*N results ──▶ members, in order)
//!                                          (*-1       ──▶ every member Aborted)
//!   discard / drop    ──▶ DISCARD          (+OK       ──▶ every member Discarded)
//! ```
//!
//! While a transaction is open on a connection, plain submits are rejected,
//! so no unrelated command can be interleaved into the MULTI block.
//! A disconnect while the block is open fails every member with the
//! connection error; the store discards the block on its side.

mod state;

use std::sync::Arc;

pub(crate) use state::{DiscardEntry, ExecEntry, Member, QueuedAck, TransactionState};

use crate::command::Command;
use crate::completion::CompletionHandle;
use crate::error::Result;
use crate::network::Connection;

/// Result of a command queued inside MULTI
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxResult<T> {
    /// Executed by EXEC
    Value(T),

    /// The transaction was discarded before EXEC
    Discarded,

    /// EXEC was rejected because a watched key changed
    Aborted,
}

impl<T> TxResult<T> {
    pub fn value(self) -> Option<T> {
        match self {
            TxResult::Value(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_discarded(&self) -> bool {
        matches!(self, TxResult::Discarded)
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, TxResult::Aborted)
    }
}

/// Result of EXEC itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecOutcome {
    /// The block ran; `executed` results were delivered
    Committed { executed: usize },

    /// A watched key changed; nothing ran
    Aborted,
}

/// An open MULTI block on a connection
///
/// Dropping it without [`commit`](Transaction::commit) or
/// [`discard`](Transaction::discard) discards it.
pub struct Transaction<'a> {
    connection: &'a Connection,
    state: Arc<TransactionState>,
    started: CompletionHandle<()>,
    finished: bool,
}

impl<'a> Transaction<'a> {
    pub(crate) fn new(
        connection: &'a Connection,
        state: Arc<TransactionState>,
        started: CompletionHandle<()>,
    ) -> Self {
        Self {
            connection,
            state,
            started,
            finished: false,
        }
    }

    /// Acknowledgement of MULTI itself
    pub fn started(&self) -> &CompletionHandle<()> {
        &self.started
    }

    /// Queue a command inside the block
    ///
    /// The returned handle resolves when EXEC or DISCARD is answered, or
    /// fails early if the store rejects the command at queue time.
    pub fn queue<T: Send + Sync + 'static>(
        &mut self,
        command: Command<T>,
    ) -> Result<CompletionHandle<TxResult<T>>> {
        self.connection.queue_in_transaction(&self.state, command)
    }

    /// Number of commands queued so far
    pub fn queued(&self) -> usize {
        self.state.sent()
    }

    /// Send EXEC
    pub fn commit(mut self) -> Result<CompletionHandle<ExecOutcome>> {
        let handle = self.connection.commit_transaction(&self.state)?;
        self.finished = true;
        Ok(handle)
    }

    /// Send DISCARD
    pub fn discard(mut self) -> Result<CompletionHandle<()>> {
        let handle = self.connection.discard_transaction(&self.state)?;
        self.finished = true;
        Ok(handle)
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        match self.connection.discard_transaction(&self.state) {
            Ok(_) => tracing::debug!(
                "Connection {}: discarded unfinished transaction ({} queued)",
                self.connection.id(),
                self.state.sent()
            ),
            Err(e) => tracing::debug!(
                "Connection {}: unfinished transaction not discarded: {}",
                self.connection.id(),
                e
            ),
        }
    }
}
