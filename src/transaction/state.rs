//! Transaction bookkeeping
//!
//! Inside MULTI the store answers every command with `QUEUED`; the real
//! results arrive later as one array reply to EXEC. Each queued command
//! therefore has two parts:
//!
//! - a [`QueuedAck`] in the command queue, consuming the `QUEUED` reply
//! - a member in [`TransactionState`], resolved from the EXEC array
//!
//! EXEC and DISCARD are queue entries too, so all replies still match by
//! position.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use super::{ExecOutcome, TxResult};
use crate::command::{Output, QueuedCommand};
use crate::completion::CompletionHandle;
use crate::error::ClientError;
use crate::protocol::{CommandType, Reply};

/// Final resolution of one queued command
pub(crate) trait TransactionMember: Send {
    /// Its slot in the EXEC array
    fn resolve(self: Box<Self>, reply: Reply);

    /// The transaction was discarded
    fn discard(self: Box<Self>);

    /// EXEC returned nil: a watched key changed
    fn abort(self: Box<Self>);

    fn fail(self: Box<Self>, error: ClientError);
}

pub(crate) struct Member<T> {
    output: Output<T>,
    handle: CompletionHandle<TxResult<T>>,
}

impl<T: Send + Sync + 'static> Member<T> {
    pub(crate) fn new(output: Output<T>, handle: CompletionHandle<TxResult<T>>) -> Self {
        Self { output, handle }
    }
}

impl<T: Send + Sync + 'static> TransactionMember for Member<T> {
    fn resolve(self: Box<Self>, reply: Reply) {
        let Member { output, handle } = *self;
        let outcome = match reply {
            Reply::Error(message) => Err(ClientError::Server(message)),
            reply => output(reply),
        };
        match outcome {
            Ok(value) => handle.complete(TxResult::Value(value)),
            Err(e) => handle.complete_exceptionally(e),
        };
    }

    fn discard(self: Box<Self>) {
        self.handle.complete(TxResult::Discarded);
    }

    fn abort(self: Box<Self>) {
        self.handle.complete(TxResult::Aborted);
    }

    fn fail(self: Box<Self>, error: ClientError) {
        self.handle.complete_exceptionally(error);
    }
}

/// Members of one MULTI block, in queue order
pub(crate) struct TransactionState {
    members: Mutex<Vec<Box<dyn TransactionMember>>>,
    sent: AtomicUsize,
}

impl TransactionState {
    pub(crate) fn new() -> Self {
        Self {
            members: Mutex::new(Vec::new()),
            sent: AtomicUsize::new(0),
        }
    }

    pub(crate) fn record_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Commands written (or buffered) inside the block
    pub(crate) fn sent(&self) -> usize {
        self.sent.load(Ordering::Relaxed)
    }

    fn push(&self, member: Box<dyn TransactionMember>) {
        self.members.lock().push(member);
    }

    fn take_members(&self) -> Vec<Box<dyn TransactionMember>> {
        std::mem::take(&mut *self.members.lock())
    }

    /// Fail every member still waiting for EXEC
    pub(crate) fn fail_all(&self, error: &ClientError) -> usize {
        let members = self.take_members();
        let count = members.len();
        for member in members {
            member.fail(error.clone());
        }
        count
    }
}

/// Queue entry for a command sent inside MULTI
pub(crate) struct QueuedAck {
    command_type: CommandType,
    member: Box<dyn TransactionMember>,
    state: Arc<TransactionState>,
    submitted_at: Instant,
}

impl QueuedAck {
    pub(crate) fn new(
        command_type: CommandType,
        member: Box<dyn TransactionMember>,
        state: Arc<TransactionState>,
    ) -> Self {
        Self {
            command_type,
            member,
            state,
            submitted_at: Instant::now(),
        }
    }
}

impl QueuedCommand for QueuedAck {
    fn command_type(&self) -> &CommandType {
        &self.command_type
    }

    fn complete(self: Box<Self>, reply: Reply) {
        let QueuedAck {
            command_type,
            member,
            state,
            ..
        } = *self;
        match reply {
            Reply::Status(s) if s.eq_ignore_ascii_case("QUEUED") => state.push(member),
            Reply::Error(message) => {
                // Rejected at queue time; EXEC will not include it
                tracing::debug!("{} rejected inside MULTI: {}", command_type, message);
                member.fail(ClientError::Server(message));
            }
            other => member.fail(ClientError::UnexpectedReply(format!(
                "expected QUEUED for {}, got {}",
                command_type,
                other.type_name()
            ))),
        }
    }

    fn fail(self: Box<Self>, error: ClientError) {
        self.member.fail(error);
    }

    fn is_done(&self) -> bool {
        false
    }

    fn submitted_at(&self) -> Instant {
        self.submitted_at
    }
}

/// Queue entry for EXEC
pub(crate) struct ExecEntry {
    command_type: CommandType,
    state: Arc<TransactionState>,
    handle: CompletionHandle<ExecOutcome>,
    submitted_at: Instant,
}

impl ExecEntry {
    pub(crate) fn new(state: Arc<TransactionState>) -> Self {
        Self {
            command_type: CommandType::Exec,
            state,
            handle: CompletionHandle::new(),
            submitted_at: Instant::now(),
        }
    }

    pub(crate) fn handle(&self) -> CompletionHandle<ExecOutcome> {
        self.handle.clone()
    }
}

impl QueuedCommand for ExecEntry {
    fn command_type(&self) -> &CommandType {
        &self.command_type
    }

    fn complete(self: Box<Self>, reply: Reply) {
        let members = self.state.take_members();
        match reply {
            Reply::Array(results) => {
                if results.len() != members.len() {
                    let error = ClientError::Protocol(format!(
                        "EXEC returned {} results for {} queued commands",
                        results.len(),
                        members.len()
                    ));
                    for member in members {
                        member.fail(error.clone());
                    }
                    self.handle.complete_exceptionally(error);
                    return;
                }
                let executed = results.len();
                for (member, result) in members.into_iter().zip(results) {
                    member.resolve(result);
                }
                self.handle.complete(ExecOutcome::Committed { executed });
            }
            Reply::NilArray | Reply::Nil => {
                tracing::debug!(
                    "Transaction aborted by a watched key ({} commands)",
                    members.len()
                );
                for member in members {
                    member.abort();
                }
                self.handle.complete(ExecOutcome::Aborted);
            }
            Reply::Error(message) => {
                let error = ClientError::Server(message);
                for member in members {
                    member.fail(error.clone());
                }
                self.handle.complete_exceptionally(error);
            }
            other => {
                let error = ClientError::UnexpectedReply(format!(
                    "expected array for EXEC, got {}",
                    other.type_name()
                ));
                for member in members {
                    member.fail(error.clone());
                }
                self.handle.complete_exceptionally(error);
            }
        }
    }

    fn fail(self: Box<Self>, error: ClientError) {
        self.state.fail_all(&error);
        self.handle.complete_exceptionally(error);
    }

    fn is_done(&self) -> bool {
        self.handle.is_done()
    }

    fn submitted_at(&self) -> Instant {
        self.submitted_at
    }
}

/// Queue entry for DISCARD
pub(crate) struct DiscardEntry {
    command_type: CommandType,
    state: Arc<TransactionState>,
    handle: CompletionHandle<()>,
    submitted_at: Instant,
}

impl DiscardEntry {
    pub(crate) fn new(state: Arc<TransactionState>) -> Self {
        Self {
            command_type: CommandType::Discard,
            state,
            handle: CompletionHandle::new(),
            submitted_at: Instant::now(),
        }
    }

    pub(crate) fn handle(&self) -> CompletionHandle<()> {
        self.handle.clone()
    }
}

impl QueuedCommand for DiscardEntry {
    fn command_type(&self) -> &CommandType {
        &self.command_type
    }

    fn complete(self: Box<Self>, reply: Reply) {
        let members = self.state.take_members();
        if reply.is_ok() {
            for member in members {
                member.discard();
            }
            self.handle.complete(());
            return;
        }

        let error = match reply {
            Reply::Error(message) => ClientError::Server(message),
            other => ClientError::UnexpectedReply(format!(
                "expected OK for DISCARD, got {}",
                other.type_name()
            )),
        };
        for member in members {
            member.fail(error.clone());
        }
        self.handle.complete_exceptionally(error);
    }

    fn fail(self: Box<Self>, error: ClientError) {
        self.state.fail_all(&error);
        self.handle.complete_exceptionally(error);
    }

    fn is_done(&self) -> bool {
        self.handle.is_done()
    }

    fn submitted_at(&self) -> Instant {
        self.submitted_at
    }
}
