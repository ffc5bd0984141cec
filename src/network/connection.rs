//! Connection
//!
//! One logical connection to the store, pipelining any number of commands
//! over a single transport.
//!
//! ## Threads
//! - Caller threads run the write path: under the write lock a command is
//!   appended to the queue and its bytes are written, as one atomic step.
//! - One reader thread per connection decodes replies, completes commands
//!   oldest first, hands push messages to an event lane and drives
//!   reconnection after a transport loss.
//!
//! ## States
//! ```text
//!   Connecting ──▶ Connected ──▶ Disconnected ──▶ Reconnecting ──▶ Connected
//!                      │               ▲                │
//!                      │               └──── failure ───┘
//!                      └──────────────▶ Closed ◀──── close() from any state
//! ```

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use parking_lot::{Condvar, Mutex, RwLock};

use super::handshake;
use super::reconnect::{DisconnectCause, ReconnectPolicy};
use super::transport::Stream;
use crate::command::{output, Command, CommandQueue, Dispatch, QueuedCommand};
use crate::completion::{deadline_after, CompletionHandle};
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::protocol::{encode_command, encode_command_into, CommandArgs, CommandType, Reply, ReplyDecoder};
use crate::pubsub::{self, Message, MessageListener, Subscriptions};
use crate::resources::ClientResources;
use crate::transaction::{
    DiscardEntry, ExecEntry, ExecOutcome, Member, QueuedAck, Transaction, TransactionState,
    TxResult,
};

/// Poll slice while waiting for the queue to drain on close
const DRAIN_POLL: Duration = Duration::from_millis(10);

/// Lifecycle state of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
    Reconnecting,
    Closed,
}

/// What the connection is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnectionKind {
    Standard,
    PubSub,
}

/// A command written while no transport was available
struct Pending {
    entry: Box<dyn QueuedCommand>,
    bytes: Bytes,
    transactional: bool,
}

/// State guarded by the write lock
struct Channel {
    state: ConnectionState,

    /// Present exactly while Connected
    writer: Option<Stream>,

    /// Commands waiting for a transport, in submission order
    buffered: VecDeque<Pending>,

    /// Set when the connection will never reconnect on its own
    reconnect_suspended: bool,

    /// Open MULTI block, if any
    transaction: Option<Arc<TransactionState>>,
}

struct Shared {
    id: u64,
    config: ClientConfig,
    policy: ReconnectPolicy,

    /// Released on close
    resources: RwLock<Option<ClientResources>>,

    queue: CommandQueue,
    channel: Mutex<Channel>,
    subscriptions: Option<Subscriptions>,

    closing: Mutex<bool>,
    closing_signal: Condvar,

    idle: Mutex<()>,
    idle_signal: Condvar,
}

/// A pipelined connection to the store
///
/// Safe to share between threads; every method takes `&self`. Dropping the
/// connection closes it without waiting for outstanding replies.
pub struct Connection {
    shared: Arc<Shared>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    /// Connect, run the handshake and start the reader thread
    pub(crate) fn open(
        config: ClientConfig,
        resources: ClientResources,
        kind: ConnectionKind,
    ) -> Result<Connection> {
        config.validate()?;

        let id = resources.next_connection_id();
        let shared = Arc::new(Shared {
            id,
            policy: ReconnectPolicy::from_config(&config),
            resources: RwLock::new(Some(resources)),
            queue: CommandQueue::new(),
            channel: Mutex::new(Channel {
                state: ConnectionState::Connecting,
                writer: None,
                buffered: VecDeque::new(),
                reconnect_suspended: false,
                transaction: None,
            }),
            subscriptions: match kind {
                ConnectionKind::Standard => None,
                ConnectionKind::PubSub => Some(Subscriptions::new()),
            },
            closing: Mutex::new(false),
            closing_signal: Condvar::new(),
            idle: Mutex::new(()),
            idle_signal: Condvar::new(),
            config,
        });

        tracing::debug!("Connection {}: connecting to {}", id, shared.config.endpoint);

        let (stream, leftover) = match shared.establish() {
            Ok(established) => established,
            Err(e) => {
                tracing::warn!(
                    "Connection {}: connect to {} failed: {}",
                    id,
                    shared.config.endpoint,
                    e
                );
                shared.force_close();
                return Err(e);
            }
        };

        let reader = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name(format!("atlaskv-reader-{}", id))
                .spawn(move || shared.run(stream, leftover))
        };
        let reader = match reader {
            Ok(handle) => handle,
            Err(e) => {
                shared.force_close();
                return Err(e.into());
            }
        };

        Ok(Connection {
            shared,
            reader: Mutex::new(Some(reader)),
        })
    }

    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.channel.lock().state
    }

    pub fn is_pubsub(&self) -> bool {
        self.shared.subscriptions.is_some()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    /// Commands written and still awaiting a reply
    pub fn pending_commands(&self) -> usize {
        self.shared.queue.len()
    }

    /// Commands held back until a transport is available
    pub fn buffered_commands(&self) -> usize {
        self.shared.channel.lock().buffered.len()
    }

    /// Submit a command; its reply arrives on the returned handle
    ///
    /// Fails immediately (nothing queued) if the command cannot be encoded,
    /// the connection is closed or rejects commands while disconnected, or
    /// the request queue is full. MULTI/EXEC/DISCARD go through
    /// [`begin_transaction`](Connection::begin_transaction) and subscription
    /// commands through [`subscribe`](Connection::subscribe) and friends.
    pub fn submit<T: Send + Sync + 'static>(&self, command: Command<T>) -> Result<CompletionHandle<T>> {
        let command_type = command.command_type();
        if command_type.is_transaction_control() {
            return Err(ClientError::InvalidCommand(format!(
                "{} is issued through begin_transaction",
                command_type
            )));
        }
        if command_type.is_subscription() {
            return Err(ClientError::InvalidCommand(format!(
                "{} is issued through the subscription methods",
                command_type
            )));
        }
        self.send(command)
    }

    /// Submit and block for the reply
    ///
    /// On timeout the handle is failed, so the eventual reply is consumed
    /// without being delivered.
    pub fn submit_blocking<T>(&self, command: Command<T>, timeout: Duration) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let handle = self.submit(command)?;
        match handle.get(timeout) {
            Err(ClientError::Timeout(elapsed)) => {
                if handle.complete_exceptionally(ClientError::Timeout(elapsed)) {
                    Err(ClientError::Timeout(elapsed))
                } else {
                    handle.wait()
                }
            }
            outcome => outcome,
        }
    }

    // -------------------------------------------------------------------------
    // Transactions
    // -------------------------------------------------------------------------

    /// Send MULTI and open a transaction
    ///
    /// Until it is committed or discarded, every other submit on this
    /// connection is rejected.
    pub fn begin_transaction(&self) -> Result<Transaction<'_>> {
        let args = CommandArgs::new(CommandType::Multi);
        let bytes = encode_command(&args)?;
        let dispatch = Dispatch::new(CommandType::Multi, Box::new(output::ok));
        let started = dispatch.handle();
        let state = Arc::new(TransactionState::new());

        {
            let mut channel = self.shared.channel.lock();
            if channel.transaction.is_some() {
                return Err(ClientError::Transaction(
                    "MULTI calls can not be nested".to_string(),
                ));
            }
            self.shared
                .write_locked(&mut channel, Box::new(dispatch), bytes, true)?;
            channel.transaction = Some(Arc::clone(&state));
        }
        self.shared.arm_timeout(&started);

        tracing::trace!("Connection {}: MULTI", self.shared.id);
        Ok(Transaction::new(self, state, started))
    }

    /// WATCH keys for the next transaction
    pub fn watch<I, K>(&self, keys: I) -> Result<CompletionHandle<()>>
    where
        I: IntoIterator<Item = K>,
        K: Into<Bytes>,
    {
        let args = CommandArgs::new(CommandType::Watch).args(keys);
        if args.arguments().is_empty() {
            return Err(ClientError::InvalidCommand(
                "WATCH needs at least one key".to_string(),
            ));
        }
        self.submit(Command::new(args, output::ok))
    }

    pub fn unwatch(&self) -> Result<CompletionHandle<()>> {
        self.submit(Command::new(CommandArgs::new(CommandType::Unwatch), output::ok))
    }

    pub(crate) fn queue_in_transaction<T: Send + Sync + 'static>(
        &self,
        state: &Arc<TransactionState>,
        command: Command<T>,
    ) -> Result<CompletionHandle<TxResult<T>>> {
        let command_type = command.command_type();
        if command_type.is_transaction_control() || command_type.is_subscription() {
            return Err(ClientError::InvalidCommand(format!(
                "{} can not be queued inside MULTI",
                command_type
            )));
        }
        if *command_type == CommandType::Watch {
            return Err(ClientError::Transaction(
                "WATCH inside MULTI is not allowed".to_string(),
            ));
        }

        let (args, output) = command.into_parts();
        let bytes = encode_command(&args)?;
        let handle = CompletionHandle::new();
        let ack = QueuedAck::new(
            args.command_type().clone(),
            Box::new(Member::new(output, handle.clone())),
            Arc::clone(state),
        );

        let mut channel = self.shared.channel.lock();
        ensure_active(&channel, state)?;
        self.shared
            .write_locked(&mut channel, Box::new(ack), bytes, true)?;
        state.record_sent();
        Ok(handle)
    }

    pub(crate) fn commit_transaction(
        &self,
        state: &Arc<TransactionState>,
    ) -> Result<CompletionHandle<ExecOutcome>> {
        let bytes = encode_command(&CommandArgs::new(CommandType::Exec))?;
        let entry = ExecEntry::new(Arc::clone(state));
        let handle = entry.handle();
        {
            let mut channel = self.shared.channel.lock();
            ensure_active(&channel, state)?;
            self.shared
                .write_locked(&mut channel, Box::new(entry), bytes, true)?;
            channel.transaction = None;
        }
        self.shared.arm_timeout(&handle);
        tracing::trace!("Connection {}: EXEC ({} queued)", self.shared.id, state.sent());
        Ok(handle)
    }

    pub(crate) fn discard_transaction(
        &self,
        state: &Arc<TransactionState>,
    ) -> Result<CompletionHandle<()>> {
        let bytes = encode_command(&CommandArgs::new(CommandType::Discard))?;
        let entry = DiscardEntry::new(Arc::clone(state));
        let handle = entry.handle();
        {
            let mut channel = self.shared.channel.lock();
            ensure_active(&channel, state)?;
            self.shared
                .write_locked(&mut channel, Box::new(entry), bytes, true)?;
            channel.transaction = None;
        }
        self.shared.arm_timeout(&handle);
        tracing::trace!("Connection {}: DISCARD", self.shared.id);
        Ok(handle)
    }

    // -------------------------------------------------------------------------
    // Pub/Sub
    // -------------------------------------------------------------------------

    /// Subscribe to a channel
    ///
    /// The listener is registered before SUBSCRIBE is written, so no message
    /// published after the acknowledgement is missed. The handle yields the
    /// subscription count reported by the store.
    pub fn subscribe<L>(&self, channel: impl Into<Bytes>, listener: L) -> Result<CompletionHandle<i64>>
    where
        L: MessageListener + 'static,
    {
        let subscriptions = self.subscriptions()?;
        let channel = channel.into();
        let listener: Arc<dyn MessageListener> = Arc::new(listener);
        subscriptions.add_channel(channel.clone(), Arc::clone(&listener));
        let sent = self.send(Command::new(
            CommandArgs::new(CommandType::Subscribe).arg(channel.clone()),
            output::subscription_count,
        ));
        if sent.is_err() {
            subscriptions.withdraw_channel(&channel, &listener);
        }
        sent
    }

    /// Subscribe to every channel matching a glob pattern
    pub fn psubscribe<L>(&self, pattern: impl Into<Bytes>, listener: L) -> Result<CompletionHandle<i64>>
    where
        L: MessageListener + 'static,
    {
        let subscriptions = self.subscriptions()?;
        let pattern = pattern.into();
        let listener: Arc<dyn MessageListener> = Arc::new(listener);
        subscriptions.add_pattern(pattern.clone(), Arc::clone(&listener));
        let sent = self.send(Command::new(
            CommandArgs::new(CommandType::PSubscribe).arg(pattern.clone()),
            output::subscription_count,
        ));
        if sent.is_err() {
            subscriptions.withdraw_pattern(&pattern, &listener);
        }
        sent
    }

    /// Drop a channel subscription and all its listeners
    pub fn unsubscribe(&self, channel: impl Into<Bytes>) -> Result<CompletionHandle<i64>> {
        let subscriptions = self.subscriptions()?;
        let channel = channel.into();
        subscriptions.remove_channel(&channel);
        self.send(Command::new(
            CommandArgs::new(CommandType::Unsubscribe).arg(channel),
            output::subscription_count,
        ))
    }

    /// Drop a pattern subscription and all its listeners
    pub fn punsubscribe(&self, pattern: impl Into<Bytes>) -> Result<CompletionHandle<i64>> {
        let subscriptions = self.subscriptions()?;
        let pattern = pattern.into();
        subscriptions.remove_pattern(&pattern);
        self.send(Command::new(
            CommandArgs::new(CommandType::PUnsubscribe).arg(pattern),
            output::subscription_count,
        ))
    }

    fn subscriptions(&self) -> Result<&Subscriptions> {
        self.shared.subscriptions.as_ref().ok_or_else(|| {
            ClientError::InvalidCommand(format!(
                "connection {} is not a pub/sub connection",
                self.shared.id
            ))
        })
    }

    // -------------------------------------------------------------------------
    // Close
    // -------------------------------------------------------------------------

    /// Close the connection
    ///
    /// Waits up to `timeout` for outstanding commands to complete, then
    /// closes the transport and fails whatever is left with
    /// [`ClientError::ConnectionClosed`]. Returns `true` if nothing was left.
    /// Idempotent.
    pub fn close(&self, timeout: Duration) -> bool {
        let drained = self.shared.await_idle(timeout);
        if !drained {
            tracing::debug!(
                "Connection {}: closing with {} commands outstanding",
                self.shared.id,
                self.shared.outstanding()
            );
        }
        self.shared.force_close();
        self.join_reader();
        drained
    }

    fn join_reader(&self) {
        let reader = self.reader.lock().take();
        if let Some(reader) = reader {
            if reader.thread().id() == thread::current().id() {
                return;
            }
            if reader.join().is_err() {
                tracing::error!("Connection {}: reader thread panicked", self.shared.id);
            }
        }
    }

    /// Encode, then append and write under the write lock
    fn send<T: Send + Sync + 'static>(&self, command: Command<T>) -> Result<CompletionHandle<T>> {
        let (args, output) = command.into_parts();
        let bytes = encode_command(&args)?;
        let dispatch = Dispatch::new(args.command_type().clone(), output);
        let handle = dispatch.handle();
        {
            let mut channel = self.shared.channel.lock();
            if channel.transaction.is_some() {
                return Err(ClientError::Transaction(format!(
                    "connection {} is inside MULTI; queue commands through the transaction",
                    self.shared.id
                )));
            }
            self.shared
                .write_locked(&mut channel, Box::new(dispatch), bytes, false)?;
        }
        self.shared.arm_timeout(&handle);
        Ok(handle)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shared.force_close();
    }
}

/// Buffered commands sorted for replay on (re)connect
///
/// A command settled while buffered (cancelled or timed out) was never
/// written and has no reply slot to keep, so it is skipped. Inside a MULTI
/// block that would run the other members outside the block, so a settled
/// entry abandons its whole block instead.
struct Replay {
    send: Vec<Pending>,
    abandoned: Vec<Pending>,
    dropped: usize,

    /// The abandoned block is still open (no EXEC or DISCARD buffered yet)
    open_block_abandoned: bool,
}

impl Replay {
    fn sort(buffered: Vec<Pending>) -> Replay {
        let mut replay = Replay {
            send: Vec::with_capacity(buffered.len()),
            abandoned: Vec::new(),
            dropped: 0,
            open_block_abandoned: false,
        };
        let mut block: Vec<Pending> = Vec::new();

        for pending in buffered {
            if !pending.transactional {
                if pending.entry.is_done() {
                    replay.dropped += 1;
                } else {
                    replay.send.push(pending);
                }
                continue;
            }
            let closes = matches!(
                pending.entry.command_type(),
                CommandType::Exec | CommandType::Discard
            );
            block.push(pending);
            if closes {
                replay.finish_block(std::mem::take(&mut block));
            }
        }
        if !block.is_empty() {
            let abandoned_before = replay.abandoned.len();
            replay.finish_block(block);
            replay.open_block_abandoned = replay.abandoned.len() > abandoned_before;
        }
        replay
    }

    fn finish_block(&mut self, block: Vec<Pending>) {
        if block.iter().any(|pending| pending.entry.is_done()) {
            self.abandoned.extend(block);
        } else {
            self.send.extend(block);
        }
    }
}

fn ensure_active(channel: &Channel, state: &Arc<TransactionState>) -> Result<()> {
    match &channel.transaction {
        Some(active) if Arc::ptr_eq(active, state) => Ok(()),
        _ => Err(ClientError::Transaction(
            "transaction is no longer active".to_string(),
        )),
    }
}

impl Shared {
    // -------------------------------------------------------------------------
    // Write path
    // -------------------------------------------------------------------------

    /// Append and write one command; the caller holds the write lock
    fn write_locked(
        &self,
        channel: &mut Channel,
        entry: Box<dyn QueuedCommand>,
        bytes: Bytes,
        transactional: bool,
    ) -> Result<()> {
        let outstanding = self.queue.len() + channel.buffered.len();
        if outstanding >= self.config.request_queue_size {
            return Err(ClientError::QueueFull(self.config.request_queue_size));
        }

        match channel.state {
            ConnectionState::Connected => {
                self.queue.append(entry);
                if let Some(writer) = channel.writer.as_mut() {
                    if let Err(e) = writer.write_all(&bytes).and_then(|_| writer.flush()) {
                        // The reader sees the broken transport and fails the queue
                        tracing::warn!("Connection {}: write failed: {}", self.id, e);
                        writer.shutdown();
                    }
                }
                Ok(())
            }
            ConnectionState::Closed => Err(ClientError::ConnectionClosed),
            state => {
                if channel.reconnect_suspended || !self.policy.accepts_while_disconnected() {
                    return Err(ClientError::Connection(format!(
                        "connection {} is {:?} and not accepting commands",
                        self.id, state
                    )));
                }
                tracing::trace!(
                    "Connection {}: buffering {} while {:?}",
                    self.id,
                    entry.command_type(),
                    state
                );
                channel.buffered.push_back(Pending {
                    entry,
                    bytes,
                    transactional,
                });
                Ok(())
            }
        }
    }

    /// Fail the handle with a timeout if no reply arrives in time
    fn arm_timeout<T: Send + Sync + 'static>(&self, handle: &CompletionHandle<T>) {
        let timeout = match self.config.command_timeout {
            Some(timeout) => timeout,
            None => return,
        };
        let resources = self.resources.read().clone();
        if let Some(resources) = resources {
            let weak = handle.downgrade();
            let watched = handle.downgrade();
            let id = self.id;
            let live = move || watched.upgrade().map_or(false, |handle| !handle.is_done());
            resources.schedule(timeout, live, move || {
                if let Some(handle) = weak.upgrade() {
                    if handle.complete_exceptionally(ClientError::Timeout(timeout)) {
                        tracing::debug!("Connection {}: command timed out after {:?}", id, timeout);
                    }
                }
            });
        }
    }

    fn outstanding(&self) -> usize {
        self.queue.len() + self.channel.lock().buffered.len()
    }

    // -------------------------------------------------------------------------
    // Connect / activate
    // -------------------------------------------------------------------------

    /// Open a transport, run the handshake and activate it
    ///
    /// Returns the reader's half of the transport plus any bytes read past
    /// the handshake.
    fn establish(&self) -> Result<(Stream, BytesMut)> {
        let mut stream = Stream::connect(&self.config.endpoint, self.config.connect_timeout)?;
        let leftover = match handshake::perform(&mut stream, &self.config) {
            Ok(leftover) => leftover,
            Err(e) => {
                stream.shutdown();
                return Err(e);
            }
        };
        let writer = stream.try_clone()?;
        if let Err(e) = self.activate(writer) {
            stream.shutdown();
            return Err(e);
        }
        Ok((stream, leftover))
    }

    /// Install the writer and replay subscriptions and buffered commands
    fn activate(&self, writer: Stream) -> Result<()> {
        let mut channel = self.channel.lock();
        if channel.state == ConnectionState::Closed {
            writer.shutdown();
            return Err(ClientError::ConnectionClosed);
        }

        let mut batch = BytesMut::new();
        let mut resubscribed = 0;
        if let Some(subscriptions) = &self.subscriptions {
            let channels = subscriptions
                .channels()
                .into_iter()
                .map(|c| (CommandType::Subscribe, c));
            let patterns = subscriptions
                .patterns()
                .into_iter()
                .map(|p| (CommandType::PSubscribe, p));
            for (command_type, name) in channels.chain(patterns) {
                encode_command_into(&CommandArgs::new(command_type.clone()).arg(name), &mut batch)?;
                self.queue.append(Box::new(Dispatch::new(
                    command_type,
                    Box::new(output::subscription_count),
                )));
                resubscribed += 1;
            }
        }

        let buffered: Vec<Pending> = channel.buffered.drain(..).collect();
        let Replay {
            send,
            abandoned,
            dropped,
            open_block_abandoned,
        } = Replay::sort(buffered);
        let replayed = send.len();
        for pending in send {
            batch.extend_from_slice(&pending.bytes);
            self.queue.append(pending.entry);
        }
        let transaction = if open_block_abandoned {
            channel.transaction.take()
        } else {
            None
        };

        let mut writer = writer;
        if !batch.is_empty() {
            if let Err(e) = writer.write_all(&batch).and_then(|_| writer.flush()) {
                tracing::warn!("Connection {}: replay write failed: {}", self.id, e);
                writer.shutdown();
            }
        }
        channel.writer = Some(writer);
        channel.state = ConnectionState::Connected;
        drop(channel);

        if !abandoned.is_empty() {
            let error = ClientError::Transaction(
                "MULTI block was cancelled before it could be sent".to_string(),
            );
            tracing::debug!(
                "Connection {}: abandoned {} commands of a cancelled MULTI block",
                self.id,
                abandoned.len()
            );
            for pending in abandoned {
                pending.entry.fail(error.clone());
            }
            if let Some(transaction) = transaction {
                transaction.fail_all(&error);
            }
        }
        if dropped > 0 {
            tracing::debug!(
                "Connection {}: skipped {} buffered commands settled before replay",
                self.id,
                dropped
            );
        }

        tracing::info!(
            "Connection {}: connected to {} (replayed {}, resubscribed {})",
            self.id,
            self.config.endpoint,
            replayed,
            resubscribed
        );
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Reader
    // -------------------------------------------------------------------------

    fn run(self: Arc<Self>, stream: Stream, leftover: BytesMut) {
        let mut stream = stream;
        let mut leftover = leftover;
        loop {
            let cause = self.read_loop(&mut stream, leftover);
            stream.shutdown();
            if !self.handle_disconnect(&cause) {
                break;
            }
            match self.reconnect() {
                Some((next, rest)) => {
                    stream = next;
                    leftover = rest;
                }
                None => break,
            }
        }
        tracing::debug!("Connection {}: reader stopped", self.id);
    }

    /// Decode and dispatch until the transport fails
    fn read_loop(&self, stream: &mut Stream, mut buffer: BytesMut) -> DisconnectCause {
        let mut decoder = ReplyDecoder::new();
        let mut chunk = vec![0u8; self.config.read_buffer_size];
        loop {
            loop {
                match decoder.decode(&mut buffer) {
                    Ok(Some(reply)) => {
                        if let Err(e) = self.dispatch(reply) {
                            return DisconnectCause::Protocol(e);
                        }
                    }
                    Ok(None) => break,
                    Err(e) => return DisconnectCause::Protocol(e),
                }
            }
            self.notify_if_idle();

            match stream.read(&mut chunk) {
                Ok(0) => return DisconnectCause::Eof,
                Ok(n) => buffer.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return DisconnectCause::Transport(e.into()),
            }
        }
    }

    /// Route one reply: push message to listeners, anything else to the
    /// oldest outstanding command
    fn dispatch(&self, reply: Reply) -> Result<()> {
        if let Some(subscriptions) = &self.subscriptions {
            if let Some(message) = pubsub::parse_push(&reply) {
                self.deliver(subscriptions, message);
                return Ok(());
            }
        }

        match self.queue.poll_oldest() {
            Some(command) => {
                command.complete(reply);
                Ok(())
            }
            None => Err(ClientError::Protocol(format!(
                "received {} reply with no outstanding command",
                reply.type_name()
            ))),
        }
    }

    fn deliver(&self, subscriptions: &Subscriptions, message: Message) {
        let listeners = subscriptions.listeners_for(&message);
        if listeners.is_empty() {
            tracing::trace!("Connection {}: no listener for message", self.id);
            return;
        }
        let resources = self.resources.read().clone();
        let queued = match resources {
            Some(resources) => resources.dispatch(self.id, move || {
                for listener in &listeners {
                    listener.on_message(&message);
                }
            }),
            None => false,
        };
        if !queued {
            tracing::warn!("Connection {}: dropped message, no event lane", self.id);
        }
    }

    // -------------------------------------------------------------------------
    // Disconnect / reconnect
    // -------------------------------------------------------------------------

    /// Fail everything tied to the lost transport
    ///
    /// Returns whether to start reconnecting.
    fn handle_disconnect(&self, cause: &DisconnectCause) -> bool {
        let error = cause.to_error();
        let reconnect = self.policy.should_reconnect(cause);

        let (transaction, rejected) = {
            let mut channel = self.channel.lock();
            if channel.state == ConnectionState::Closed {
                return false;
            }
            if let Some(writer) = channel.writer.take() {
                writer.shutdown();
            }
            channel.state = ConnectionState::Disconnected;
            let rejected: Vec<Pending> = if reconnect {
                Vec::new()
            } else {
                channel.reconnect_suspended = true;
                channel.buffered.drain(..).collect()
            };
            (channel.transaction.take(), rejected)
        };

        if cause.is_protocol_failure() {
            tracing::error!("Connection {}: disconnected: {}", self.id, cause);
        } else {
            tracing::warn!("Connection {}: disconnected: {}", self.id, cause);
        }

        let failed = self.queue.drain_and_fail_all(&error);
        if let Some(transaction) = transaction {
            transaction.fail_all(&error);
        }
        for pending in rejected {
            pending.entry.fail(error.clone());
        }
        if failed > 0 {
            tracing::debug!("Connection {}: failed {} outstanding commands", self.id, failed);
        }
        if !reconnect {
            tracing::info!("Connection {}: not reconnecting", self.id);
        }
        self.notify_if_idle();
        reconnect
    }

    fn reconnect(&self) -> Option<(Stream, BytesMut)> {
        let mut attempt: u32 = 0;
        loop {
            let delay = self.policy.delay(attempt);
            if self.wait_closing(delay) {
                return None;
            }
            if !self.set_state(ConnectionState::Reconnecting) {
                return None;
            }

            tracing::debug!(
                "Connection {}: reconnect attempt {} to {}",
                self.id,
                attempt + 1,
                self.config.endpoint
            );
            match self.establish() {
                Ok(established) => return Some(established),
                Err(ClientError::ConnectionClosed) => return None,
                Err(e) => {
                    attempt = attempt.saturating_add(1);
                    tracing::warn!(
                        "Connection {}: reconnect attempt {} failed: {}",
                        self.id,
                        attempt,
                        e
                    );
                    if !self.set_state(ConnectionState::Disconnected) {
                        return None;
                    }
                    if self.policy.cancel_on_reconnect_failure() {
                        let failed = self.fail_buffered(&ClientError::Connection(format!(
                            "reconnect failed: {}",
                            e
                        )));
                        if failed > 0 {
                            tracing::debug!(
                                "Connection {}: failed {} buffered commands",
                                self.id,
                                failed
                            );
                        }
                    }
                }
            }
        }
    }

    /// Move to `state` unless already closed
    fn set_state(&self, state: ConnectionState) -> bool {
        let mut channel = self.channel.lock();
        if channel.state == ConnectionState::Closed {
            return false;
        }
        channel.state = state;
        true
    }

    /// Fail every buffered command
    ///
    /// A partially buffered MULTI block can no longer be replayed as a unit,
    /// so the open transaction is reset with it.
    fn fail_buffered(&self, error: &ClientError) -> usize {
        let (pending, transaction) = {
            let mut channel = self.channel.lock();
            let pending: Vec<Pending> = channel.buffered.drain(..).collect();
            let transaction = if pending.iter().any(|p| p.transactional) {
                channel.transaction.take()
            } else {
                None
            };
            (pending, transaction)
        };

        let count = pending.len();
        for p in pending {
            p.entry.fail(error.clone());
        }
        if let Some(transaction) = transaction {
            transaction.fail_all(error);
        }
        self.notify_if_idle();
        count
    }

    /// Sleep for `delay` unless close is requested; returns true on close
    fn wait_closing(&self, delay: Duration) -> bool {
        let deadline = deadline_after(delay);
        let mut closing = self.closing.lock();
        while !*closing {
            if self.closing_signal.wait_until(&mut closing, deadline).timed_out() {
                break;
            }
        }
        *closing
    }

    // -------------------------------------------------------------------------
    // Close
    // -------------------------------------------------------------------------

    fn notify_if_idle(&self) {
        if self.queue.is_empty() {
            let _guard = self.idle.lock();
            self.idle_signal.notify_all();
        }
    }

    /// Wait until nothing is outstanding or `timeout` elapses
    fn await_idle(&self, timeout: Duration) -> bool {
        let deadline = deadline_after(timeout);
        let mut guard = self.idle.lock();
        loop {
            if self.outstanding() == 0 {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            // Bounded slices: buffered commands drain without an idle signal
            let slice = (now + DRAIN_POLL).min(deadline);
            self.idle_signal.wait_until(&mut guard, slice);
        }
    }

    fn force_close(&self) {
        {
            let mut closing = self.closing.lock();
            *closing = true;
            self.closing_signal.notify_all();
        }

        let (previous, pending, transaction) = {
            let mut channel = self.channel.lock();
            if channel.state == ConnectionState::Closed {
                return;
            }
            let previous = channel.state;
            channel.state = ConnectionState::Closed;
            if let Some(writer) = channel.writer.take() {
                writer.shutdown();
            }
            let pending: Vec<Pending> = channel.buffered.drain(..).collect();
            (previous, pending, channel.transaction.take())
        };

        let error = ClientError::ConnectionClosed;
        let mut failed = self.queue.drain_and_fail_all(&error);
        failed += pending.len();
        for p in pending {
            p.entry.fail(error.clone());
        }
        if let Some(transaction) = transaction {
            transaction.fail_all(&error);
        }

        self.resources.write().take();
        self.notify_if_idle();

        tracing::info!(
            "Connection {}: closed (was {:?}, failed {} outstanding)",
            self.id,
            previous,
            failed
        );
    }
}
