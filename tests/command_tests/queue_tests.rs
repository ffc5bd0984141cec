//! Tests for Command and CommandQueue
//!
//! These tests verify:
//! - FIFO order of queued commands
//! - Completion through the command's output transform
//! - Error replies mapped to server errors
//! - Drain-and-fail of every remaining entry
//! - Concurrent producers

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Instant;

use atlaskv_client::command::{output, QueuedCommand};
use atlaskv_client::protocol::{CommandArgs, CommandType, Reply};
use atlaskv_client::{ClientError, Command, CommandQueue};

// =============================================================================
// Helper Functions
// =============================================================================

/// Queue entry recording which reply it received
struct Recorder {
    id: usize,
    command_type: CommandType,
    log: Arc<Mutex<Vec<(usize, Result<Reply, String>)>>>,
    submitted_at: Instant,
}

impl Recorder {
    fn boxed(id: usize, log: &Arc<Mutex<Vec<(usize, Result<Reply, String>)>>>) -> Box<dyn QueuedCommand> {
        Box::new(Recorder {
            id,
            command_type: CommandType::Get,
            log: Arc::clone(log),
            submitted_at: Instant::now(),
        })
    }
}

impl QueuedCommand for Recorder {
    fn command_type(&self) -> &CommandType {
        &self.command_type
    }

    fn complete(self: Box<Self>, reply: Reply) {
        self.log.lock().unwrap().push((self.id, Ok(reply)));
    }

    fn fail(self: Box<Self>, error: ClientError) {
        self.log.lock().unwrap().push((self.id, Err(error.to_string())));
    }

    fn is_done(&self) -> bool {
        false
    }

    fn submitted_at(&self) -> Instant {
        self.submitted_at
    }
}

// =============================================================================
// Queue Tests
// =============================================================================

#[test]
fn test_queue_is_fifo() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let queue = CommandQueue::new();
    for id in 0..5 {
        queue.append(Recorder::boxed(id, &log));
    }
    assert_eq!(queue.len(), 5);

    for i in 0..5 {
        queue.poll_oldest().unwrap().complete(Reply::Integer(i));
    }
    assert!(queue.is_empty());
    assert!(queue.poll_oldest().is_none());

    let log = log.lock().unwrap();
    for (i, (id, reply)) in log.iter().enumerate() {
        assert_eq!(*id, i);
        assert_eq!(reply.as_ref().unwrap(), &Reply::Integer(i as i64));
    }
}

#[test]
fn test_drain_and_fail_all() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let queue = CommandQueue::new();
    for id in 0..3 {
        queue.append(Recorder::boxed(id, &log));
    }

    let failed = queue.drain_and_fail_all(&ClientError::ConnectionClosed);
    assert_eq!(failed, 3);
    assert!(queue.is_empty());

    let log = log.lock().unwrap();
    assert_eq!(log.len(), 3);
    assert!(log.iter().all(|(_, r)| r.is_err()));
    assert_eq!(log.iter().map(|(id, _)| *id).collect::<Vec<_>>(), vec![0, 1, 2]);
}

#[test]
fn test_drain_empty_queue() {
    let queue = CommandQueue::new();
    assert_eq!(queue.drain_and_fail_all(&ClientError::Cancelled), 0);
}

#[test]
fn test_concurrent_producers_keep_per_thread_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let queue = Arc::new(CommandQueue::new());

    let producers: Vec<_> = (0..4)
        .map(|t| {
            let queue = Arc::clone(&queue);
            let log = Arc::clone(&log);
            thread::spawn(move || {
                for i in 0..250 {
                    queue.append(Recorder::boxed(t * 1000 + i, &log));
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }
    assert_eq!(queue.len(), 1000);

    while let Some(entry) = queue.poll_oldest() {
        entry.complete(Reply::Nil);
    }

    let log = log.lock().unwrap();
    for t in 0..4 {
        let ids: Vec<usize> = log
            .iter()
            .map(|(id, _)| *id)
            .filter(|id| id / 1000 == t)
            .collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        assert_eq!(ids, sorted);
        assert_eq!(ids.len(), 250);
    }
}

// =============================================================================
// Command Tests
// =============================================================================

#[test]
fn test_command_accessors() {
    let command = Command::new(CommandArgs::new(CommandType::Get).arg("k"), output::optional_bulk);
    assert_eq!(command.command_type(), &CommandType::Get);
    assert_eq!(command.args().arguments().len(), 1);
}

#[test]
fn test_raw_command_keeps_args() {
    let command = Command::raw(CommandArgs::new(CommandType::parse("DBSIZE")));
    assert_eq!(command.command_type().as_str(), "DBSIZE");
}
