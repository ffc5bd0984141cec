//! Timer thread
//!
//! Runs delayed tasks (command timeouts) in deadline order on one thread.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};

type Task = Box<dyn FnOnce() + Send>;

/// Whether a scheduled task still has work to do
type Live = Box<dyn Fn() -> bool + Send>;

/// Pending tasks before the first sweep of dead entries
const PRUNE_THRESHOLD: usize = 1024;

enum TimerMessage {
    Schedule {
        deadline: Instant,
        live: Live,
        task: Task,
    },
    Shutdown,
}

struct Scheduled {
    deadline: Instant,
    seq: u64,
    live: Live,
    task: Task,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    // Reversed: BinaryHeap is a max-heap and the earliest deadline must win
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

pub(crate) struct Timer {
    sender: Sender<TimerMessage>,
}

impl Timer {
    /// Spawn the timer thread; it signals `done` when it exits
    pub(crate) fn start(done: Sender<()>) -> std::io::Result<Self> {
        let (sender, receiver) = channel::unbounded();
        thread::Builder::new()
            .name("atlaskv-timer".to_string())
            .spawn(move || {
                run(receiver);
                let _ = done.send(());
            })?;
        Ok(Self { sender })
    }

    /// Run `task` once `delay` has elapsed
    ///
    /// `live` reports whether the task still matters; dead entries are swept
    /// from the heap before their deadline. A delay too large to represent
    /// never fires, so nothing is scheduled.
    pub(crate) fn schedule(&self, delay: Duration, live: Live, task: Task) -> bool {
        let deadline = match Instant::now().checked_add(delay) {
            Some(deadline) => deadline,
            None => return false,
        };
        self.sender
            .send(TimerMessage::Schedule {
                deadline,
                live,
                task,
            })
            .is_ok()
    }

    pub(crate) fn shutdown(&self) {
        let _ = self.sender.send(TimerMessage::Shutdown);
    }
}

/// Deadline heap with amortized sweeping of dead entries
struct Schedule {
    heap: BinaryHeap<Scheduled>,
    seq: u64,
    prune_at: usize,
}

impl Schedule {
    fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            seq: 0,
            prune_at: PRUNE_THRESHOLD,
        }
    }

    fn push(&mut self, deadline: Instant, live: Live, task: Task) {
        self.heap.push(Scheduled {
            deadline,
            seq: self.seq,
            live,
            task,
        });
        self.seq += 1;

        if self.heap.len() >= self.prune_at {
            let before = self.heap.len();
            self.heap.retain(|scheduled| (scheduled.live)());
            self.prune_at = (self.heap.len() * 2).max(PRUNE_THRESHOLD);
            tracing::trace!("Timer swept {} finished tasks", before - self.heap.len());
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|next| next.deadline)
    }

    fn pop_due(&mut self, now: Instant) -> Option<Task> {
        if self.heap.peek()?.deadline <= now {
            self.heap.pop().map(|due| due.task)
        } else {
            None
        }
    }

    fn len(&self) -> usize {
        self.heap.len()
    }
}

fn run(receiver: Receiver<TimerMessage>) {
    let mut schedule = Schedule::new();

    loop {
        let now = Instant::now();
        while let Some(task) = schedule.pop_due(now) {
            if catch_unwind(AssertUnwindSafe(task)).is_err() {
                tracing::error!("Timer task panicked");
            }
        }

        let message = match schedule.next_deadline() {
            Some(deadline) => match receiver.recv_deadline(deadline) {
                Ok(message) => message,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            },
            None => match receiver.recv() {
                Ok(message) => message,
                Err(_) => break,
            },
        };

        match message {
            TimerMessage::Schedule {
                deadline,
                live,
                task,
            } => schedule.push(deadline, live, task),
            TimerMessage::Shutdown => break,
        }
    }

    if schedule.len() > 0 {
        tracing::debug!("Timer stopped with {} pending tasks", schedule.len());
    }
}
