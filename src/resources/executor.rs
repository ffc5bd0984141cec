//! Event executor
//!
//! A fixed set of single-threaded lanes. Work keyed by the same value always
//! lands on the same lane, so per-connection delivery order is preserved
//! while no connection's reader ever runs listener code itself.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread;

use crossbeam::channel::{self, Receiver, Sender};

type Job = Box<dyn FnOnce() + Send>;

enum LaneMessage {
    Run(Job),
    Shutdown,
}

pub(crate) struct EventExecutor {
    lanes: Vec<Sender<LaneMessage>>,
}

impl EventExecutor {
    /// Spawn `count` lanes; each signals `done` when it exits
    pub(crate) fn start(count: usize, done: &Sender<()>) -> std::io::Result<Self> {
        let mut lanes = Vec::with_capacity(count);
        for index in 0..count {
            let (sender, receiver) = channel::unbounded();
            let done = done.clone();
            thread::Builder::new()
                .name(format!("atlaskv-event-{}", index))
                .spawn(move || {
                    run_lane(index, receiver);
                    let _ = done.send(());
                })?;
            lanes.push(sender);
        }
        Ok(Self { lanes })
    }

    pub(crate) fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    /// Queue `job` on the lane owning `key`
    pub(crate) fn execute(&self, key: u64, job: Job) -> bool {
        if self.lanes.is_empty() {
            return false;
        }
        let lane = (key % self.lanes.len() as u64) as usize;
        self.lanes[lane].send(LaneMessage::Run(job)).is_ok()
    }

    pub(crate) fn shutdown(&self) {
        for lane in &self.lanes {
            let _ = lane.send(LaneMessage::Shutdown);
        }
    }
}

fn run_lane(index: usize, receiver: Receiver<LaneMessage>) {
    for message in receiver.iter() {
        match message {
            LaneMessage::Run(job) => {
                if catch_unwind(AssertUnwindSafe(job)).is_err() {
                    tracing::error!("Event lane {}: listener panicked", index);
                }
            }
            LaneMessage::Shutdown => break,
        }
    }
}
