//! Resources Module
//!
//! Shared, reference-counted execution resources borrowed by connections.
//!
//! ## Responsibilities
//! - Timer thread for command timeouts
//! - Event lanes for pub/sub listener dispatch
//! - Bounded shutdown when the last reference is released
//!
//! There is no process-wide instance: a `ClientResources` is created
//! explicitly and handed to every client or connection that should share it.
//! Each connection holds one clone until it is closed.

mod executor;
mod timer;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{self, Receiver};

use crate::completion::deadline_after;
use crate::error::Result;
use executor::EventExecutor;
use timer::Timer;

/// Default number of listener dispatch lanes
pub const DEFAULT_EVENT_LANES: usize = 2;

/// Default bound on shutdown when the last reference goes away
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Shared I/O execution resources
#[derive(Clone)]
pub struct ClientResources {
    inner: Arc<ResourcesInner>,
}

struct ResourcesInner {
    timer: Timer,
    executor: EventExecutor,

    /// One message per resource thread that exited
    done: Receiver<()>,

    threads: usize,
    shutdown_timeout: Duration,
    shut_down: AtomicBool,
    next_connection_id: AtomicU64,
}

impl ClientResources {
    /// Create resources with default settings
    pub fn create() -> Result<Self> {
        Self::builder().build()
    }

    pub fn builder() -> ClientResourcesBuilder {
        ClientResourcesBuilder::default()
    }

    /// Number of live handles (clients, connections, callers)
    pub fn reference_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    pub fn event_lanes(&self) -> usize {
        self.inner.executor.lane_count()
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::Acquire)
    }

    /// Stop all resource threads, waiting at most `timeout`
    ///
    /// Returns `true` if every thread exited in time. Threads that did not
    /// are left detached so process exit is never blocked.
    pub fn shutdown(&self, timeout: Duration) -> bool {
        self.inner.shutdown(timeout)
    }

    /// Allocate an id for a new connection; also selects its event lane
    pub(crate) fn next_connection_id(&self) -> u64 {
        self.inner.next_connection_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Run `task` after `delay` on the timer thread
    ///
    /// Once `live` returns false the task may be dropped without running.
    pub(crate) fn schedule<L, F>(&self, delay: Duration, live: L, task: F) -> bool
    where
        L: Fn() -> bool + Send + 'static,
        F: FnOnce() + Send + 'static,
    {
        if self.is_shut_down() {
            return false;
        }
        self.inner.timer.schedule(delay, Box::new(live), Box::new(task))
    }

    /// Run `job` on the event lane owning `key`
    pub(crate) fn dispatch<F>(&self, key: u64, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_shut_down() {
            return false;
        }
        self.inner.executor.execute(key, Box::new(job))
    }
}

impl ResourcesInner {
    fn shutdown(&self, timeout: Duration) -> bool {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return true;
        }

        self.timer.shutdown();
        self.executor.shutdown();

        let deadline = deadline_after(timeout);
        for exited in 0..self.threads {
            if self.done.recv_deadline(deadline).is_err() {
                tracing::warn!(
                    "Resource shutdown timed out after {:?}: {} of {} threads still running",
                    timeout,
                    self.threads - exited,
                    self.threads
                );
                return false;
            }
        }

        tracing::debug!("Client resources shut down ({} threads)", self.threads);
        true
    }
}

impl Drop for ResourcesInner {
    fn drop(&mut self) {
        self.shutdown(self.shutdown_timeout);
    }
}

/// Builder for ClientResources
pub struct ClientResourcesBuilder {
    event_lanes: usize,
    shutdown_timeout: Duration,
}

impl Default for ClientResourcesBuilder {
    fn default() -> Self {
        Self {
            event_lanes: DEFAULT_EVENT_LANES,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

impl ClientResourcesBuilder {
    /// Number of listener dispatch lanes (at least one)
    pub fn event_lanes(mut self, count: usize) -> Self {
        self.event_lanes = count.max(1);
        self
    }

    /// Bound on the shutdown performed by the last release
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<ClientResources> {
        let (done_tx, done_rx) = channel::unbounded();
        let timer = Timer::start(done_tx.clone())?;
        let executor = EventExecutor::start(self.event_lanes, &done_tx)?;

        tracing::debug!(
            "Client resources started ({} event lanes)",
            self.event_lanes
        );

        Ok(ClientResources {
            inner: Arc::new(ResourcesInner {
                timer,
                executor,
                done: done_rx,
                threads: self.event_lanes + 1,
                shutdown_timeout: self.shutdown_timeout,
                shut_down: AtomicBool::new(false),
                next_connection_id: AtomicU64::new(1),
            }),
        })
    }
}
