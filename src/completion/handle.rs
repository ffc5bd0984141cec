//! Completion handle implementation
//!
//! Mutex + Condvar single-assignment slot with an inline listener list.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::Awaitable;
use crate::error::{ClientError, Result};

type Listener<T> = Box<dyn FnOnce(&Result<T>) + Send>;

struct State<T> {
    /// Settled outcome, shared so listeners can run outside the lock
    outcome: Option<Arc<Result<T>>>,
    listeners: Vec<Listener<T>>,
    cancelled: bool,
}

struct Inner<T> {
    state: Mutex<State<T>>,
    settled: Condvar,
}

/// A single-assignment asynchronous result
///
/// Settled exactly once, by `complete`, `complete_exceptionally` or `cancel`;
/// every later attempt is a no-op that returns `false`. Clones share the slot.
pub struct CompletionHandle<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for CompletionHandle<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for CompletionHandle<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for CompletionHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("CompletionHandle")
            .field("done", &state.outcome.is_some())
            .field("cancelled", &state.cancelled)
            .field("listeners", &state.listeners.len())
            .finish()
    }
}

impl<T> CompletionHandle<T> {
    /// Create an unsettled handle
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    outcome: None,
                    listeners: Vec::new(),
                    cancelled: false,
                }),
                settled: Condvar::new(),
            }),
        }
    }

    /// Settle with a value
    pub fn complete(&self, value: T) -> bool {
        self.settle(Ok(value), false)
    }

    /// Settle with an error
    pub fn complete_exceptionally(&self, error: ClientError) -> bool {
        self.settle(Err(error), false)
    }

    /// Settle as cancelled
    ///
    /// Listeners observe `ClientError::Cancelled`; a reply that arrives later
    /// is still consumed by the connection but never delivered.
    pub fn cancel(&self) -> bool {
        self.settle(Err(ClientError::Cancelled), true)
    }

    pub fn is_done(&self) -> bool {
        self.inner.state.lock().outcome.is_some()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.state.lock().cancelled
    }

    /// Register a callback for the outcome
    ///
    /// Runs inline on the calling thread if already settled, otherwise on
    /// whichever thread settles the handle.
    pub fn add_listener<F>(&self, listener: F)
    where
        F: FnOnce(&Result<T>) + Send + 'static,
    {
        let settled = {
            let mut state = self.inner.state.lock();
            match &state.outcome {
                Some(outcome) => Arc::clone(outcome),
                None => {
                    state.listeners.push(Box::new(listener));
                    return;
                }
            }
        };
        listener(&settled);
    }

    /// Block until settled or the timeout elapses
    ///
    /// A timeout here leaves the handle untouched.
    pub fn get(&self, timeout: Duration) -> Result<T>
    where
        T: Clone,
    {
        let deadline = super::deadline_after(timeout);
        let mut state = self.inner.state.lock();
        loop {
            if let Some(outcome) = &state.outcome {
                return (**outcome).clone();
            }
            if self.inner.settled.wait_until(&mut state, deadline).timed_out() {
                return match &state.outcome {
                    Some(outcome) => (**outcome).clone(),
                    None => Err(ClientError::Timeout(timeout)),
                };
            }
        }
    }

    /// Block until settled
    pub fn wait(&self) -> Result<T>
    where
        T: Clone,
    {
        let mut state = self.inner.state.lock();
        loop {
            if let Some(outcome) = &state.outcome {
                return (**outcome).clone();
            }
            self.inner.settled.wait(&mut state);
        }
    }

    /// Outcome if already settled
    pub fn try_get(&self) -> Option<Result<T>>
    where
        T: Clone,
    {
        self.inner
            .state
            .lock()
            .outcome
            .as_ref()
            .map(|outcome| (**outcome).clone())
    }

    pub(crate) fn downgrade(&self) -> WeakHandle<T> {
        WeakHandle {
            inner: Arc::downgrade(&self.inner),
        }
    }

    fn settle(&self, outcome: Result<T>, cancelled: bool) -> bool {
        let (outcome, listeners) = {
            let mut state = self.inner.state.lock();
            if state.outcome.is_some() {
                return false;
            }
            let outcome = Arc::new(outcome);
            state.outcome = Some(Arc::clone(&outcome));
            state.cancelled = cancelled;
            (outcome, std::mem::take(&mut state.listeners))
        };
        self.inner.settled.notify_all();

        for listener in listeners {
            listener(&outcome);
        }
        true
    }
}

impl<T> Awaitable for CompletionHandle<T> {
    fn is_done(&self) -> bool {
        CompletionHandle::is_done(self)
    }

    fn await_until(&self, deadline: Instant) -> bool {
        let mut state = self.inner.state.lock();
        while state.outcome.is_none() {
            if self.inner.settled.wait_until(&mut state, deadline).timed_out() {
                return state.outcome.is_some();
            }
        }
        true
    }
}

/// Non-owning reference used by timers, so a pending timeout does not keep
/// a finished command's handle alive.
pub(crate) struct WeakHandle<T> {
    inner: Weak<Inner<T>>,
}

impl<T> WeakHandle<T> {
    pub(crate) fn upgrade(&self) -> Option<CompletionHandle<T>> {
        self.inner.upgrade().map(|inner| CompletionHandle { inner })
    }
}
