//! Completion Module
//!
//! Single-assignment asynchronous results shared between the caller that
//! submitted a command and the connection reader that completes it.
//!
//! ## Responsibilities
//! - Settle exactly once (value, error or cancellation)
//! - Blocking `get` with a timeout for synchronous callers
//! - Listeners for non-blocking callers, run inline when already settled
//! - `await_all` over heterogeneous handles with one shared deadline

mod handle;

use std::time::{Duration, Instant};

pub use handle::CompletionHandle;

/// Far-future horizon for timeouts too large to add to `Instant::now()`
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Deadline `timeout` from now, clamped so `Duration::MAX` means no limit
pub(crate) fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .unwrap_or_else(|| now + FAR_FUTURE)
}

/// Anything that can be waited on without knowing its value type
pub trait Awaitable {
    /// Settled with a value, an error or a cancellation
    fn is_done(&self) -> bool;

    /// Block until settled or `deadline`; returns whether it settled
    fn await_until(&self, deadline: Instant) -> bool;
}

/// Wait for every handle to settle within one shared timeout window
///
/// Returns `true` only if all of them settled (value or error) in time.
/// Nothing is registered on the handles, so returning early leaves no state
/// behind and calling it again on settled handles returns `true` at once.
pub fn await_all(timeout: Duration, handles: &[&dyn Awaitable]) -> bool {
    let deadline = deadline_after(timeout);
    for handle in handles {
        if handle.is_done() {
            continue;
        }
        if !handle.await_until(deadline) {
            return false;
        }
    }
    true
}
