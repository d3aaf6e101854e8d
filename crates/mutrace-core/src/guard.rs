//! Per-thread reentrancy guard.
//!
//! Bookkeeping allocates, reads the clock and unwinds the stack; any of those
//! may call back into an intercepted lock function on the same thread. While a
//! guard is alive, nested intercepted calls skip bookkeeping and go straight to
//! the real primitive.

use std::cell::Cell;
use std::marker::PhantomData;

thread_local! {
    static INSIDE_PROFILER: Cell<bool> = const { Cell::new(false) };
}

/// RAII token proving the current thread is inside profiler bookkeeping.
pub struct ReentrancyGuard {
    // Tied to the thread that set the flag.
    _not_send: PhantomData<*const ()>,
}

impl ReentrancyGuard {
    /// Enter bookkeeping, or `None` if this thread is already inside it.
    pub fn enter() -> Option<Self> {
        INSIDE_PROFILER
            .try_with(|inside| {
                if inside.replace(true) {
                    None
                } else {
                    Some(Self {
                        _not_send: PhantomData,
                    })
                }
            })
            .ok()
            .flatten()
    }

    pub fn is_active() -> bool {
        INSIDE_PROFILER.try_with(Cell::get).unwrap_or(true)
    }
}

impl Drop for ReentrancyGuard {
    fn drop(&mut self) {
        let _ = INSIDE_PROFILER.try_with(|inside| inside.set(false));
    }
}
