//! Blocking and wakeup machinery
//!
//! Every waitable object carries a [`WaitQueue`] of registered waiters.
//! A blocked caller parks on its waiter between condition checks; state
//! mutations wake the whole queue and the caller re-evaluates the condition
//! it is waiting for. Wakeups are flags, not events - the persistent state
//! on the object is what decides the outcome, so a wake that races with a
//! timeout is never lost.
//!
//! Time and yielding come from a [`Platform`] supplied by the embedder; the
//! engine itself never spins without yielding.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};
use spin::Mutex;

/// All-bits timeout sentinel: block until the condition fires
pub const INFINITE_TIME: u32 = u32::MAX;

/// Clock and cooperative-yield services the engine blocks against
pub trait Platform: Send + Sync {
    /// Monotonic milliseconds since an arbitrary epoch
    fn monotonic_ms(&self) -> u64;

    /// Give up the processor so another task can run
    fn yield_now(&self);
}

/// Absolute expiry computed once per blocking call
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Option<u64>,
}

impl Deadline {
    /// Deadline `timeout_ms` from now; `INFINITE_TIME` never expires
    pub fn after(platform: &dyn Platform, timeout_ms: u32) -> Self {
        let at = if timeout_ms == INFINITE_TIME {
            None
        } else {
            Some(platform.monotonic_ms() + timeout_ms as u64)
        };
        Self { at }
    }

    pub fn expired(&self, platform: &dyn Platform) -> bool {
        match self.at {
            Some(at) => platform.monotonic_ms() >= at,
            None => false,
        }
    }
}

/// One parked caller
pub struct Waiter {
    woken: AtomicBool,
}

impl Waiter {
    fn new() -> Self {
        Self {
            woken: AtomicBool::new(false),
        }
    }

    /// Mark the waiter runnable
    pub fn wake(&self) {
        self.woken.store(true, Ordering::Release);
    }

    /// Consume a pending wakeup
    pub fn take_wake(&self) -> bool {
        self.woken.swap(false, Ordering::Acquire)
    }

    /// Park until woken or the deadline passes; true means woken
    pub fn park(&self, platform: &dyn Platform, deadline: &Deadline) -> bool {
        loop {
            if self.take_wake() {
                return true;
            }
            if deadline.expired(platform) {
                return false;
            }
            platform.yield_now();
        }
    }
}

/// List of waiters attached to one waitable object
pub struct WaitQueue {
    waiters: Mutex<Vec<Arc<Waiter>>>,
}

impl WaitQueue {
    pub const fn new() -> Self {
        Self {
            waiters: Mutex::new(Vec::new()),
        }
    }

    /// Attach a new waiter; detaches again when the guard drops
    pub fn register(&self) -> WaitGuard<'_> {
        let waiter = Arc::new(Waiter::new());
        self.waiters.lock().push(waiter.clone());
        WaitGuard {
            queue: self,
            waiter,
        }
    }

    /// Wake every registered waiter
    pub fn wake_all(&self) {
        for waiter in self.waiters.lock().iter() {
            waiter.wake();
        }
    }

    fn unregister(&self, waiter: &Arc<Waiter>) {
        self.waiters.lock().retain(|w| !Arc::ptr_eq(w, waiter));
    }
}

/// Registration of one waiter on one queue
pub struct WaitGuard<'a> {
    queue: &'a WaitQueue,
    waiter: Arc<Waiter>,
}

impl WaitGuard<'_> {
    /// Park the calling task; true means a wakeup arrived
    pub fn park(&self, platform: &dyn Platform, deadline: &Deadline) -> bool {
        self.waiter.park(platform, deadline)
    }
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        self.queue.unregister(&self.waiter);
    }
}

// ============================================================================
// Host platform (std builds and tests)
// ============================================================================

#[cfg(any(test, feature = "std"))]
mod host {
    use super::Platform;
    use std::time::Instant;

    /// `Platform` backed by the host OS clock and thread yield
    pub struct HostPlatform {
        epoch: Instant,
    }

    impl HostPlatform {
        pub fn new() -> Self {
            Self {
                epoch: Instant::now(),
            }
        }
    }

    impl Platform for HostPlatform {
        fn monotonic_ms(&self) -> u64 {
            self.epoch.elapsed().as_millis() as u64
        }

        fn yield_now(&self) {
            std::thread::yield_now();
        }
    }
}

#[cfg(any(test, feature = "std"))]
pub use host::HostPlatform;
