//! Events and readiness tracking
//!
//! An [`Event`] is a transient record produced by the wait subsystem when a
//! handle has something to report; it is never stored. Per-task FIFO
//! fairness for `wait_any` comes from [`ReadyQueue`], which remembers the
//! order in which handles became ready so no source is starved.

use alloc::collections::VecDeque;
use bitflags::bitflags;

use crate::handle::{Handle, MAX_USER_HANDLES};

bitflags! {
    /// Readiness conditions reported for a handle, combinable
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PollSet: u32 {
        /// Incoming connection pending on a port
        const READY = 0x1;
        /// Peer endpoint closed (permanent once set)
        const HUP = 0x4;
        /// Unretrieved message queued on a channel
        const MSG = 0x8;
    }
}

/// One readiness report from `wait`/`wait_any`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    /// Handle the condition fired on
    pub handle: Handle,
    /// Asserted readiness bits
    pub event: PollSet,
    /// Opaque cookie attached to the handle via `set_cookie`
    pub cookie: usize,
}

/// Arrival-ordered queue of ready handle slots
///
/// Membership is tracked with one bit per table slot so a handle is queued
/// at most once however many times its object signals. `wait_any` pops the
/// front, re-validates the object's poll bits, and re-appends the slot while
/// it stays ready - round-robin across concurrently ready handles.
pub struct ReadyQueue {
    order: VecDeque<usize>,
    member: u64,
}

// Membership bitmap relies on one bit per slot
const _: () = assert!(MAX_USER_HANDLES <= 64);

impl ReadyQueue {
    pub const fn new() -> Self {
        Self {
            order: VecDeque::new(),
            member: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Append a slot unless it is already queued
    pub fn push(&mut self, idx: usize) {
        debug_assert!(idx < MAX_USER_HANDLES);
        let bit = 1u64 << idx;
        if self.member & bit == 0 {
            self.member |= bit;
            self.order.push_back(idx);
        }
    }

    /// Take the oldest queued slot
    pub fn pop(&mut self) -> Option<usize> {
        let idx = self.order.pop_front()?;
        self.member &= !(1u64 << idx);
        Some(idx)
    }

    /// Drop a slot wherever it is queued (handle closed)
    pub fn remove(&mut self, idx: usize) {
        let bit = 1u64 << idx;
        if self.member & bit != 0 {
            self.member &= !bit;
            self.order.retain(|&i| i != idx);
        }
    }
}
