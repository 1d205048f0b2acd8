//! Handle table - per-task handle to kernel-object translation
//!
//! Each task owns a fixed-capacity table mapping small integer handles to
//! live IPC objects (ports or channel endpoints). Allocation always picks
//! the lowest free slot, and a value is reused only after a full release.
//! Lookup distinguishes malformed handle values (`BadHandle`) from in-range
//! slots that hold nothing (`NotFound`).

use alloc::sync::Arc;

use crate::channel::ChannelEnd;
use crate::error::{Error, Result};
use crate::event::PollSet;
use crate::port::Port;
use crate::wait::WaitQueue;

/// Max number of handles a task may hold at once
pub const MAX_USER_HANDLES: usize = 64;

/// Sentinel for "no handle"
pub const INVALID_IPC_HANDLE: Handle = Handle(-1);

/// User-visible handle value
///
/// Kept as a raw `i32` so malformed values (negative or out of range) remain
/// representable; the table is the only place that validates them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handle(pub i32);

impl Handle {
    /// Underlying raw value
    pub const fn raw(self) -> i32 {
        self.0
    }
}

/// Reference to an object installable in a handle table
#[derive(Clone)]
pub enum KObject {
    /// Named server endpoint
    Port(Arc<Port>),
    /// One end of a connected channel pair
    Channel(Arc<ChannelEnd>),
}

impl KObject {
    /// Current readiness bits of the underlying object
    pub fn poll(&self) -> PollSet {
        match self {
            KObject::Port(p) => p.poll(),
            KObject::Channel(c) => c.poll(),
        }
    }

    /// Waiter list woken when the object's readiness changes
    pub fn waiters(&self) -> &WaitQueue {
        match self {
            KObject::Port(p) => p.waiters(),
            KObject::Channel(c) => c.waiters(),
        }
    }
}

struct Slot {
    object: KObject,
    cookie: usize,
}

/// Fixed-capacity handle table
pub struct HandleTable {
    slots: [Option<Slot>; MAX_USER_HANDLES],
    count: usize,
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            slots: core::array::from_fn(|_| None),
            count: 0,
        }
    }

    /// Number of live handles
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    fn index(handle: Handle) -> Result<usize> {
        if handle.0 < 0 || handle.0 >= MAX_USER_HANDLES as i32 {
            return Err(Error::BadHandle);
        }
        Ok(handle.0 as usize)
    }

    /// Install an object in the lowest free slot
    pub fn allocate(&mut self, object: KObject) -> Result<Handle> {
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(Slot { object, cookie: 0 });
                self.count += 1;
                return Ok(Handle(i as i32));
            }
        }
        Err(Error::NoResources)
    }

    /// Resolve a handle to its object
    pub fn get(&self, handle: Handle) -> Result<KObject> {
        let idx = Self::index(handle)?;
        self.slots[idx]
            .as_ref()
            .map(|s| s.object.clone())
            .ok_or(Error::NotFound)
    }

    /// Object installed at a raw slot index, if any
    pub fn get_at(&self, idx: usize) -> Option<KObject> {
        self.slots
            .get(idx)
            .and_then(|s| s.as_ref())
            .map(|s| s.object.clone())
    }

    /// Cookie attached to a handle (0 until set)
    pub fn cookie(&self, handle: Handle) -> Result<usize> {
        let idx = Self::index(handle)?;
        self.slots[idx]
            .as_ref()
            .map(|s| s.cookie)
            .ok_or(Error::NotFound)
    }

    /// Attach an opaque cookie, delivered back in wait events
    pub fn set_cookie(&mut self, handle: Handle, cookie: usize) -> Result<()> {
        let idx = Self::index(handle)?;
        match self.slots[idx].as_mut() {
            Some(slot) => {
                slot.cookie = cookie;
                Ok(())
            }
            None => Err(Error::NotFound),
        }
    }

    /// Free a slot, returning the evicted object for teardown
    pub fn release(&mut self, handle: Handle) -> Result<KObject> {
        let idx = Self::index(handle)?;
        match self.slots[idx].take() {
            Some(slot) => {
                self.count -= 1;
                Ok(slot.object)
            }
            None => Err(Error::NotFound),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::{Port, PortConfig, PortFlags};

    fn test_object() -> KObject {
        let cfg = PortConfig {
            num_bufs: 1,
            buf_size: 16,
            flags: PortFlags::empty(),
        };
        KObject::Port(Arc::new(Port::new("test.port", cfg)))
    }

    #[test]
    fn test_lowest_slot_first() {
        let mut table = HandleTable::new();
        assert_eq!(table.allocate(test_object()).unwrap(), Handle(0));
        assert_eq!(table.allocate(test_object()).unwrap(), Handle(1));
        assert_eq!(table.allocate(test_object()).unwrap(), Handle(2));

        table.release(Handle(1)).unwrap();
        // freed slot is reused before higher ones
        assert_eq!(table.allocate(test_object()).unwrap(), Handle(1));
        assert_eq!(table.allocate(test_object()).unwrap(), Handle(3));
    }

    #[test]
    fn test_bad_handle_vs_not_found() {
        let table = HandleTable::new();

        assert_eq!(table.get(INVALID_IPC_HANDLE).err(), Some(Error::BadHandle));
        assert_eq!(
            table.get(Handle(MAX_USER_HANDLES as i32)).err(),
            Some(Error::BadHandle)
        );
        for i in 0..MAX_USER_HANDLES {
            assert_eq!(table.get(Handle(i as i32)).err(), Some(Error::NotFound));
        }
    }

    #[test]
    fn test_exhaustion() {
        let mut table = HandleTable::new();
        for _ in 0..MAX_USER_HANDLES {
            table.allocate(test_object()).unwrap();
        }
        assert_eq!(table.len(), MAX_USER_HANDLES);
        assert_eq!(
            table.allocate(test_object()).err(),
            Some(Error::NoResources)
        );
    }

    #[test]
    fn test_double_release() {
        let mut table = HandleTable::new();
        let h = table.allocate(test_object()).unwrap();
        assert!(table.release(h).is_ok());
        assert_eq!(table.release(h).err(), Some(Error::NotFound));
    }

    #[test]
    fn test_cookie_lifecycle() {
        let mut table = HandleTable::new();
        let h = table.allocate(test_object()).unwrap();

        assert_eq!(table.cookie(h).unwrap(), 0);
        table.set_cookie(h, 0x1beef).unwrap();
        assert_eq!(table.cookie(h).unwrap(), 0x1beef);

        table.release(h).unwrap();
        assert_eq!(table.set_cookie(h, 0x2beef).err(), Some(Error::NotFound));

        // reallocation of the same value starts with a clean cookie
        let h2 = table.allocate(test_object()).unwrap();
        assert_eq!(h2, h);
        assert_eq!(table.cookie(h2).unwrap(), 0);
    }
}
