//! Messages, scatter lists and the per-endpoint buffer pool
//!
//! The send/read surface mirrors a syscall ABI: callers describe payloads
//! with raw iovec scatter lists, and the engine copies through them exactly
//! once per direction. Null descriptors are reported as `Fault`, distinct
//! from the `InvalidArgs` used for semantic mistakes.
//!
//! Kernel-side storage is a fixed arena: each channel endpoint owns
//! `num_bufs` slots of `buf_size` bytes, configured by the port at connect
//! time. A slot is occupied from the moment a send succeeds until the
//! receiver calls `put_msg`, which is what makes `NotEnoughBuffer`
//! honest backpressure - a successful send is always retrievable.

use alloc::collections::VecDeque;
use alloc::vec;
use alloc::vec::Vec;

use crate::error::{Error, Result};
use crate::handle::Handle;

/// One scatter segment of caller memory
#[derive(Debug, Clone, Copy)]
pub struct IoVec {
    pub base: *mut u8,
    pub len: usize,
}

/// Caller-side message descriptor for `send_msg`/`read_msg`
///
/// # Safety
/// The engine dereferences `iov` and every segment base for the duration of
/// the call; callers must keep the described memory valid and, for reads,
/// writable. Null pointers are rejected with [`Error::Fault`] before any
/// copy happens.
#[derive(Debug, Clone, Copy)]
pub struct IpcMsg {
    /// Scatter list, or null when `num_iov` is 0
    pub iov: *const IoVec,
    pub num_iov: usize,
    /// Handle transfer is not supported; any nonzero count is rejected
    pub handles: *mut Handle,
    pub num_handles: usize,
}

impl IpcMsg {
    /// Descriptor over a borrowed scatter list, no handles
    pub fn new(iov: &[IoVec]) -> Self {
        Self {
            iov: iov.as_ptr(),
            num_iov: iov.len(),
            handles: core::ptr::null_mut(),
            num_handles: 0,
        }
    }
}

/// Identity and length of a retrieved message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsgInfo {
    /// Pool-scoped id, valid until `put_msg`
    pub id: u32,
    /// Total payload length in bytes
    pub len: usize,
}

/// Validate the scatter list of a message descriptor
///
/// Fails `Fault` for a null iov array with a nonzero count; otherwise
/// returns the (possibly empty) segment slice.
pub fn iov_slice(msg: &IpcMsg) -> Result<&[IoVec]> {
    if msg.num_iov == 0 {
        return Ok(&[]);
    }
    if msg.iov.is_null() {
        return Err(Error::Fault);
    }
    // Caller guarantees the array outlives the call.
    Ok(unsafe { core::slice::from_raw_parts(msg.iov, msg.num_iov) })
}

/// Check each segment base and return the total byte count
pub fn iov_check(iov: &[IoVec]) -> Result<usize> {
    let mut total = 0usize;
    for seg in iov {
        if seg.base.is_null() && seg.len > 0 {
            return Err(Error::Fault);
        }
        total += seg.len;
    }
    Ok(total)
}

// ============================================================================
// Message pool
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Free,
    /// Sent, not yet reported by `get_msg`
    Queued,
    /// Reported by `get_msg`, readable until `put_msg`
    Retrieved,
}

struct MsgSlot {
    buf: Vec<u8>,
    len: usize,
    id: u32,
    state: SlotState,
}

/// Fixed arena of message buffers for one channel endpoint
pub struct MsgPool {
    slots: Vec<MsgSlot>,
    /// Queued slot indexes in arrival order
    order: VecDeque<usize>,
    buf_size: usize,
    next_id: u32,
}

impl MsgPool {
    pub fn new(num_bufs: usize, buf_size: usize) -> Self {
        let slots = (0..num_bufs)
            .map(|_| MsgSlot {
                buf: vec![0u8; buf_size],
                len: 0,
                id: 0,
                state: SlotState::Free,
            })
            .collect();
        Self {
            slots,
            order: VecDeque::new(),
            buf_size,
            next_id: 0,
        }
    }

    /// Any message queued and not yet retrieved?
    pub fn has_queued(&self) -> bool {
        !self.order.is_empty()
    }

    /// Gather a validated scatter list into a free slot
    ///
    /// Returns the total byte count on success. `TooBig` when the payload
    /// exceeds the configured buffer size, `NotEnoughBuffer` when every
    /// slot is occupied.
    pub fn write(&mut self, iov: &[IoVec]) -> Result<usize> {
        let total = iov_check(iov)?;
        if total > self.buf_size {
            return Err(Error::TooBig);
        }

        let idx = self
            .slots
            .iter()
            .position(|s| s.state == SlotState::Free)
            .ok_or(Error::NotEnoughBuffer)?;

        let slot = &mut self.slots[idx];
        let mut off = 0;
        for seg in iov {
            if seg.len == 0 {
                continue;
            }
            // Bases were null-checked above; caller guarantees validity.
            let src = unsafe { core::slice::from_raw_parts(seg.base as *const u8, seg.len) };
            slot.buf[off..off + seg.len].copy_from_slice(src);
            off += seg.len;
        }

        slot.len = total;
        slot.id = self.next_id;
        slot.state = SlotState::Queued;
        self.next_id = self.next_id.wrapping_add(1);
        self.order.push_back(idx);
        Ok(total)
    }

    /// Report the oldest queued message without freeing it
    pub fn get(&mut self) -> Result<MsgInfo> {
        let idx = self.order.pop_front().ok_or(Error::NoMsg)?;
        let slot = &mut self.slots[idx];
        slot.state = SlotState::Retrieved;
        Ok(MsgInfo {
            id: slot.id,
            len: slot.len,
        })
    }

    /// Copy out of a retrieved message starting at `offset`
    ///
    /// Non-consuming; rereads of the same id are legal until `put`.
    pub fn read(&self, id: u32, offset: usize, iov: &[IoVec]) -> Result<usize> {
        iov_check(iov)?;
        let slot = self
            .slots
            .iter()
            .find(|s| s.state == SlotState::Retrieved && s.id == id)
            .ok_or(Error::InvalidArgs)?;
        if offset >= slot.len {
            return Err(Error::InvalidArgs);
        }

        let mut pos = offset;
        let mut copied = 0;
        for seg in iov {
            if pos >= slot.len {
                break;
            }
            let n = seg.len.min(slot.len - pos);
            if n > 0 {
                // Bases were null-checked above; caller guarantees validity.
                let dst = unsafe { core::slice::from_raw_parts_mut(seg.base, n) };
                dst.copy_from_slice(&slot.buf[pos..pos + n]);
                pos += n;
                copied += n;
            }
        }
        Ok(copied)
    }

    /// Release a retrieved message, freeing its slot for new sends
    pub fn put(&mut self, id: u32) -> Result<()> {
        let slot = self
            .slots
            .iter_mut()
            .find(|s| s.state == SlotState::Retrieved && s.id == id)
            .ok_or(Error::InvalidArgs)?;
        slot.state = SlotState::Free;
        slot.len = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iov_of(buf: &mut [u8]) -> IoVec {
        IoVec {
            base: buf.as_mut_ptr(),
            len: buf.len(),
        }
    }

    #[test]
    fn test_roundtrip() {
        let mut pool = MsgPool::new(2, 64);
        let mut tx = [0u8; 48];
        for (i, b) in tx.iter_mut().enumerate() {
            *b = i as u8;
        }

        let sent = pool.write(&[iov_of(&mut tx)]).unwrap();
        assert_eq!(sent, 48);

        let info = pool.get().unwrap();
        assert_eq!(info.len, 48);

        let mut rx = [0u8; 64];
        let n = pool.read(info.id, 0, &[iov_of(&mut rx)]).unwrap();
        assert_eq!(n, 48);
        assert_eq!(&rx[..48], &tx[..]);

        pool.put(info.id).unwrap();
        assert_eq!(pool.get().err(), Some(Error::NoMsg));
    }

    #[test]
    fn test_gather_concatenates_segments() {
        let mut pool = MsgPool::new(1, 128);
        let mut a = [0x55u8; 32];
        let mut b = [0x44u8; 32];
        let sent = pool.write(&[iov_of(&mut a), iov_of(&mut b)]).unwrap();
        assert_eq!(sent, 64);

        let info = pool.get().unwrap();
        let mut rx = [0u8; 64];
        assert_eq!(pool.read(info.id, 0, &[iov_of(&mut rx)]).unwrap(), 64);
        assert!(rx[..32].iter().all(|&x| x == 0x55));
        assert!(rx[32..].iter().all(|&x| x == 0x44));
    }

    #[test]
    fn test_read_offset_bounds() {
        let mut pool = MsgPool::new(1, 64);
        let mut tx = [7u8; 16];
        pool.write(&[iov_of(&mut tx)]).unwrap();
        let info = pool.get().unwrap();

        let mut rx = [0u8; 16];
        // partial read from the middle
        assert_eq!(pool.read(info.id, 8, &[iov_of(&mut rx)]).unwrap(), 8);
        // offset == len is invalid, not an empty read
        assert_eq!(
            pool.read(info.id, info.len, &[iov_of(&mut rx)]).err(),
            Some(Error::InvalidArgs)
        );
    }

    #[test]
    fn test_backpressure_and_release() {
        let mut pool = MsgPool::new(2, 64);
        let mut tx = [1u8; 8];
        pool.write(&[iov_of(&mut tx)]).unwrap();
        pool.write(&[iov_of(&mut tx)]).unwrap();
        assert_eq!(
            pool.write(&[iov_of(&mut tx)]).err(),
            Some(Error::NotEnoughBuffer)
        );

        let info = pool.get().unwrap();
        // retrieval alone does not free the slot
        assert_eq!(
            pool.write(&[iov_of(&mut tx)]).err(),
            Some(Error::NotEnoughBuffer)
        );
        pool.put(info.id).unwrap();
        assert!(pool.write(&[iov_of(&mut tx)]).is_ok());
    }

    #[test]
    fn test_ids_never_reused() {
        let mut pool = MsgPool::new(1, 16);
        let mut tx = [0u8; 4];
        let mut seen = std::vec::Vec::new();
        for _ in 0..100 {
            pool.write(&[iov_of(&mut tx)]).unwrap();
            let info = pool.get().unwrap();
            assert!(!seen.contains(&info.id));
            seen.push(info.id);
            pool.put(info.id).unwrap();
        }
    }

    #[test]
    fn test_too_big() {
        let mut pool = MsgPool::new(2, 16);
        let mut tx = [0u8; 32];
        assert_eq!(pool.write(&[iov_of(&mut tx)]).err(), Some(Error::TooBig));
        // nothing was queued
        assert!(!pool.has_queued());
    }

    #[test]
    fn test_fault_checks() {
        let mut pool = MsgPool::new(1, 64);
        let bad = IoVec {
            base: core::ptr::null_mut(),
            len: 8,
        };
        assert_eq!(pool.write(&[bad]).err(), Some(Error::Fault));

        // null iov array with nonzero count
        let msg = IpcMsg {
            iov: core::ptr::null(),
            num_iov: 1,
            handles: core::ptr::null_mut(),
            num_handles: 0,
        };
        assert_eq!(iov_slice(&msg).err(), Some(Error::Fault));

        // zero-length null segment is harmless
        let empty = IoVec {
            base: core::ptr::null_mut(),
            len: 0,
        };
        assert_eq!(iov_check(&[empty]).unwrap(), 0);
    }

    #[test]
    fn test_stale_id_rejected() {
        let mut pool = MsgPool::new(1, 16);
        let mut tx = [0u8; 4];
        pool.write(&[iov_of(&mut tx)]).unwrap();
        let info = pool.get().unwrap();
        pool.put(info.id).unwrap();

        let mut rx = [0u8; 4];
        assert_eq!(
            pool.read(info.id, 0, &[iov_of(&mut rx)]).err(),
            Some(Error::InvalidArgs)
        );
        assert_eq!(pool.put(info.id).err(), Some(Error::InvalidArgs));
    }
}
