//! Channel endpoints
//!
//! A channel always exists as a connected pair. Each endpoint owns the pool
//! of messages *inbound to it*; sending therefore writes into the peer's
//! pool under the peer's lock, which is what lets buffer accounting promise
//! that a successful send is retrievable.
//!
//! Peer closure is persistent state (`hup`), not a wakeup: the surviving
//! end sees HUP on its next poll no matter when it looks, and may still
//! drain messages that were queued before the close.

use alloc::sync::{Arc, Weak};
use log::trace;
use spin::{Mutex, Once};

use crate::error::{Error, Result};
use crate::event::PollSet;
use crate::msg::{IoVec, MsgInfo, MsgPool};
use crate::port::PortConfig;
use crate::task::OwnerRef;
use crate::wait::WaitQueue;

struct ChanInner {
    pool: MsgPool,
    /// Peer end closed; permanent once set
    hup: bool,
    /// This end closed
    closed: bool,
}

/// One end of a connected channel pair
pub struct ChannelEnd {
    inner: Mutex<ChanInner>,
    peer: Once<Weak<ChannelEnd>>,
    waiters: WaitQueue,
    owner: Mutex<Option<OwnerRef>>,
}

impl ChannelEnd {
    /// Create a connected pair, each end pooled per the port's config
    pub fn pair(config: &PortConfig) -> (Arc<Self>, Arc<Self>) {
        let a = Arc::new(Self::new(config));
        let b = Arc::new(Self::new(config));
        a.peer.call_once(|| Arc::downgrade(&b));
        b.peer.call_once(|| Arc::downgrade(&a));
        (a, b)
    }

    fn new(config: &PortConfig) -> Self {
        Self {
            inner: Mutex::new(ChanInner {
                pool: MsgPool::new(config.num_bufs, config.buf_size),
                hup: false,
                closed: false,
            }),
            peer: Once::new(),
            waiters: WaitQueue::new(),
            owner: Mutex::new(None),
        }
    }

    fn peer(&self) -> Option<Arc<ChannelEnd>> {
        self.peer.get().and_then(|weak| weak.upgrade())
    }

    pub fn waiters(&self) -> &WaitQueue {
        &self.waiters
    }

    /// Record the owning task and handle for event delivery
    pub fn set_owner(&self, owner: OwnerRef) {
        *self.owner.lock() = Some(owner);
    }

    fn notify_owner(&self) {
        if let Some(owner) = self.owner.lock().as_ref() {
            owner.notify();
        }
    }

    /// Current readiness: MSG while inbound messages await, HUP after the
    /// peer closed
    pub fn poll(&self) -> PollSet {
        let inner = self.inner.lock();
        let mut bits = PollSet::empty();
        if inner.pool.has_queued() {
            bits |= PollSet::MSG;
        }
        if inner.hup {
            bits |= PollSet::HUP;
        }
        bits
    }

    /// Gather a validated scatter list into the peer's inbound pool
    pub fn send(&self, iov: &[IoVec]) -> Result<usize> {
        if self.inner.lock().hup {
            return Err(Error::ChannelClosed);
        }
        let peer = self.peer().ok_or(Error::ChannelClosed)?;

        let sent = {
            let mut peer_inner = peer.inner.lock();
            if peer_inner.closed {
                return Err(Error::ChannelClosed);
            }
            peer_inner.pool.write(iov)?
        };

        peer.waiters.wake_all();
        peer.notify_owner();
        Ok(sent)
    }

    /// Report the oldest inbound message; `NoMsg` when the queue is empty
    pub fn get(&self) -> Result<MsgInfo> {
        self.inner.lock().pool.get()
    }

    /// Copy out of a retrieved message; non-consuming
    pub fn read(&self, id: u32, offset: usize, iov: &[IoVec]) -> Result<usize> {
        self.inner.lock().pool.read(id, offset, iov)
    }

    /// Release a retrieved message back to the pool
    pub fn put(&self, id: u32) -> Result<()> {
        self.inner.lock().pool.put(id)
    }

    /// Close this end and mark the peer hung up
    ///
    /// Idempotent; teardown paths may race.
    pub fn close(&self) {
        {
            let mut inner = self.inner.lock();
            if inner.closed {
                return;
            }
            inner.closed = true;
        }
        if let Some(peer) = self.peer() {
            trace!("channel close: peer marked hup");
            peer.inner.lock().hup = true;
            peer.waiters.wake_all();
            peer.notify_owner();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::PortFlags;

    fn cfg(num_bufs: usize, buf_size: usize) -> PortConfig {
        PortConfig {
            num_bufs,
            buf_size,
            flags: PortFlags::empty(),
        }
    }

    fn iov_of(buf: &mut [u8]) -> IoVec {
        IoVec {
            base: buf.as_mut_ptr(),
            len: buf.len(),
        }
    }

    #[test]
    fn test_send_lands_on_peer() {
        let (a, b) = ChannelEnd::pair(&cfg(2, 64));
        let mut tx = [0xabu8; 32];
        assert_eq!(a.send(&[iov_of(&mut tx)]).unwrap(), 32);

        assert_eq!(a.poll(), PollSet::empty());
        assert_eq!(b.poll(), PollSet::MSG);

        let info = b.get().unwrap();
        assert_eq!(info.len, 32);
        let mut rx = [0u8; 32];
        assert_eq!(b.read(info.id, 0, &[iov_of(&mut rx)]).unwrap(), 32);
        assert_eq!(rx, tx);
        b.put(info.id).unwrap();
        assert_eq!(b.poll(), PollSet::empty());
    }

    #[test]
    fn test_backpressure_is_peer_scoped() {
        let (a, b) = ChannelEnd::pair(&cfg(1, 64));
        let mut tx = [0u8; 8];
        a.send(&[iov_of(&mut tx)]).unwrap();
        // b's single inbound buffer is taken
        assert_eq!(
            a.send(&[iov_of(&mut tx)]).err(),
            Some(Error::NotEnoughBuffer)
        );
        // the reverse direction has its own pool
        assert_eq!(b.send(&[iov_of(&mut tx)]).unwrap(), 8);
    }

    #[test]
    fn test_hup_is_permanent_and_drainable() {
        let (a, b) = ChannelEnd::pair(&cfg(2, 64));
        let mut tx = [9u8; 16];
        a.send(&[iov_of(&mut tx)]).unwrap();
        a.close();

        assert_eq!(b.poll(), PollSet::MSG | PollSet::HUP);

        // queued message survives the close
        let info = b.get().unwrap();
        assert_eq!(info.len, 16);
        b.put(info.id).unwrap();

        // HUP stays after draining
        assert_eq!(b.poll(), PollSet::HUP);

        // sending into a closed peer fails
        assert_eq!(b.send(&[iov_of(&mut tx)]).err(), Some(Error::ChannelClosed));
    }

    #[test]
    fn test_close_idempotent() {
        let (a, b) = ChannelEnd::pair(&cfg(1, 16));
        a.close();
        a.close();
        assert_eq!(b.poll(), PollSet::HUP);
    }
}
