//! Named ports and the process-wide port registry
//!
//! A port is the server side of the connect/accept handshake: a path-named
//! rendezvous carrying a queue of pending connections. The registry is a
//! flat path-to-port namespace; uniqueness is enforced here, capacity is
//! bounded so exhaustion is reportable.

use alloc::collections::{BTreeMap, VecDeque};
use alloc::sync::Arc;
use bitflags::bitflags;
use spin::Mutex;

use crate::channel::ChannelEnd;
use crate::error::{Error, Result};
use crate::event::PollSet;
use crate::task::OwnerRef;
use crate::wait::WaitQueue;

/// Max length of a port path in bytes
pub const MAX_PORT_PATH_LEN: usize = 64;

/// Max number of per-port buffers
pub const MAX_PORT_BUF_NUM: usize = 32;

/// Max size of a per-port buffer in bytes
pub const MAX_PORT_BUF_SIZE: usize = 512;

/// Capacity of the port namespace
pub const MAX_PORTS: usize = 64;

/// Bounded port path storage
pub type PortPath = heapless::String<MAX_PORT_PATH_LEN>;

bitflags! {
    /// Creation flags, stored with the port
    ///
    /// Connection filtering by client identity is outside this engine;
    /// the bits are carried for callers that key off them.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PortFlags: u32 {
        const ALLOW_TA_CONNECT = 0x1;
        const ALLOW_NS_CONNECT = 0x2;
    }
}

/// Per-port channel buffer configuration
#[derive(Debug, Clone, Copy)]
pub struct PortConfig {
    pub num_bufs: usize,
    pub buf_size: usize,
    pub flags: PortFlags,
}

// ============================================================================
// Pending connections
// ============================================================================

/// Where a queued connection request stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingState {
    /// Connector is blocked (or was, until its timeout)
    Waiting,
    /// Port owner took the connection
    Accepted,
    /// Connector gave up; accept must report the corpse
    Abandoned,
    /// Port was closed underneath the connector
    PortClosed,
}

/// One connection request parked on a port
///
/// Both channel ends exist from the moment of the request; the client end
/// is installed in the connector's table only once the request is accepted.
pub struct Pending {
    client: Arc<ChannelEnd>,
    server: Arc<ChannelEnd>,
    state: Mutex<PendingState>,
    waiters: WaitQueue,
}

impl Pending {
    pub fn new(client: Arc<ChannelEnd>, server: Arc<ChannelEnd>) -> Arc<Self> {
        Arc::new(Self {
            client,
            server,
            state: Mutex::new(PendingState::Waiting),
            waiters: WaitQueue::new(),
        })
    }

    pub fn client(&self) -> &Arc<ChannelEnd> {
        &self.client
    }

    pub fn server(&self) -> &Arc<ChannelEnd> {
        &self.server
    }

    pub fn state(&self) -> PendingState {
        *self.state.lock()
    }

    /// Connector-side waiter list, woken on accept and port close
    pub fn waiters(&self) -> &WaitQueue {
        &self.waiters
    }

    /// Connector timed out: Waiting -> Abandoned
    ///
    /// False means an accept (or port close) won the race and the
    /// connector should take that outcome instead.
    pub fn abandon(&self) -> bool {
        let mut state = self.state.lock();
        if *state == PendingState::Waiting {
            *state = PendingState::Abandoned;
            true
        } else {
            false
        }
    }

    /// Acceptor side: Waiting -> Accepted
    pub fn accept(&self) -> bool {
        let mut state = self.state.lock();
        if *state == PendingState::Waiting {
            *state = PendingState::Accepted;
            drop(state);
            self.waiters.wake_all();
            true
        } else {
            false
        }
    }

    fn port_closed(&self) {
        let mut state = self.state.lock();
        if *state == PendingState::Waiting {
            *state = PendingState::PortClosed;
        }
        drop(state);
        self.waiters.wake_all();
    }
}

// ============================================================================
// Port
// ============================================================================

struct PortInner {
    pending: VecDeque<Arc<Pending>>,
    closed: bool,
}

/// Named endpoint accepting connections
pub struct Port {
    path: PortPath,
    config: PortConfig,
    inner: Mutex<PortInner>,
    waiters: WaitQueue,
    owner: Mutex<Option<OwnerRef>>,
}

impl Port {
    /// Create an unregistered port; `path` must fit `MAX_PORT_PATH_LEN`
    pub(crate) fn new(path: &str, config: PortConfig) -> Self {
        debug_assert!(path.len() <= MAX_PORT_PATH_LEN);
        let mut stored = PortPath::new();
        let _ = stored.push_str(path);
        Self {
            path: stored,
            config,
            inner: Mutex::new(PortInner {
                pending: VecDeque::new(),
                closed: false,
            }),
            waiters: WaitQueue::new(),
            owner: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn config(&self) -> PortConfig {
        self.config
    }

    pub fn waiters(&self) -> &WaitQueue {
        &self.waiters
    }

    /// Record the owning task and handle for event delivery
    pub fn set_owner(&self, owner: OwnerRef) {
        *self.owner.lock() = Some(owner);
    }

    /// READY while any connection is pending, accepted or abandoned alike
    pub fn poll(&self) -> PollSet {
        if self.inner.lock().pending.is_empty() {
            PollSet::empty()
        } else {
            PollSet::READY
        }
    }

    /// Queue a connection request and signal the owner
    ///
    /// `ChannelClosed` when the port was torn down after registry lookup.
    pub fn enqueue(&self, pending: Arc<Pending>) -> Result<()> {
        {
            let mut inner = self.inner.lock();
            if inner.closed {
                return Err(Error::ChannelClosed);
            }
            inner.pending.push_back(pending);
        }
        self.waiters.wake_all();
        if let Some(owner) = self.owner.lock().as_ref() {
            owner.notify();
        }
        Ok(())
    }

    /// Run `f` under the pending-queue lock
    ///
    /// Accept works on the queue head in place so a failed handle
    /// allocation leaves the request queued for retry.
    pub fn with_pending<R>(&self, f: impl FnOnce(&mut VecDeque<Arc<Pending>>) -> R) -> R {
        let mut inner = self.inner.lock();
        f(&mut inner.pending)
    }

    /// Tear the port down: every queued connection sees the closure
    pub fn close(&self) {
        let drained: VecDeque<Arc<Pending>> = {
            let mut inner = self.inner.lock();
            inner.closed = true;
            core::mem::take(&mut inner.pending)
        };
        for pending in drained {
            pending.port_closed();
            // an abandoned connector is already gone; for the rest this
            // marks both ends dead so nothing dangles
            pending.client().close();
            pending.server().close();
        }
        self.waiters.wake_all();
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Process-wide path-to-port namespace
pub struct PortRegistry {
    ports: BTreeMap<PortPath, Arc<Port>>,
}

impl PortRegistry {
    pub const fn new() -> Self {
        Self {
            ports: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    /// Register a port under its path
    pub fn insert(&mut self, port: Arc<Port>) -> Result<()> {
        let path = port.path();
        let key = PortPath::try_from(path).map_err(|_| Error::InvalidArgs)?;
        if self.ports.contains_key(&key) {
            return Err(Error::AlreadyExists);
        }
        if self.ports.len() >= MAX_PORTS {
            return Err(Error::NoResources);
        }
        self.ports.insert(key, port);
        Ok(())
    }

    /// Resolve a path to a live port
    pub fn lookup(&self, path: &str) -> Option<Arc<Port>> {
        let key = PortPath::try_from(path).ok()?;
        self.ports.get(&key).cloned()
    }

    /// Drop a path from the namespace
    pub fn remove(&mut self, path: &str) {
        if let Ok(key) = PortPath::try_from(path) {
            self.ports.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> PortConfig {
        PortConfig {
            num_bufs: 2,
            buf_size: 64,
            flags: PortFlags::empty(),
        }
    }

    #[test]
    #[should_panic]
    fn test_overlong_path_rejected_at_construction() {
        let path: std::string::String = core::iter::repeat('x')
            .take(MAX_PORT_PATH_LEN + 1)
            .collect();
        let _ = Port::new(&path, cfg());
    }

    #[test]
    fn test_registry_uniqueness() {
        let mut reg = PortRegistry::new();
        reg.insert(Arc::new(Port::new("svc.alpha", cfg()))).unwrap();
        assert_eq!(
            reg.insert(Arc::new(Port::new("svc.alpha", cfg()))).err(),
            Some(Error::AlreadyExists)
        );

        // path becomes available again after removal
        reg.remove("svc.alpha");
        assert!(reg.insert(Arc::new(Port::new("svc.alpha", cfg()))).is_ok());
    }

    #[test]
    fn test_registry_lookup() {
        let mut reg = PortRegistry::new();
        let port = Arc::new(Port::new("svc.beta", cfg()));
        reg.insert(port.clone()).unwrap();

        let found = reg.lookup("svc.beta").unwrap();
        assert!(Arc::ptr_eq(&found, &port));
        assert!(reg.lookup("svc.gamma").is_none());
        assert!(reg.lookup("").is_none());
    }

    #[test]
    fn test_registry_capacity() {
        let mut reg = PortRegistry::new();
        for i in 0..MAX_PORTS {
            let path = std::format!("svc.cap.{i}");
            reg.insert(Arc::new(Port::new(&path, cfg()))).unwrap();
        }
        assert_eq!(
            reg.insert(Arc::new(Port::new("svc.cap.overflow", cfg()))).err(),
            Some(Error::NoResources)
        );
    }

    #[test]
    fn test_port_ready_tracks_pending() {
        use crate::channel::ChannelEnd;

        let port = Port::new("svc.ready", cfg());
        assert_eq!(port.poll(), PollSet::empty());

        let (client, server) = ChannelEnd::pair(&cfg());
        port.enqueue(Pending::new(client, server)).unwrap();
        assert_eq!(port.poll(), PollSet::READY);

        port.with_pending(|q| q.clear());
        assert_eq!(port.poll(), PollSet::empty());
    }

    #[test]
    fn test_closed_port_rejects_connections() {
        use crate::channel::ChannelEnd;

        let port = Port::new("svc.closing", cfg());
        port.close();

        let (client, server) = ChannelEnd::pair(&cfg());
        assert_eq!(
            port.enqueue(Pending::new(client, server)).err(),
            Some(Error::ChannelClosed)
        );
    }

    #[test]
    fn test_pending_state_races() {
        use crate::channel::ChannelEnd;

        let (client, server) = ChannelEnd::pair(&cfg());
        let pending = Pending::new(client, server);

        assert!(pending.abandon());
        // the accept loses and must treat the entry as closed
        assert!(!pending.accept());
        assert_eq!(pending.state(), PendingState::Abandoned);

        let (client, server) = ChannelEnd::pair(&cfg());
        let pending = Pending::new(client, server);
        assert!(pending.accept());
        assert!(!pending.abandon());
        assert_eq!(pending.state(), PendingState::Accepted);
    }
}
