//! Task context and the user-callable operation surface
//!
//! A [`Task`] models one caller of the engine: it owns a handle table and
//! the readiness bookkeeping for `wait_any`. Every entry point lives here,
//! layered over the object modules the way the operations sit over spaces
//! and ports in a microkernel.
//!
//! There is deliberately no hidden per-process singleton: tests simulate
//! any number of tasks by creating several `Task` values over one
//! [`Engine`](crate::engine::Engine).

use alloc::sync::{Arc, Weak};
use log::debug;

use crate::channel::ChannelEnd;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::event::{Event, PollSet, ReadyQueue};
use crate::handle::{Handle, HandleTable, KObject};
use crate::msg::{self, IpcMsg, MsgInfo};
use crate::port::{
    Pending, PendingState, Port, PortConfig, PortFlags, MAX_PORT_BUF_NUM, MAX_PORT_BUF_SIZE,
    MAX_PORT_PATH_LEN,
};
use crate::wait::{Deadline, WaitQueue};
use spin::Mutex;

/// Shared per-task state objects point back into for event delivery
pub struct TaskState {
    table: Mutex<HandleTable>,
    ready: Mutex<ReadyQueue>,
    waiters: WaitQueue,
}

impl TaskState {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            table: Mutex::new(HandleTable::new()),
            ready: Mutex::new(ReadyQueue::new()),
            waiters: WaitQueue::new(),
        })
    }

    /// Record that a handle became ready and wake `wait_any` callers
    pub(crate) fn note_ready(&self, handle: Handle) {
        if handle.0 >= 0 {
            self.ready.lock().push(handle.0 as usize);
            self.waiters.wake_all();
        }
    }

    /// Oldest ready slot, with the lock scoped to the pop
    fn pop_ready(&self) -> Option<usize> {
        self.ready.lock().pop()
    }
}

/// Back-reference from an object to the task slot holding it
pub struct OwnerRef {
    task: Weak<TaskState>,
    handle: Handle,
}

impl OwnerRef {
    pub(crate) fn new(task: &Arc<TaskState>, handle: Handle) -> Self {
        Self {
            task: Arc::downgrade(task),
            handle,
        }
    }

    /// Push the owning handle onto its task's ready queue
    pub fn notify(&self) {
        if let Some(task) = self.task.upgrade() {
            task.note_ready(self.handle);
        }
    }
}

/// One caller context over a shared engine
#[derive(Clone)]
pub struct Task {
    state: Arc<TaskState>,
    engine: Arc<Engine>,
}

impl Task {
    pub(crate) fn new(engine: Arc<Engine>) -> Self {
        Self {
            state: TaskState::new(),
            engine,
        }
    }

    fn owner_ref(&self, handle: Handle) -> OwnerRef {
        OwnerRef::new(&self.state, handle)
    }

    /// Resolve a handle to a channel endpoint; ports are `InvalidArgs`
    fn channel(&self, handle: Handle) -> Result<Arc<ChannelEnd>> {
        match self.state.table.lock().get(handle)? {
            KObject::Channel(chan) => Ok(chan),
            KObject::Port(_) => Err(Error::InvalidArgs),
        }
    }

    // ========================================================================
    // Ports
    // ========================================================================

    /// Create a port registered under `path`
    pub fn port_create(
        &self,
        path: &str,
        num_bufs: usize,
        buf_size: usize,
        flags: PortFlags,
    ) -> Result<Handle> {
        if path.is_empty() || path.len() > MAX_PORT_PATH_LEN {
            return Err(Error::InvalidArgs);
        }
        if num_bufs == 0 || num_bufs > MAX_PORT_BUF_NUM {
            return Err(Error::InvalidArgs);
        }
        if buf_size == 0 || buf_size > MAX_PORT_BUF_SIZE {
            return Err(Error::InvalidArgs);
        }

        let config = PortConfig {
            num_bufs,
            buf_size,
            flags,
        };
        let port = Arc::new(Port::new(path, config));

        // The handle slot is claimed before the path: a caller out of
        // handles must see NoResources even when the path also collides.
        let handle = self
            .state
            .table
            .lock()
            .allocate(KObject::Port(port.clone()))?;

        // Owner must be wired before the registry makes the port reachable,
        // or a connect landing in between would enqueue without notifying.
        port.set_owner(self.owner_ref(handle));

        if let Err(err) = self.engine.registry().lock().insert(port.clone()) {
            let _ = self.state.table.lock().release(handle);
            return Err(err);
        }

        debug!("port_create: {} -> handle {}", path, handle.raw());
        Ok(handle)
    }

    /// Accept the oldest pending connection on a port
    pub fn accept(&self, port_handle: Handle) -> Result<Handle> {
        let port = match self.state.table.lock().get(port_handle)? {
            KObject::Port(port) => port,
            KObject::Channel(_) => return Err(Error::InvalidArgs),
        };

        port.with_pending(|queue| {
            let pending = queue.front().cloned().ok_or(Error::NoMsg)?;

            if pending.state() == PendingState::Abandoned {
                // connector tore it down before we got here; consume the
                // corpse so the caller can retry for the next one
                queue.pop_front();
                pending.server().close();
                return Err(Error::ChannelClosed);
            }

            // claim a slot first; on failure the request stays queued
            let server = pending.server().clone();
            let handle = self
                .state
                .table
                .lock()
                .allocate(KObject::Channel(server.clone()))?;

            if !pending.accept() {
                // lost the race to the connector's timeout
                let _ = self.state.table.lock().release(handle);
                queue.pop_front();
                pending.server().close();
                return Err(Error::ChannelClosed);
            }

            queue.pop_front();
            server.set_owner(self.owner_ref(handle));
            if !server.poll().is_empty() {
                self.state.note_ready(handle);
            }
            debug!("accept: port {} -> channel {}", port_handle.raw(), handle.raw());
            Ok(handle)
        })
    }

    // ========================================================================
    // Connect
    // ========================================================================

    /// Connect to a port by path, blocking until accepted or `timeout_ms`
    pub fn connect(&self, path: &str, timeout_ms: u32) -> Result<Handle> {
        if path.is_empty() {
            return Err(Error::NotFound);
        }
        if path.len() > MAX_PORT_PATH_LEN {
            return Err(Error::InvalidArgs);
        }

        let port = self
            .engine
            .registry()
            .lock()
            .lookup(path)
            .ok_or(Error::NotFound)?;

        let (client, server) = ChannelEnd::pair(&port.config());
        let pending = Pending::new(client.clone(), server);
        port.enqueue(pending.clone())?;

        let platform = self.engine.platform();
        let deadline = Deadline::after(platform, timeout_ms);
        let guard = pending.waiters().register();
        loop {
            match pending.state() {
                PendingState::Accepted => break,
                PendingState::PortClosed => return Err(Error::ChannelClosed),
                _ => {}
            }
            if timeout_ms == 0 || deadline.expired(platform) {
                if pending.abandon() {
                    // the request stays queued on the port; the owner will
                    // see it as already closed when accepting
                    client.close();
                    return Err(Error::TimedOut);
                }
                // an accept slipped in right at the deadline
                continue;
            }
            guard.park(platform, &deadline);
        }
        drop(guard);

        let handle = match self
            .state
            .table
            .lock()
            .allocate(KObject::Channel(client.clone()))
        {
            Ok(handle) => handle,
            Err(err) => {
                // accepted but uninstallable; the server keeps its end and
                // observes the hangup
                client.close();
                return Err(err);
            }
        };
        client.set_owner(self.owner_ref(handle));
        if !client.poll().is_empty() {
            self.state.note_ready(handle);
        }
        debug!("connect: {} -> handle {}", path, handle.raw());
        Ok(handle)
    }

    // ========================================================================
    // Handle lifecycle
    // ========================================================================

    /// Close a handle and tear down the object it owned
    pub fn close(&self, handle: Handle) -> Result<()> {
        let object = self.state.table.lock().release(handle)?;
        self.state.ready.lock().remove(handle.0 as usize);

        match object {
            KObject::Port(port) => {
                self.engine.registry().lock().remove(port.path());
                port.close();
                debug!("close: port handle {}", handle.raw());
            }
            KObject::Channel(chan) => {
                chan.close();
                debug!("close: channel handle {}", handle.raw());
            }
        }
        Ok(())
    }

    /// Attach an opaque cookie delivered back in wait events
    pub fn set_cookie(&self, handle: Handle, cookie: usize) -> Result<()> {
        self.state.table.lock().set_cookie(handle, cookie)
    }

    // ========================================================================
    // Waiting
    // ========================================================================

    fn event_for(&self, handle: Handle, bits: PollSet) -> Event {
        let cookie = self.state.table.lock().cookie(handle).unwrap_or(0);
        Event {
            handle,
            event: bits,
            cookie,
        }
    }

    /// Block until `handle` reports readiness or the timeout fires
    ///
    /// A zero timeout polls exactly once.
    pub fn wait(&self, handle: Handle, timeout_ms: u32) -> Result<Event> {
        let object = self.state.table.lock().get(handle)?;

        let platform = self.engine.platform();
        let deadline = Deadline::after(platform, timeout_ms);
        let guard = object.waiters().register();
        loop {
            let bits = object.poll();
            if !bits.is_empty() {
                return Ok(self.event_for(handle, bits));
            }
            if timeout_ms == 0 || deadline.expired(platform) {
                return Err(Error::TimedOut);
            }
            guard.park(platform, &deadline);
        }
    }

    /// Block until any owned handle reports readiness
    ///
    /// Ready handles are served oldest-first and re-queued behind the rest
    /// while still ready, so concurrent events drain in enqueue order and
    /// no handle starves. `NotFound` when the task owns no handles.
    pub fn wait_any(&self, timeout_ms: u32) -> Result<Event> {
        if self.state.table.lock().is_empty() {
            return Err(Error::NotFound);
        }

        let platform = self.engine.platform();
        let deadline = Deadline::after(platform, timeout_ms);
        let guard = self.state.waiters.register();
        loop {
            while let Some(idx) = self.state.pop_ready() {
                let object = match self.state.table.lock().get_at(idx) {
                    Some(object) => object,
                    // slot was closed since it queued; stale entry
                    None => continue,
                };
                let bits = object.poll();
                if bits.is_empty() {
                    continue;
                }
                // still ready: rotate to the back for FIFO fairness
                self.state.ready.lock().push(idx);
                return Ok(self.event_for(Handle(idx as i32), bits));
            }
            if timeout_ms == 0 || deadline.expired(platform) {
                return Err(Error::TimedOut);
            }
            guard.park(platform, &deadline);
        }
    }

    // ========================================================================
    // Messages
    // ========================================================================

    /// Send a gathered message over a channel
    ///
    /// Returns the total byte count enqueued for the peer.
    pub fn send_msg(&self, handle: Handle, msg: Option<&IpcMsg>) -> Result<usize> {
        // a null descriptor faults before the handle is even looked at
        let msg = msg.ok_or(Error::Fault)?;
        let chan = self.channel(handle)?;
        let iov = msg::iov_slice(msg)?;
        msg::iov_check(iov)?;
        if msg.num_handles > 0 {
            return Err(Error::NotSupported);
        }
        chan.send(iov)
    }

    /// Retrieve the oldest unread inbound message's id and length
    pub fn get_msg(&self, handle: Handle) -> Result<MsgInfo> {
        self.channel(handle)?.get()
    }

    /// Copy out of a retrieved message starting at `offset`
    pub fn read_msg(
        &self,
        handle: Handle,
        id: u32,
        offset: usize,
        msg: Option<&IpcMsg>,
    ) -> Result<usize> {
        let msg = msg.ok_or(Error::Fault)?;
        let chan = self.channel(handle)?;
        let iov = msg::iov_slice(msg)?;
        msg::iov_check(iov)?;
        if msg.num_handles > 0 {
            return Err(Error::NotSupported);
        }
        chan.read(id, offset, iov)
    }

    /// Release a retrieved message back to the channel's pool
    pub fn put_msg(&self, handle: Handle, id: u32) -> Result<()> {
        self.channel(handle)?.put(id)
    }

    /// Number of live handles, exposed for diagnostics and tests
    pub fn handle_count(&self) -> usize {
        self.state.table.lock().len()
    }
}
