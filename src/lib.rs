//! ipc_r - A port/channel IPC engine in Rust
//!
//! This crate provides the core of a message-passing IPC system: per-task
//! handle tables, a named port registry, connected channel pairs backed by
//! fixed buffer pools, and blocking wait primitives with timeout.
//!
//! Servers publish a [`Port`](port::Port) under a textual path via
//! [`Task::port_create`](task::Task::port_create); clients reach it with
//! [`Task::connect`](task::Task::connect), which pends on the port until the
//! owner calls [`Task::accept`](task::Task::accept). Either side then moves
//! discrete messages with `send_msg`/`get_msg`/`read_msg`/`put_msg` and
//! observes readiness through `wait`/`wait_any` events.

#![cfg_attr(not(any(test, feature = "std")), no_std)]
// Kernel-style objects have specialized construction that doesn't fit Default
#![allow(clippy::new_without_default)]

extern crate alloc;

pub mod channel;
pub mod engine;
pub mod error;
pub mod event;
pub mod handle;
pub mod msg;
pub mod port;
pub mod task;
pub mod wait;


pub use engine::Engine;
pub use error::{Error, Result};
pub use event::{Event, PollSet};
pub use handle::{Handle, INVALID_IPC_HANDLE, MAX_USER_HANDLES};
pub use msg::{IoVec, IpcMsg, MsgInfo};
pub use port::{PortFlags, MAX_PORTS, MAX_PORT_BUF_NUM, MAX_PORT_BUF_SIZE, MAX_PORT_PATH_LEN};
pub use task::Task;
pub use wait::{Platform, INFINITE_TIME};

#[cfg(any(test, feature = "std"))]
pub use wait::HostPlatform;
