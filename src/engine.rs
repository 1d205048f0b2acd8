//! Engine: shared state behind every task
//!
//! Holds the process-wide port registry and the platform services blocking
//! calls are written against. Deliberately a plain value rather than a
//! global so tests (and embedders) can run several isolated engines side
//! by side.

use alloc::sync::Arc;
use spin::Mutex;

use crate::port::PortRegistry;
use crate::task::Task;
use crate::wait::Platform;

/// Shared IPC engine state
pub struct Engine {
    registry: Mutex<PortRegistry>,
    platform: Arc<dyn Platform>,
}

impl Engine {
    /// Engine over the given platform services
    pub fn new(platform: Arc<dyn Platform>) -> Arc<Self> {
        Arc::new(Self {
            registry: Mutex::new(PortRegistry::new()),
            platform,
        })
    }

    /// Engine over the host OS clock and scheduler
    #[cfg(any(test, feature = "std"))]
    pub fn host() -> Arc<Self> {
        Self::new(Arc::new(crate::wait::HostPlatform::new()))
    }

    /// Create a fresh task context with an empty handle table
    pub fn task(self: &Arc<Self>) -> Task {
        Task::new(self.clone())
    }

    pub(crate) fn registry(&self) -> &Mutex<PortRegistry> {
        &self.registry
    }

    pub(crate) fn platform(&self) -> &dyn Platform {
        &*self.platform
    }
}
