//! Host fences: a status word and a condition variable.

use super::HostDevice;
use crate::error::{GpuError, GpuResult};
use crate::traits::Fence;
use crate::types::FenceStatus;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// State shared between a fence and the timeline thread.
#[derive(Debug)]
pub(crate) struct FenceShared {
    status: Mutex<FenceStatus>,
    signaled: Condvar,
}

impl FenceShared {
    /// Marks the fence as in flight.
    pub(crate) fn arm(&self) -> GpuResult<()> {
        let mut status = self.status.lock();
        if *status == FenceStatus::Incomplete {
            return Err(GpuError::FenceInUse);
        }
        *status = FenceStatus::Incomplete;
        Ok(())
    }

    /// Reverts an [`FenceShared::arm`] whose submission never happened.
    pub(crate) fn disarm(&self) {
        *self.status.lock() = FenceStatus::NotSubmitted;
        self.signaled.notify_all();
    }

    /// Signals completion and wakes waiters.
    pub(crate) fn signal(&self) {
        *self.status.lock() = FenceStatus::Complete;
        self.signaled.notify_all();
    }
}

/// A fence of the host backend.
#[derive(Debug)]
pub struct HostFence {
    shared: Arc<FenceShared>,
    device: Arc<HostDevice>,
}

impl HostFence {
    pub(crate) fn new(device: Arc<HostDevice>) -> Self {
        Self {
            shared: Arc::new(FenceShared {
                status: Mutex::new(FenceStatus::NotSubmitted),
                signaled: Condvar::new(),
            }),
            device,
        }
    }

    pub(crate) fn shared(&self) -> Arc<FenceShared> {
        Arc::clone(&self.shared)
    }
}

impl Fence for HostFence {
    fn status(&self) -> FenceStatus {
        *self.shared.status.lock()
    }

    fn wait(&self, timeout: Duration) -> GpuResult<bool> {
        let deadline = Instant::now() + timeout;
        let mut status = self.shared.status.lock();
        while *status == FenceStatus::Incomplete {
            self.device.check_alive()?;
            if self.shared.signaled.wait_until(&mut status, deadline).timed_out() {
                return Ok(status.is_signaled());
            }
        }
        Ok(true)
    }
}
