//! # Host Backend
//!
//! A software device that behaves like an asynchronous transfer queue:
//!
//! ```text
//!   Queue::submit ──> [crossbeam channel] ──> timeline thread
//!                                               │ (optional delay)
//!                                               ├─ execute copies/barriers in order
//!                                               └─ signal fence
//! ```
//!
//! Buffer contents are host byte vectors. Device-local buffers cannot be
//! mapped, so the only way to fill them is a recorded copy, exactly as on
//! real hardware.
//!
//! Test hooks on [`HostBackend`] inject submission failures and expose
//! counters.

mod buffer;
mod command;
mod fence;
mod queue;

pub use buffer::HostBuffer;
pub use command::{HostCommandBuffer, HostCommandPool};
pub use fence::HostFence;
pub use queue::HostQueue;

use crate::error::{GpuError, GpuResult};
use crate::traits::Backend;
use crate::types::{BufferCreationFlags, BufferDesc, DeviceLimits, QueueDesc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Configuration for the host backend.
#[derive(Clone, Debug, Default)]
pub struct HostBackendConfig {
    /// Time the timeline thread sleeps before executing each submission.
    pub execution_delay: Duration,
    /// Limits reported by the device.
    pub limits: DeviceLimits,
}

impl HostBackendConfig {
    /// Sets the per-submission execution delay.
    #[must_use]
    pub const fn with_execution_delay(mut self, delay: Duration) -> Self {
        self.execution_delay = delay;
        self
    }
}

/// Device-wide state shared by every host object.
#[derive(Debug, Default)]
pub(crate) struct HostDevice {
    next_buffer_id: AtomicU64,
    live_buffers: AtomicUsize,
    submissions: AtomicU64,
    fail_next_submit: AtomicBool,
    lost: Mutex<Option<String>>,
}

impl HostDevice {
    pub(crate) fn check_alive(&self) -> GpuResult<()> {
        match &*self.lost.lock() {
            Some(reason) => Err(GpuError::DeviceLost(reason.clone())),
            None => Ok(()),
        }
    }

    pub(crate) fn is_lost(&self) -> bool {
        self.lost.lock().is_some()
    }

    pub(crate) fn lose(&self, reason: &str) {
        let mut lost = self.lost.lock();
        if lost.is_none() {
            tracing::error!("Host device lost: {}", reason);
            *lost = Some(reason.to_string());
        }
    }

    pub(crate) fn take_injected_failure(&self) -> bool {
        self.fail_next_submit.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn count_submission(&self) {
        self.submissions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn buffer_released(&self) {
        self.live_buffers.fetch_sub(1, Ordering::AcqRel);
    }
}

/// The host backend.
#[derive(Debug, Default)]
pub struct HostBackend {
    config: HostBackendConfig,
    device: Arc<HostDevice>,
}

impl HostBackend {
    /// Creates a backend.
    #[must_use]
    pub fn new(config: HostBackendConfig) -> Self {
        Self {
            config,
            device: Arc::new(HostDevice::default()),
        }
    }

    /// Makes the next `Queue::submit` fail with [`GpuError::DeviceLost`]
    /// and marks the device lost.
    pub fn fail_next_submit(&self) {
        self.device.fail_next_submit.store(true, Ordering::Release);
    }

    /// Number of successful submissions across every queue.
    #[must_use]
    pub fn submission_count(&self) -> u64 {
        self.device.submissions.load(Ordering::Relaxed)
    }

    /// Number of buffers neither dropped nor destroyed.
    #[must_use]
    pub fn live_buffer_count(&self) -> usize {
        self.device.live_buffers.load(Ordering::Acquire)
    }

    /// Returns true once the device has been lost.
    #[must_use]
    pub fn is_device_lost(&self) -> bool {
        self.device.is_lost()
    }
}

impl Backend for HostBackend {
    type Buffer = HostBuffer;
    type Fence = HostFence;
    type CommandBuffer = HostCommandBuffer;
    type CommandPool = HostCommandPool;
    type Queue = HostQueue;

    fn name(&self) -> &str {
        "host"
    }

    fn limits(&self) -> DeviceLimits {
        self.config.limits
    }

    fn create_buffer(&self, desc: &BufferDesc) -> GpuResult<Arc<HostBuffer>> {
        self.device.check_alive()?;

        if desc.size == 0 {
            return Err(GpuError::InvalidDescriptor(format!(
                "buffer '{}' has zero size",
                desc.label
            )));
        }
        let len = usize::try_from(desc.size).map_err(|_| {
            GpuError::InvalidDescriptor(format!("buffer size {} exceeds host memory", desc.size))
        })?;
        if desc.flags.contains(BufferCreationFlags::PERSISTENT_MAP)
            && !desc.memory_usage.is_cpu_visible()
        {
            return Err(GpuError::InvalidDescriptor(format!(
                "buffer '{}' is device-local and cannot be persistently mapped",
                desc.label
            )));
        }

        let id = self.device.next_buffer_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.device.live_buffers.fetch_add(1, Ordering::AcqRel);
        tracing::trace!(
            "Created host buffer {} '{}' ({} bytes, {:?})",
            id,
            desc.label,
            desc.size,
            desc.memory_usage
        );

        Ok(Arc::new(HostBuffer::new(
            id,
            desc.clone(),
            len,
            Arc::clone(&self.device),
        )))
    }

    fn create_fence(&self) -> GpuResult<HostFence> {
        self.device.check_alive()?;
        Ok(HostFence::new(Arc::clone(&self.device)))
    }

    fn create_queue(&self, desc: &QueueDesc) -> GpuResult<HostQueue> {
        self.device.check_alive()?;
        HostQueue::spawn(
            desc.clone(),
            self.config.execution_delay,
            Arc::clone(&self.device),
        )
    }

    fn create_command_pool(&self, queue: &HostQueue) -> GpuResult<HostCommandPool> {
        self.device.check_alive()?;
        Ok(HostCommandPool::new(
            queue.queue_type(),
            Arc::clone(&self.device),
        ))
    }
}
