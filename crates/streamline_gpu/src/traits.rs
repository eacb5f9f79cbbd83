//! # Backend Traits
//!
//! The operations the loader performs on a device. Backends pick concrete
//! types through associated types, and the loader is generic over
//! [`Backend`].

use crate::error::GpuResult;
use crate::types::{
    BufferBarrier, BufferCreationFlags, BufferDesc, BufferUsage, DeviceLimits, FenceStatus,
    MemoryUsage, QueueDesc, ResourceState,
};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// A device buffer.
///
/// Buffers are shared through `Arc` between the application and the
/// loader. CPU access goes through `write_mapped`/`read_mapped`, which
/// require the buffer to be mapped and bounds-check every access.
pub trait GpuBuffer: Send + Sync + fmt::Debug {
    /// Unique id within the backend.
    fn id(&self) -> u64;

    /// Size in bytes.
    fn size(&self) -> u64;

    /// Heap the buffer lives in.
    fn memory_usage(&self) -> MemoryUsage;

    /// Creation options.
    fn flags(&self) -> BufferCreationFlags;

    /// Binding usage.
    fn usage(&self) -> BufferUsage;

    /// Returns true while at least one map is outstanding.
    fn is_mapped(&self) -> bool;

    /// Maps the buffer for CPU access.
    ///
    /// Maps nest: the buffer stays mapped until every `map` has been
    /// matched by an [`GpuBuffer::unmap`]. Persistently mapped buffers
    /// start with one outstanding map.
    ///
    /// # Errors
    ///
    /// Fails for device-local or destroyed buffers.
    fn map(&self) -> GpuResult<()>;

    /// Releases one outstanding map. Unmapping an unmapped buffer is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// Fails for destroyed buffers.
    fn unmap(&self) -> GpuResult<()>;

    /// Copies `bytes` into mapped memory at `offset`.
    ///
    /// # Errors
    ///
    /// Fails if unmapped, destroyed, or out of bounds.
    fn write_mapped(&self, offset: u64, bytes: &[u8]) -> GpuResult<()>;

    /// Sets `len` bytes of mapped memory at `offset` to `value`.
    ///
    /// # Errors
    ///
    /// Fails if unmapped, destroyed, or out of bounds.
    fn fill_mapped(&self, offset: u64, len: u64, value: u8) -> GpuResult<()>;

    /// Reads mapped memory at `offset` into `out`.
    ///
    /// # Errors
    ///
    /// Fails if unmapped, destroyed, or out of bounds.
    fn read_mapped(&self, offset: u64, out: &mut [u8]) -> GpuResult<()>;

    /// Releases the buffer's memory. Later use fails with
    /// [`crate::GpuError::Destroyed`].
    fn destroy(&self);

    /// Returns true once destroyed.
    fn is_destroyed(&self) -> bool;

    /// State the buffer is currently in, as last set by an executed
    /// barrier.
    fn current_state(&self) -> ResourceState;
}

/// A GPU/CPU synchronisation primitive signalled when submitted work ends.
pub trait Fence: Send + fmt::Debug {
    /// Non-blocking status query.
    fn status(&self) -> FenceStatus;

    /// Blocks until signalled or `timeout` elapses. Returns true if
    /// signalled. A fence that was never submitted counts as signalled.
    ///
    /// # Errors
    ///
    /// Fails if the device is lost.
    fn wait(&self, timeout: Duration) -> GpuResult<bool>;
}

/// A list of recorded commands.
pub trait CommandBuffer: Send + fmt::Debug {
    /// Buffer type the commands operate on.
    type Buffer: GpuBuffer;

    /// Starts recording, discarding anything previously recorded.
    ///
    /// # Errors
    ///
    /// Fails if already recording.
    fn begin(&mut self) -> GpuResult<()>;

    /// Stops recording.
    ///
    /// # Errors
    ///
    /// Fails if not recording.
    fn end(&mut self) -> GpuResult<()>;

    /// Returns true between `begin` and `end`.
    fn is_recording(&self) -> bool;

    /// Number of commands recorded since `begin`.
    fn command_count(&self) -> usize;

    /// Records a buffer-to-buffer copy.
    ///
    /// # Errors
    ///
    /// Fails if not recording, either range is out of bounds, or either
    /// buffer is destroyed.
    fn copy_buffer(
        &mut self,
        src: &Arc<Self::Buffer>,
        src_offset: u64,
        dst: &Arc<Self::Buffer>,
        dst_offset: u64,
        size: u64,
    ) -> GpuResult<()>;

    /// Records a state transition.
    ///
    /// # Errors
    ///
    /// Fails if not recording or the buffer is destroyed.
    fn buffer_barrier(&mut self, barrier: &BufferBarrier<Self::Buffer>) -> GpuResult<()>;
}

/// Allocates command buffers for one queue.
pub trait CommandPool: Send + fmt::Debug {
    /// Command buffer type handed out by this pool.
    type CommandBuffer: CommandBuffer;

    /// Allocates a new command buffer.
    ///
    /// # Errors
    ///
    /// Fails if the device is lost.
    fn allocate_command_buffer(&self) -> GpuResult<Self::CommandBuffer>;

    /// Recycles memory of every buffer allocated from this pool.
    ///
    /// # Errors
    ///
    /// Fails if the device is lost.
    fn reset(&self) -> GpuResult<()>;
}

/// A device queue that executes command buffers.
pub trait Queue: Send + fmt::Debug {
    /// Command buffer type accepted by this queue.
    type CommandBuffer: CommandBuffer;
    /// Fence type signalled by this queue.
    type Fence: Fence;

    /// Submits recorded commands. `fence` is signalled once they have
    /// executed. The command buffer is left empty and may be begun again.
    ///
    /// # Errors
    ///
    /// Fails if the command buffer is still recording, the fence is still
    /// in flight, or the device is lost.
    fn submit(&self, commands: &mut Self::CommandBuffer, fence: &Self::Fence) -> GpuResult<()>;

    /// Blocks until every submission has executed.
    ///
    /// # Errors
    ///
    /// Fails if the device is lost.
    fn wait_idle(&self) -> GpuResult<()>;
}

/// A graphics device.
pub trait Backend: Send + Sync + 'static {
    /// Buffer type.
    type Buffer: GpuBuffer + 'static;
    /// Fence type.
    type Fence: Fence + 'static;
    /// Command buffer type.
    type CommandBuffer: CommandBuffer<Buffer = Self::Buffer> + 'static;
    /// Command pool type.
    type CommandPool: CommandPool<CommandBuffer = Self::CommandBuffer> + 'static;
    /// Queue type.
    type Queue: Queue<CommandBuffer = Self::CommandBuffer, Fence = Self::Fence> + 'static;

    /// Backend name for logs.
    fn name(&self) -> &str;

    /// Alignment requirements of this device.
    fn limits(&self) -> DeviceLimits;

    /// Creates a buffer.
    ///
    /// # Errors
    ///
    /// Fails for invalid descriptors or a lost device.
    fn create_buffer(&self, desc: &BufferDesc) -> GpuResult<Arc<Self::Buffer>>;

    /// Creates an unsignalled fence.
    ///
    /// # Errors
    ///
    /// Fails if the device is lost.
    fn create_fence(&self) -> GpuResult<Self::Fence>;

    /// Creates a queue.
    ///
    /// # Errors
    ///
    /// Fails if the device is lost.
    fn create_queue(&self, desc: &QueueDesc) -> GpuResult<Self::Queue>;

    /// Creates a command pool for `queue`.
    ///
    /// # Errors
    ///
    /// Fails if the device is lost.
    fn create_command_pool(&self, queue: &Self::Queue) -> GpuResult<Self::CommandPool>;
}
