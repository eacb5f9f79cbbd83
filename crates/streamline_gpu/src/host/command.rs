//! Host command recording.

use super::{HostBuffer, HostDevice};
use crate::error::{GpuError, GpuResult};
use crate::traits::{CommandBuffer, CommandPool, GpuBuffer};
use crate::types::{BufferBarrier, QueueType};
use std::sync::Arc;

/// A recorded command, executed later on the timeline thread.
#[derive(Debug)]
pub(crate) enum HostCommand {
    Copy {
        src: Arc<HostBuffer>,
        src_offset: u64,
        dst: Arc<HostBuffer>,
        dst_offset: u64,
        size: u64,
    },
    Barrier(BufferBarrier<HostBuffer>),
}

impl HostCommand {
    pub(crate) fn execute(&self) {
        match self {
            Self::Copy {
                src,
                src_offset,
                dst,
                dst_offset,
                size,
            } => {
                if let Err(e) = src.copy_into(*src_offset, dst, *dst_offset, *size) {
                    tracing::error!(
                        "Copy {} -> {} ({} bytes) failed on timeline: {}",
                        src.id(),
                        dst.id(),
                        size,
                        e
                    );
                }
            }
            Self::Barrier(barrier) => {
                barrier
                    .buffer
                    .transition(barrier.old_state, barrier.new_state);
            }
        }
    }
}

/// A command buffer of the host backend.
#[derive(Debug, Default)]
pub struct HostCommandBuffer {
    recording: bool,
    commands: Vec<HostCommand>,
}

impl HostCommandBuffer {
    pub(crate) fn take_commands(&mut self) -> Vec<HostCommand> {
        std::mem::take(&mut self.commands)
    }

    fn check_recording(&self) -> GpuResult<()> {
        if self.recording {
            Ok(())
        } else {
            Err(GpuError::NotRecording)
        }
    }
}

impl CommandBuffer for HostCommandBuffer {
    type Buffer = HostBuffer;

    fn begin(&mut self) -> GpuResult<()> {
        if self.recording {
            return Err(GpuError::StillRecording);
        }
        self.commands.clear();
        self.recording = true;
        Ok(())
    }

    fn end(&mut self) -> GpuResult<()> {
        self.check_recording()?;
        self.recording = false;
        Ok(())
    }

    fn is_recording(&self) -> bool {
        self.recording
    }

    fn command_count(&self) -> usize {
        self.commands.len()
    }

    fn copy_buffer(
        &mut self,
        src: &Arc<HostBuffer>,
        src_offset: u64,
        dst: &Arc<HostBuffer>,
        dst_offset: u64,
        size: u64,
    ) -> GpuResult<()> {
        self.check_recording()?;
        src.check_range(src_offset, size)?;
        dst.check_range(dst_offset, size)?;

        self.commands.push(HostCommand::Copy {
            src: Arc::clone(src),
            src_offset,
            dst: Arc::clone(dst),
            dst_offset,
            size,
        });
        Ok(())
    }

    fn buffer_barrier(&mut self, barrier: &BufferBarrier<HostBuffer>) -> GpuResult<()> {
        self.check_recording()?;
        if barrier.buffer.is_destroyed() {
            return Err(GpuError::Destroyed {
                buffer: barrier.buffer.id(),
            });
        }
        self.commands.push(HostCommand::Barrier(barrier.clone()));
        Ok(())
    }
}

/// A command pool of the host backend.
#[derive(Debug)]
pub struct HostCommandPool {
    queue_type: QueueType,
    device: Arc<HostDevice>,
}

impl HostCommandPool {
    pub(crate) fn new(queue_type: QueueType, device: Arc<HostDevice>) -> Self {
        Self { queue_type, device }
    }

    /// Queue family this pool records for.
    #[must_use]
    pub const fn queue_type(&self) -> QueueType {
        self.queue_type
    }
}

impl CommandPool for HostCommandPool {
    type CommandBuffer = HostCommandBuffer;

    fn allocate_command_buffer(&self) -> GpuResult<HostCommandBuffer> {
        self.device.check_alive()?;
        Ok(HostCommandBuffer::default())
    }

    fn reset(&self) -> GpuResult<()> {
        self.device.check_alive()
    }
}
