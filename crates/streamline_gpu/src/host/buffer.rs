//! Host buffers: a byte vector plus mapping and state bookkeeping.

use super::HostDevice;
use crate::error::{GpuError, GpuResult};
use crate::traits::GpuBuffer;
use crate::types::{
    BufferCreationFlags, BufferDesc, BufferUsage, MemoryUsage, ResourceState,
};
use parking_lot::Mutex;
use std::fmt;
use std::ops::Range;
use std::sync::Arc;

#[derive(Debug)]
struct HostMemory {
    bytes: Vec<u8>,
    /// Outstanding maps; persistent buffers start with one.
    map_count: u32,
    destroyed: bool,
    state: ResourceState,
}

/// A buffer of the host backend.
pub struct HostBuffer {
    id: u64,
    desc: BufferDesc,
    memory: Mutex<HostMemory>,
    device: Arc<HostDevice>,
}

impl fmt::Debug for HostBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostBuffer")
            .field("id", &self.id)
            .field("label", &self.desc.label)
            .field("size", &self.desc.size)
            .field("memory_usage", &self.desc.memory_usage)
            .finish_non_exhaustive()
    }
}

impl HostBuffer {
    pub(crate) fn new(id: u64, desc: BufferDesc, len: usize, device: Arc<HostDevice>) -> Self {
        let map_count = u32::from(desc.flags.contains(BufferCreationFlags::PERSISTENT_MAP));
        let state = desc.start_state;
        Self {
            id,
            desc,
            memory: Mutex::new(HostMemory {
                bytes: vec![0; len],
                map_count,
                destroyed: false,
                state,
            }),
            device,
        }
    }

    /// Debug name.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.desc.label
    }

    /// Snapshot of the buffer contents regardless of heap or mapping.
    ///
    /// Stands in for a GPU readback. Empty once destroyed.
    #[must_use]
    pub fn contents(&self) -> Vec<u8> {
        self.memory.lock().bytes.clone()
    }

    /// Validates a range against this buffer without touching it.
    pub(crate) fn check_range(&self, offset: u64, len: u64) -> GpuResult<()> {
        let memory = self.memory.lock();
        if memory.destroyed {
            return Err(GpuError::Destroyed { buffer: self.id });
        }
        self.byte_range(offset, len).map(drop)
    }

    /// Executes a device copy from `self` into `dst`.
    pub(crate) fn copy_into(
        &self,
        src_offset: u64,
        dst: &Self,
        dst_offset: u64,
        size: u64,
    ) -> GpuResult<()> {
        let src_range = self.byte_range(src_offset, size)?;
        let dst_range = dst.byte_range(dst_offset, size)?;

        if self.id == dst.id {
            let mut memory = self.memory.lock();
            if memory.destroyed {
                return Err(GpuError::Destroyed { buffer: self.id });
            }
            memory.bytes.copy_within(src_range, dst_range.start);
            return Ok(());
        }

        let staged = {
            let memory = self.memory.lock();
            if memory.destroyed {
                return Err(GpuError::Destroyed { buffer: self.id });
            }
            memory.bytes[src_range].to_vec()
        };

        let mut memory = dst.memory.lock();
        if memory.destroyed {
            return Err(GpuError::Destroyed { buffer: dst.id });
        }
        memory.bytes[dst_range].copy_from_slice(&staged);
        Ok(())
    }

    /// Executes a state transition.
    pub(crate) fn transition(&self, old_state: ResourceState, new_state: ResourceState) {
        let mut memory = self.memory.lock();
        if memory.destroyed {
            tracing::warn!("Barrier on destroyed buffer {} ignored", self.id);
            return;
        }
        if old_state != ResourceState::Undefined && memory.state != old_state {
            tracing::warn!(
                "Barrier on buffer {} '{}' expected {:?} but buffer is in {:?}",
                self.id,
                self.desc.label,
                old_state,
                memory.state
            );
        }
        memory.state = new_state;
    }

    fn byte_range(&self, offset: u64, len: u64) -> GpuResult<Range<usize>> {
        let out_of_bounds = || GpuError::OutOfBounds {
            buffer: self.id,
            offset,
            len,
            size: self.desc.size,
        };
        let end = offset.checked_add(len).ok_or_else(out_of_bounds)?;
        if end > self.desc.size {
            return Err(out_of_bounds());
        }
        let start = usize::try_from(offset).map_err(|_| out_of_bounds())?;
        let end = usize::try_from(end).map_err(|_| out_of_bounds())?;
        Ok(start..end)
    }

    fn with_mapped<R>(&self, f: impl FnOnce(&mut Vec<u8>) -> R) -> GpuResult<R> {
        let mut memory = self.memory.lock();
        if memory.destroyed {
            return Err(GpuError::Destroyed { buffer: self.id });
        }
        if memory.map_count == 0 {
            return Err(GpuError::NotMapped { buffer: self.id });
        }
        Ok(f(&mut memory.bytes))
    }
}

impl GpuBuffer for HostBuffer {
    fn id(&self) -> u64 {
        self.id
    }

    fn size(&self) -> u64 {
        self.desc.size
    }

    fn memory_usage(&self) -> MemoryUsage {
        self.desc.memory_usage
    }

    fn flags(&self) -> BufferCreationFlags {
        self.desc.flags
    }

    fn usage(&self) -> BufferUsage {
        self.desc.usage
    }

    fn is_mapped(&self) -> bool {
        self.memory.lock().map_count > 0
    }

    fn map(&self) -> GpuResult<()> {
        if !self.desc.memory_usage.is_cpu_visible() {
            return Err(GpuError::NotMappable { buffer: self.id });
        }
        let mut memory = self.memory.lock();
        if memory.destroyed {
            return Err(GpuError::Destroyed { buffer: self.id });
        }
        memory.map_count = memory.map_count.saturating_add(1);
        Ok(())
    }

    fn unmap(&self) -> GpuResult<()> {
        let mut memory = self.memory.lock();
        if memory.destroyed {
            return Err(GpuError::Destroyed { buffer: self.id });
        }
        memory.map_count = memory.map_count.saturating_sub(1);
        Ok(())
    }

    fn write_mapped(&self, offset: u64, bytes: &[u8]) -> GpuResult<()> {
        let range = self.byte_range(offset, bytes.len() as u64)?;
        self.with_mapped(|memory| memory[range].copy_from_slice(bytes))
    }

    fn fill_mapped(&self, offset: u64, len: u64, value: u8) -> GpuResult<()> {
        let range = self.byte_range(offset, len)?;
        self.with_mapped(|memory| memory[range].fill(value))
    }

    fn read_mapped(&self, offset: u64, out: &mut [u8]) -> GpuResult<()> {
        let range = self.byte_range(offset, out.len() as u64)?;
        self.with_mapped(|memory| out.copy_from_slice(&memory[range]))
    }

    fn destroy(&self) {
        let mut memory = self.memory.lock();
        if memory.destroyed {
            return;
        }
        memory.destroyed = true;
        memory.map_count = 0;
        memory.bytes = Vec::new();
        self.device.buffer_released();
        tracing::trace!("Destroyed host buffer {}", self.id);
    }

    fn is_destroyed(&self) -> bool {
        self.memory.lock().destroyed
    }

    fn current_state(&self) -> ResourceState {
        self.memory.lock().state
    }
}

impl Drop for HostBuffer {
    fn drop(&mut self) {
        if !self.memory.get_mut().destroyed {
            self.device.buffer_released();
        }
    }
}
