//! # Request Descriptors
//!
//! What callers hand to [`crate::ResourceLoader`], and what they get back.

use crate::error::LoaderResult;
use crate::staging::MappedRange;
use bytemuck::Pod;
use std::fmt;
use std::sync::Arc;
use streamline_core::SyncToken;
use streamline_gpu::{Backend, BufferDesc, BufferUsage, GpuBuffer, MemoryUsage, ResourceState};

/// Create-and-fill request for a new buffer.
#[derive(Clone, Debug, Default)]
pub struct BufferLoadDesc {
    /// Buffer to create.
    pub desc: BufferDesc,
    /// Initial contents, placed at offset 0. May be shorter than the
    /// buffer.
    pub data: Option<Vec<u8>>,
    /// Zero the buffer. Combined with `data`, zeroes what `data` leaves
    /// uncovered.
    pub force_reset: bool,
    /// Staging alignment; the loader default when `None`.
    pub alignment: Option<u64>,
}

impl BufferLoadDesc {
    /// Describes a buffer created without initial contents.
    #[must_use]
    pub fn new(desc: BufferDesc) -> Self {
        Self {
            desc,
            ..Self::default()
        }
    }

    /// Describes a buffer filled from a slice of plain-old-data values.
    #[must_use]
    pub fn from_pod<T: Pod>(desc: BufferDesc, values: &[T]) -> Self {
        Self::new(desc).with_data(bytemuck::cast_slice(values).to_vec())
    }

    /// Sets the initial contents.
    #[must_use]
    pub fn with_data(mut self, data: Vec<u8>) -> Self {
        self.data = Some(data);
        self
    }

    /// Requests a zeroed buffer.
    #[must_use]
    pub fn with_force_reset(mut self) -> Self {
        self.force_reset = true;
        self
    }

    /// Sets the staging alignment.
    #[must_use]
    pub fn with_alignment(mut self, alignment: u64) -> Self {
        self.alignment = Some(alignment);
        self
    }

    /// Returns true if the buffer needs contents written.
    #[must_use]
    pub fn needs_update(&self) -> bool {
        self.data.is_some() || self.force_reset
    }
}

/// A buffer created by [`crate::ResourceLoader::add_resource`].
pub struct LoadedBuffer<B: Backend> {
    /// The new buffer. Usable by the GPU once `token` completes.
    pub buffer: Arc<B::Buffer>,
    /// Completes when the initial contents or start-state transition have
    /// landed. [`SyncToken::NONE`] when nothing was queued.
    pub token: SyncToken,
}

impl<B: Backend> fmt::Debug for LoadedBuffer<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedBuffer")
            .field("buffer", &self.buffer)
            .field("token", &self.token)
            .finish()
    }
}

/// In-place update of part of an existing buffer.
pub struct BufferUpdateDesc<B: Backend> {
    /// Destination buffer.
    pub buffer: Arc<B::Buffer>,
    /// Offset of the first byte to update.
    pub dst_offset: u64,
    /// Bytes to update; 0 means up to the end of the buffer.
    pub size: u64,
}

impl<B: Backend> BufferUpdateDesc<B> {
    /// Describes an update of the whole buffer.
    #[must_use]
    pub fn whole(buffer: Arc<B::Buffer>) -> Self {
        Self {
            buffer,
            dst_offset: 0,
            size: 0,
        }
    }

    /// Describes an update of `size` bytes at `dst_offset`.
    #[must_use]
    pub fn range(buffer: Arc<B::Buffer>, dst_offset: u64, size: u64) -> Self {
        Self {
            buffer,
            dst_offset,
            size,
        }
    }
}

/// A begun update: a CPU-writable range to fill before ending it.
///
/// Hand it back to [`crate::ResourceLoader::end_update_resource`] to
/// publish the contents. Dropping it instead abandons the update and
/// releases the mapping.
pub struct BufferUpdate<B: Backend> {
    pub(crate) buffer: Arc<B::Buffer>,
    pub(crate) dst_offset: u64,
    pub(crate) range: MappedRange<B::Buffer>,
}

impl<B: Backend> fmt::Debug for BufferUpdate<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferUpdate")
            .field("buffer", &self.buffer.id())
            .field("dst_offset", &self.dst_offset)
            .field("range", &self.range)
            .finish()
    }
}

impl<B: Backend> BufferUpdate<B> {
    /// Destination buffer.
    #[must_use]
    pub fn buffer(&self) -> &Arc<B::Buffer> {
        &self.buffer
    }

    /// Offset in the destination buffer.
    #[must_use]
    pub const fn dst_offset(&self) -> u64 {
        self.dst_offset
    }

    /// Number of bytes being updated.
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.range.size()
    }

    /// The writable range.
    #[must_use]
    pub const fn mapped(&self) -> &MappedRange<B::Buffer> {
        &self.range
    }

    /// Copies `bytes` into the update at `at`.
    ///
    /// # Errors
    ///
    /// Fails if the write leaves the updated range.
    pub fn write(&self, at: u64, bytes: &[u8]) -> LoaderResult<()> {
        self.range.write(at, bytes)
    }

    /// Copies plain-old-data values into the update at `at`.
    ///
    /// # Errors
    ///
    /// Fails if the write leaves the updated range.
    pub fn write_pod<T: Pod>(&self, at: u64, values: &[T]) -> LoaderResult<()> {
        self.range.write_pod(at, values)
    }

    /// Sets `len` bytes at `at` to `value`.
    ///
    /// # Errors
    ///
    /// Fails if the fill leaves the updated range.
    pub fn fill(&self, at: u64, len: u64, value: u8) -> LoaderResult<()> {
        self.range.fill(at, len, value)
    }
}

/// Picks the state a buffer should start in when none was given.
///
/// Host-visible heaps start in `GenericRead` and readback heaps in
/// `CopyDestination`. Device-local buffers pick the single state that
/// covers their most demanding usage, to keep the number of states in
/// play small.
#[must_use]
pub fn determine_start_state(desc: &BufferDesc) -> ResourceState {
    match desc.memory_usage {
        MemoryUsage::CpuOnly | MemoryUsage::CpuToGpu => ResourceState::GenericRead,
        MemoryUsage::GpuToCpu => ResourceState::CopyDestination,
        MemoryUsage::GpuOnly => {
            let usage = desc.usage;
            if usage.contains(BufferUsage::STORAGE) {
                ResourceState::UnorderedAccess
            } else if usage.intersects(BufferUsage::VERTEX | BufferUsage::UNIFORM) {
                ResourceState::VertexAndConstantBuffer
            } else if usage.contains(BufferUsage::INDEX) {
                ResourceState::IndexBuffer
            } else if usage.contains(BufferUsage::INDIRECT) {
                ResourceState::IndirectArgument
            } else if usage.is_empty() {
                ResourceState::ShaderResource
            } else {
                ResourceState::Common
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_state_by_heap() {
        assert_eq!(
            determine_start_state(&BufferDesc::new(4, MemoryUsage::CpuToGpu)),
            ResourceState::GenericRead
        );
        assert_eq!(
            determine_start_state(&BufferDesc::new(4, MemoryUsage::GpuToCpu)),
            ResourceState::CopyDestination
        );
    }

    #[test]
    fn test_start_state_by_usage() {
        let gpu = |usage| BufferDesc::new(4, MemoryUsage::GpuOnly).with_usage(usage);

        assert_eq!(
            determine_start_state(&gpu(BufferUsage::STORAGE | BufferUsage::VERTEX)),
            ResourceState::UnorderedAccess
        );
        assert_eq!(
            determine_start_state(&gpu(BufferUsage::UNIFORM)),
            ResourceState::VertexAndConstantBuffer
        );
        assert_eq!(
            determine_start_state(&gpu(BufferUsage::INDEX)),
            ResourceState::IndexBuffer
        );
        assert_eq!(
            determine_start_state(&gpu(BufferUsage::NONE)),
            ResourceState::ShaderResource
        );
    }

    #[test]
    fn test_load_desc_from_pod() {
        let desc = BufferLoadDesc::from_pod(
            BufferDesc::new(8, MemoryUsage::GpuOnly),
            &[1u32, 2u32],
        );
        assert_eq!(desc.data.as_deref(), Some(&[1, 0, 0, 0, 2, 0, 0, 0][..]));
        assert!(desc.needs_update());
        assert!(!BufferLoadDesc::new(BufferDesc::default()).needs_update());
    }
}
