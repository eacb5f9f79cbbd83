//! # Mapped Ranges
//!
//! A [`MappedRange`] is a CPU-writable window into a mapped buffer. The
//! copy engine hands them out from its staging rings, and
//! [`crate::ResourceLoader::begin_update_resource`] hands them to callers.
//!
//! Release is tied to ownership. When a range is dropped:
//! - `TEMPORARY` ranges destroy their backing buffer
//! - `UNMAP_ON_RELEASE` ranges unmap it
//! - plain ring ranges do nothing; the ring is rewound when its fence
//!   retires

use crate::error::{LoaderError, LoaderResult};
use bytemuck::Pod;
use std::fmt;
use std::ops::BitOr;
use std::sync::Arc;
use streamline_gpu::GpuBuffer;

/// Release behaviour of a [`MappedRange`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MappedRangeFlags(u8);

impl MappedRangeFlags {
    /// Nothing to do on release.
    pub const NONE: Self = Self(0);
    /// The range mapped its buffer and unmaps it on release.
    pub const UNMAP_ON_RELEASE: Self = Self(1 << 0);
    /// The backing buffer exists only for this range.
    pub const TEMPORARY: Self = Self(1 << 1);

    /// Returns true if every flag in `other` is set.
    #[inline]
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for MappedRangeFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for MappedRangeFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut set = f.debug_set();
        if self.contains(Self::UNMAP_ON_RELEASE) {
            set.entry(&"UNMAP_ON_RELEASE");
        }
        if self.contains(Self::TEMPORARY) {
            set.entry(&"TEMPORARY");
        }
        set.finish()
    }
}

/// A CPU-writable byte range of a mapped buffer.
pub struct MappedRange<B: GpuBuffer> {
    buffer: Arc<B>,
    offset: u64,
    size: u64,
    flags: MappedRangeFlags,
}

impl<B: GpuBuffer> fmt::Debug for MappedRange<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappedRange")
            .field("buffer", &self.buffer.id())
            .field("offset", &self.offset)
            .field("size", &self.size)
            .field("flags", &self.flags)
            .finish()
    }
}

impl<B: GpuBuffer> MappedRange<B> {
    pub(crate) fn new(buffer: Arc<B>, offset: u64, size: u64, flags: MappedRangeFlags) -> Self {
        Self {
            buffer,
            offset,
            size,
            flags,
        }
    }

    /// The backing buffer.
    #[must_use]
    pub fn buffer(&self) -> &Arc<B> {
        &self.buffer
    }

    /// Offset of the range within the backing buffer.
    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    /// Length of the range in bytes.
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.size
    }

    /// Release behaviour.
    #[must_use]
    pub const fn flags(&self) -> MappedRangeFlags {
        self.flags
    }

    /// Copies `bytes` into the range at `at` (relative to the range).
    ///
    /// # Errors
    ///
    /// [`LoaderError::InvalidRequest`] if the write leaves the range, or a
    /// backend error if the buffer is no longer mapped.
    pub fn write(&self, at: u64, bytes: &[u8]) -> LoaderResult<()> {
        self.check(at, bytes.len() as u64)?;
        self.buffer.write_mapped(self.offset + at, bytes)?;
        Ok(())
    }

    /// Copies a slice of plain-old-data values into the range at `at`.
    ///
    /// # Errors
    ///
    /// Same as [`MappedRange::write`].
    pub fn write_pod<T: Pod>(&self, at: u64, values: &[T]) -> LoaderResult<()> {
        self.write(at, bytemuck::cast_slice(values))
    }

    /// Sets `len` bytes at `at` to `value`.
    ///
    /// # Errors
    ///
    /// Same as [`MappedRange::write`].
    pub fn fill(&self, at: u64, len: u64, value: u8) -> LoaderResult<()> {
        self.check(at, len)?;
        self.buffer.fill_mapped(self.offset + at, len, value)?;
        Ok(())
    }

    /// Reads back bytes at `at` into `out`.
    ///
    /// # Errors
    ///
    /// Same as [`MappedRange::write`].
    pub fn read(&self, at: u64, out: &mut [u8]) -> LoaderResult<()> {
        self.check(at, out.len() as u64)?;
        self.buffer.read_mapped(self.offset + at, out)?;
        Ok(())
    }

    fn check(&self, at: u64, len: u64) -> LoaderResult<()> {
        match at.checked_add(len) {
            Some(end) if end <= self.size => Ok(()),
            _ => Err(LoaderError::InvalidRequest(format!(
                "access {at}..{at}+{len} outside mapped range of {} bytes",
                self.size
            ))),
        }
    }
}

impl<B: GpuBuffer> Drop for MappedRange<B> {
    fn drop(&mut self) {
        if self.flags.contains(MappedRangeFlags::TEMPORARY) {
            self.buffer.destroy();
        } else if self.flags.contains(MappedRangeFlags::UNMAP_ON_RELEASE) {
            if let Err(e) = self.buffer.unmap() {
                tracing::warn!("Failed to unmap buffer {}: {}", self.buffer.id(), e);
            }
        }
    }
}
