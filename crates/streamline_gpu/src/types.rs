//! # Descriptor Types
//!
//! Plain data shared by every backend: where a buffer lives, how it is
//! used, which state it is in.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::sync::Arc;

/// Which memory heap a buffer lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum MemoryUsage {
    /// Device-local. Not reachable from the CPU; filled through copies.
    #[default]
    GpuOnly,
    /// Host memory, used for staging.
    CpuOnly,
    /// Host-visible memory read by the device.
    CpuToGpu,
    /// Host-visible memory written by the device (readback).
    GpuToCpu,
}

impl MemoryUsage {
    /// Returns true if the CPU can map buffers in this heap.
    #[inline]
    #[must_use]
    pub const fn is_cpu_visible(self) -> bool {
        !matches!(self, Self::GpuOnly)
    }
}

/// Resource states tracked for barriers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum ResourceState {
    /// Contents are undefined; matches any previous state.
    #[default]
    Undefined,
    /// Generic state usable by every queue.
    Common,
    /// Bound as vertex or uniform data.
    VertexAndConstantBuffer,
    /// Bound as index data.
    IndexBuffer,
    /// Read/write shader access.
    UnorderedAccess,
    /// Read-only shader access.
    ShaderResource,
    /// Source of indirect draw arguments.
    IndirectArgument,
    /// Source of a copy.
    CopySource,
    /// Destination of a copy.
    CopyDestination,
    /// Any read on a host-visible heap.
    GenericRead,
}

macro_rules! flag_set {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$fmeta:meta])* $flag:ident = $bit:expr, )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
        pub struct $name(u32);

        impl $name {
            /// No flags set.
            pub const NONE: Self = Self(0);
            $( $(#[$fmeta])* pub const $flag: Self = Self($bit); )*

            /// Returns the raw bits.
            #[inline]
            #[must_use]
            pub const fn bits(self) -> u32 {
                self.0
            }

            /// Returns true if every flag in `other` is set.
            #[inline]
            #[must_use]
            pub const fn contains(self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }

            /// Returns true if any flag in `other` is set.
            #[inline]
            #[must_use]
            pub const fn intersects(self, other: Self) -> bool {
                self.0 & other.0 != 0
            }

            /// Returns true if no flag is set.
            #[inline]
            #[must_use]
            pub const fn is_empty(self) -> bool {
                self.0 == 0
            }
        }

        impl BitOr for $name {
            type Output = Self;

            fn bitor(self, rhs: Self) -> Self {
                Self(self.0 | rhs.0)
            }
        }

        impl BitOrAssign for $name {
            fn bitor_assign(&mut self, rhs: Self) {
                self.0 |= rhs.0;
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let mut set = f.debug_set();
                $( if self.contains(Self::$flag) { set.entry(&stringify!($flag)); } )*
                set.finish()
            }
        }
    };
}

flag_set! {
    /// How a buffer will be bound.
    BufferUsage {
        /// Uniform (constant) buffer.
        UNIFORM = 1 << 0,
        /// Storage buffer with read/write shader access.
        STORAGE = 1 << 1,
        /// Vertex buffer.
        VERTEX = 1 << 2,
        /// Index buffer.
        INDEX = 1 << 3,
        /// Indirect argument buffer.
        INDIRECT = 1 << 4,
    }
}

flag_set! {
    /// Creation-time buffer options.
    BufferCreationFlags {
        /// Map once at creation and keep mapped until destroyed.
        PERSISTENT_MAP = 1 << 0,
        /// Request a dedicated allocation.
        OWN_MEMORY = 1 << 1,
        /// Skip default descriptor views.
        NO_DESCRIPTOR_VIEW = 1 << 2,
    }
}

/// Everything needed to create a buffer.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct BufferDesc {
    /// Debug name.
    pub label: String,
    /// Size in bytes. Must be non-zero.
    pub size: u64,
    /// Heap the buffer lives in.
    pub memory_usage: MemoryUsage,
    /// Creation options.
    pub flags: BufferCreationFlags,
    /// Binding usage.
    pub usage: BufferUsage,
    /// State the buffer is in once created.
    pub start_state: ResourceState,
}

impl BufferDesc {
    /// Creates a descriptor with no usage flags in the undefined state.
    #[must_use]
    pub fn new(size: u64, memory_usage: MemoryUsage) -> Self {
        Self {
            size,
            memory_usage,
            ..Self::default()
        }
    }

    /// Sets the debug name.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Sets the binding usage.
    #[must_use]
    pub fn with_usage(mut self, usage: BufferUsage) -> Self {
        self.usage = usage;
        self
    }

    /// Sets the creation flags.
    #[must_use]
    pub fn with_flags(mut self, flags: BufferCreationFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Sets the start state.
    #[must_use]
    pub fn with_start_state(mut self, state: ResourceState) -> Self {
        self.start_state = state;
        self
    }
}

/// A state transition of one buffer.
#[derive(Debug)]
pub struct BufferBarrier<B> {
    /// The buffer being transitioned.
    pub buffer: Arc<B>,
    /// State the buffer is expected to be in.
    pub old_state: ResourceState,
    /// State the buffer ends up in.
    pub new_state: ResourceState,
}

impl<B> Clone for BufferBarrier<B> {
    fn clone(&self) -> Self {
        Self {
            buffer: Arc::clone(&self.buffer),
            old_state: self.old_state,
            new_state: self.new_state,
        }
    }
}

/// Queue families.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum QueueType {
    /// Graphics, compute and transfer.
    Graphics,
    /// Compute and transfer.
    Compute,
    /// Transfer only.
    #[default]
    Transfer,
}

/// Everything needed to create a queue.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct QueueDesc {
    /// Debug name.
    pub label: String,
    /// Queue family.
    pub queue_type: QueueType,
}

/// Completion state of a fence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FenceStatus {
    /// Never submitted. Treated as complete by waiters.
    NotSubmitted,
    /// Submitted work is still executing.
    Incomplete,
    /// Submitted work has finished.
    Complete,
}

impl FenceStatus {
    /// Returns true unless work is still executing.
    #[inline]
    #[must_use]
    pub const fn is_signaled(self) -> bool {
        !matches!(self, Self::Incomplete)
    }
}

/// Alignment requirements reported by a device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceLimits {
    /// Minimum alignment of a buffer-to-buffer copy source offset.
    pub upload_buffer_alignment: u64,
    /// Minimum alignment of a buffer-to-texture copy source offset.
    pub upload_texture_alignment: u64,
    /// Minimum offset alignment for uniform buffer bindings.
    pub uniform_buffer_alignment: u64,
    /// Minimum offset alignment for storage buffer bindings.
    pub storage_buffer_alignment: u64,
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self {
            upload_buffer_alignment: 4,
            upload_texture_alignment: 512,
            uniform_buffer_alignment: 256,
            storage_buffer_alignment: 16,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_operations() {
        let usage = BufferUsage::VERTEX | BufferUsage::INDEX;

        assert!(usage.contains(BufferUsage::VERTEX));
        assert!(!usage.contains(BufferUsage::VERTEX | BufferUsage::STORAGE));
        assert!(usage.intersects(BufferUsage::INDEX | BufferUsage::STORAGE));
        assert!(BufferUsage::NONE.is_empty());
        assert_eq!(format!("{usage:?}"), r#"{"VERTEX", "INDEX"}"#);
    }

    #[test]
    fn test_memory_usage_visibility() {
        assert!(!MemoryUsage::GpuOnly.is_cpu_visible());
        assert!(MemoryUsage::CpuOnly.is_cpu_visible());
        assert!(MemoryUsage::CpuToGpu.is_cpu_visible());
        assert!(MemoryUsage::GpuToCpu.is_cpu_visible());
    }

    #[test]
    fn test_fence_status_signaled() {
        assert!(FenceStatus::NotSubmitted.is_signaled());
        assert!(FenceStatus::Complete.is_signaled());
        assert!(!FenceStatus::Incomplete.is_signaled());
    }

    #[test]
    fn test_buffer_desc_builder() {
        let desc = BufferDesc::new(64, MemoryUsage::GpuOnly)
            .with_label("vertices")
            .with_usage(BufferUsage::VERTEX)
            .with_start_state(ResourceState::Common);

        assert_eq!(desc.size, 64);
        assert_eq!(desc.label, "vertices");
        assert_eq!(desc.start_state, ResourceState::Common);
        assert!(desc.flags.is_empty());
    }
}
