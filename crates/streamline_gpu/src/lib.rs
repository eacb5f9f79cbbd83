//! # STREAMLINE GPU
//!
//! The narrow slice of a graphics device that the resource loader needs:
//!
//! ```text
//!   Backend ──creates──> GpuBuffer, Fence, Queue, CommandPool
//!                                           │
//!                                           └──> CommandBuffer
//!                                                 copy_buffer / buffer_barrier
//!   Queue::submit(CommandBuffer, Fence) ──> Fence::status() / wait()
//! ```
//!
//! Everything is expressed as traits with associated types, so a loader
//! built over one backend is monomorphised over it. No trait objects and
//! no downcasting.
//!
//! The [`host`] module provides a complete software backend. Copies run on
//! a dedicated timeline thread in submission order, which gives the same
//! asynchrony a real transfer queue has.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod error;
pub mod host;
pub mod traits;
pub mod types;

pub use error::{GpuError, GpuResult};
pub use host::{HostBackend, HostBackendConfig, HostBuffer};
pub use traits::{Backend, CommandBuffer, CommandPool, Fence, GpuBuffer, Queue};
pub use types::{
    BufferBarrier, BufferCreationFlags, BufferDesc, BufferUsage, DeviceLimits, FenceStatus,
    MemoryUsage, QueueDesc, QueueType, ResourceState,
};
