//! # STREAMLINE
//!
//! Asynchronous GPU resource streaming.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                            STREAMLINE                             │
//! ├───────────────────────────────────────────────────────────────────┤
//! │                                                                   │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐  │
//! │  │ streamline_core │   │ streamline_gpu  │   │streamline_loader│  │
//! │  │                 │   │                 │   │                 │  │
//! │  │ • StagingArena  │──>│ • Backend traits│──>│ • RequestQueue  │  │
//! │  │ • TokenLedger   │   │ • Host backend  │   │ • CopyEngine    │  │
//! │  │ • SyncToken     │   │ • Descriptors   │   │ • Streamer      │  │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘  │
//! │                                                                   │
//! └───────────────────────────────────────────────────────────────────┘
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub use streamline_core as core;
pub use streamline_gpu as gpu;
pub use streamline_loader as loader;

pub use streamline_core::{StagingArena, SyncToken, TokenLedger};
pub use streamline_gpu::{
    Backend, BufferDesc, BufferUsage, GpuBuffer, HostBackend, HostBackendConfig, MemoryUsage,
    ResourceState,
};
pub use streamline_loader::{
    BufferLoadDesc, BufferUpdate, BufferUpdateDesc, LargeUploadPolicy, LoadedBuffer,
    LoaderConfig, LoaderError, LoaderResult, LoaderStats, ResourceLoader,
};
