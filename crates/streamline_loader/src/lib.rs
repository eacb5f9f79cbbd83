//! # STREAMLINE Loader
//!
//! Asynchronous buffer streaming. Application threads queue uploads and
//! state transitions and get a [`SyncToken`] back immediately; one
//! background thread stages the bytes through a ring of resource sets and
//! submits copies to a transfer queue.
//!
//! ## Architecture Rules
//!
//! 1. **Producers never block** - queuing work returns a token at once
//! 2. **One GPU thread** - staging memory and command recording are
//!    touched only by the streamer
//! 3. **Tokens complete in issue order** - a token retires only when its
//!    whole request and everything before it has executed
//! 4. **Staging exhaustion is not an error** - the streamer rotates sets or
//!    splits the upload
//! 5. **Failure is explicit** - dropped requests fail their token, device
//!    loss fails every waiter
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use streamline_gpu::{BufferDesc, HostBackend, MemoryUsage};
//! use streamline_loader::{BufferLoadDesc, LoaderConfig, ResourceLoader};
//!
//! let loader = ResourceLoader::new(Arc::new(HostBackend::default()), LoaderConfig::default())?;
//! let loaded = loader.add_resource(
//!     BufferLoadDesc::new(BufferDesc::new(1024, MemoryUsage::GpuOnly)).with_data(bytes),
//! )?;
//! loader.wait_for_token(loaded.token)?;
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod config;
pub mod desc;
pub mod error;
pub mod loader;
pub mod staging;
pub mod stats;

mod copy_engine;
mod queue;
mod request;
mod streamer;

pub use config::{LargeUploadPolicy, LoaderConfig, MIN_STAGING_BUFFER_SIZE};
pub use desc::{
    determine_start_state, BufferLoadDesc, BufferUpdate, BufferUpdateDesc, LoadedBuffer,
};
pub use error::{LoaderError, LoaderResult};
pub use loader::ResourceLoader;
pub use staging::{MappedRange, MappedRangeFlags};
pub use stats::LoaderStats;
pub use streamline_core::SyncToken;
