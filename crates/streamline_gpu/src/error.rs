//! # GPU Error Types
//!
//! All errors a backend can report.

use thiserror::Error;

/// Errors that can occur in a GPU backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GpuError {
    /// The device stopped responding. Nothing submitted afterwards runs.
    #[error("device lost: {0}")]
    DeviceLost(String),

    /// The buffer lives in memory the CPU cannot see.
    #[error("buffer {buffer} is not host-visible and cannot be mapped")]
    NotMappable {
        /// Buffer id.
        buffer: u64,
    },

    /// A mapped access was attempted on an unmapped buffer.
    #[error("buffer {buffer} is not mapped")]
    NotMapped {
        /// Buffer id.
        buffer: u64,
    },

    /// An access reached past the end of a buffer.
    #[error("range {offset}..{offset}+{len} is outside buffer {buffer} of {size} bytes")]
    OutOfBounds {
        /// Buffer id.
        buffer: u64,
        /// Start of the access.
        offset: u64,
        /// Length of the access.
        len: u64,
        /// Size of the buffer.
        size: u64,
    },

    /// The buffer was destroyed.
    #[error("buffer {buffer} has been destroyed")]
    Destroyed {
        /// Buffer id.
        buffer: u64,
    },

    /// A command was recorded outside `begin`/`end`.
    #[error("command buffer is not recording")]
    NotRecording,

    /// A command buffer was submitted or begun while still recording.
    #[error("command buffer is still recording")]
    StillRecording,

    /// A fence was submitted again before its previous work completed.
    #[error("fence is still in flight")]
    FenceInUse,

    /// A descriptor was rejected.
    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(String),

    /// Backend-specific failure.
    #[error("backend failure: {0}")]
    Backend(String),
}

/// Result type for backend operations.
pub type GpuResult<T> = Result<T, GpuError>;

impl GpuError {
    /// Returns true if the error means the device can no longer make
    /// progress.
    #[must_use]
    pub const fn is_device_lost(&self) -> bool {
        matches!(self, Self::DeviceLost(_))
    }
}
