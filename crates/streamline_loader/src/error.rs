//! # Loader Error Types
//!
//! Staging exhaustion never shows up here: it is handled internally by
//! rotating resource sets or splitting the upload.

use streamline_core::{LedgerError, SyncToken};
use streamline_gpu::GpuError;
use thiserror::Error;

/// Errors reported by the resource loader.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoaderError {
    /// The loader configuration was rejected.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A request was malformed and was not queued.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The request was queued but dropped by the streamer.
    #[error("request {token} failed: {reason}")]
    RequestFailed {
        /// Token of the dropped request.
        token: SyncToken,
        /// Why it was dropped.
        reason: String,
    },

    /// The device failed; the loader stopped for good.
    #[error("device lost: {0}")]
    DeviceLost(String),

    /// The token was never issued by this loader.
    #[error("{token} was never issued (last issued: {last_issued})")]
    TokenNotIssued {
        /// The token that was waited on.
        token: SyncToken,
        /// Highest token issued at the time of the wait.
        last_issued: SyncToken,
    },

    /// The loader is shutting down and refuses new work.
    #[error("resource loader is shut down")]
    ShutDown,

    /// The backend rejected an operation.
    #[error("gpu error: {0}")]
    Gpu(#[source] GpuError),

    /// The streamer thread could not be started.
    #[error("failed to spawn streamer thread: {0}")]
    Spawn(String),
}

/// Result type for loader operations.
pub type LoaderResult<T> = Result<T, LoaderError>;

impl LoaderError {
    /// Returns true if the loader can no longer make progress.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::DeviceLost(_))
    }
}

impl From<GpuError> for LoaderError {
    fn from(error: GpuError) -> Self {
        match error {
            GpuError::DeviceLost(reason) => Self::DeviceLost(reason),
            other => Self::Gpu(other),
        }
    }
}

impl From<LedgerError> for LoaderError {
    fn from(error: LedgerError) -> Self {
        match error {
            LedgerError::NotIssued { token, last_issued } => {
                Self::TokenNotIssued { token, last_issued }
            }
            LedgerError::Failed { token, reason } => Self::RequestFailed { token, reason },
            LedgerError::Poisoned(reason) => Self::DeviceLost(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_loss_maps_to_fatal() {
        let err = LoaderError::from(GpuError::DeviceLost("hung".to_string()));
        assert!(err.is_fatal());

        let err = LoaderError::from(LedgerError::Poisoned("hung".to_string()));
        assert_eq!(err, LoaderError::DeviceLost("hung".to_string()));
    }

    #[test]
    fn test_other_gpu_errors_wrap() {
        let err = LoaderError::from(GpuError::NotRecording);
        assert_eq!(err, LoaderError::Gpu(GpuError::NotRecording));
        assert!(!err.is_fatal());
    }
}
