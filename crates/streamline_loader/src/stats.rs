//! Streamer counters.

/// Statistics collected by the streamer thread.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoaderStats {
    /// Requests taken off the queue.
    pub requests_processed: u64,
    /// Upload requests recorded.
    pub uploads: u64,
    /// Barrier requests recorded.
    pub barriers: u64,
    /// Requests dropped as invalid.
    pub invalid_requests: u64,
    /// Payload bytes copied into destination buffers.
    pub bytes_uploaded: u64,
    /// Ranges carved from staging rings.
    pub staging_allocations: u64,
    /// Ring-sized chunks recorded for uploads larger than one ring.
    pub split_chunks: u64,
    /// Temporary buffers created for uploads larger than one ring.
    pub dedicated_buffers: u64,
    /// Temporary buffers created by `begin_update_resource`.
    pub temporary_buffers: u64,
    /// Command buffers submitted.
    pub submissions: u64,
    /// Resource set rotations forced by a full staging ring.
    pub staging_full_rotations: u64,
    /// Times the streamer blocked on an in-flight set's fence.
    pub fence_stalls: u64,
    /// Resource sets retired after their fence signalled.
    pub sets_retired: u64,
}

impl LoaderStats {
    /// Average payload bytes per submission.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn avg_bytes_per_submission(&self) -> f64 {
        if self.submissions == 0 {
            0.0
        } else {
            self.bytes_uploaded as f64 / self.submissions as f64
        }
    }
}
