//! Requests travelling from producer threads to the streamer.

use crate::staging::MappedRange;
use std::fmt;
use std::sync::Arc;
use streamline_core::SyncToken;
use streamline_gpu::{BufferBarrier, GpuBuffer};

/// Bytes to place in a destination buffer.
pub(crate) enum UploadPayload<B: GpuBuffer> {
    /// Owned bytes, staged through the ring.
    Bytes(Vec<u8>),
    /// That many zero bytes, staged through the ring.
    Zeroed(u64),
    /// Bytes already written by the caller into a temporary buffer.
    Staged(MappedRange<B>),
}

impl<B: GpuBuffer> UploadPayload<B> {
    pub(crate) fn len(&self) -> u64 {
        match self {
            Self::Bytes(bytes) => bytes.len() as u64,
            Self::Zeroed(len) => *len,
            Self::Staged(range) => range.size(),
        }
    }
}

/// Copy of a payload into `dst` at `dst_offset`.
pub(crate) struct BufferUpload<B: GpuBuffer> {
    pub(crate) dst: Arc<B>,
    pub(crate) dst_offset: u64,
    pub(crate) payload: UploadPayload<B>,
    pub(crate) alignment: u64,
}

/// What a request asks the streamer to do.
pub(crate) enum RequestKind<B: GpuBuffer> {
    BufferUpload(BufferUpload<B>),
    BufferBarrier(BufferBarrier<B>),
}

/// A queued request and the token that completes with it.
pub(crate) struct UpdateRequest<B: GpuBuffer> {
    pub(crate) token: SyncToken,
    pub(crate) kind: RequestKind<B>,
}

impl<B: GpuBuffer> fmt::Debug for UpdateRequest<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            RequestKind::BufferUpload(upload) => f
                .debug_struct("BufferUpload")
                .field("token", &self.token)
                .field("dst", &upload.dst.id())
                .field("dst_offset", &upload.dst_offset)
                .field("len", &upload.payload.len())
                .finish(),
            RequestKind::BufferBarrier(barrier) => f
                .debug_struct("BufferBarrier")
                .field("token", &self.token)
                .field("buffer", &barrier.buffer.id())
                .field("old_state", &barrier.old_state)
                .field("new_state", &barrier.new_state)
                .finish(),
        }
    }
}
