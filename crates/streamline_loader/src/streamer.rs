//! # Streamer Thread
//!
//! The single consumer of the request queue and the only owner of the
//! copy engine.
//!
//! ```text
//!   loop:
//!     retire signalled sets (poll, never block)    ──> ledger.advance
//!     pop every queued request
//!       (block; bounded by poll interval while sets are in flight)
//!     for each request, in order:
//!       upload  ─ allocate ─┬─ ok   ─> stage bytes, record copy
//!                           └─ full ─> submit set, rotate, retry
//!       barrier ─ record transition
//!       cover its token in the active set
//!       retire signalled sets (poll)
//!     submit the active set
//! ```
//!
//! An upload larger than a whole ring is copied in ring-sized chunks, one
//! submission per chunk, or through one dedicated temporary buffer
//! depending on [`LargeUploadPolicy`].
//!
//! Malformed requests are dropped, but their token still retires in order
//! and is recorded as failed. Backend failures are fatal: the ledger is
//! poisoned, the queue closed and the thread exits.

use crate::config::{LargeUploadPolicy, LoaderConfig};
use crate::copy_engine::CopyEngine;
use crate::error::LoaderResult;
use crate::queue::{Pop, RequestQueue};
use crate::request::{BufferUpload, RequestKind, UpdateRequest, UploadPayload};
use crate::staging::{MappedRange, MappedRangeFlags};
use crate::stats::LoaderStats;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use streamline_core::TokenLedger;
use streamline_gpu::{
    Backend, BufferBarrier, BufferCreationFlags, BufferDesc, CommandBuffer, GpuBuffer, GpuError,
    MemoryUsage,
};

/// Result of one attempt to stage part of an upload.
enum StageResult {
    /// That many bytes were staged and their copy recorded.
    Copied(u64),
    /// The active ring has no room left.
    StagingBufferFull,
    /// The destination rejected the copy.
    Rejected(String),
}

/// Result of processing one request.
enum UploadOutcome {
    Completed,
    InvalidRequest(String),
}

/// Where the bytes of a ring upload come from.
#[derive(Clone, Copy)]
enum ChunkSource<'a> {
    Bytes(&'a [u8]),
    Zeroes,
}

impl ChunkSource<'_> {
    /// Writes payload bytes `from..from + range.size()` into `range`.
    #[allow(clippy::cast_possible_truncation)]
    fn stage<B: GpuBuffer>(self, range: &MappedRange<B>, from: u64) -> LoaderResult<()> {
        match self {
            Self::Bytes(bytes) => {
                // Payload lengths came from a Vec, so they fit in usize.
                let start = from as usize;
                let end = start + range.size() as usize;
                range.write(0, &bytes[start..end])
            }
            Self::Zeroes => range.fill(0, range.size(), 0),
        }
    }
}

/// Everything the streamer thread owns.
pub(crate) struct Streamer<B: Backend> {
    backend: Arc<B>,
    engine: CopyEngine<B>,
    queue: Arc<RequestQueue<UpdateRequest<B::Buffer>>>,
    ledger: Arc<TokenLedger>,
    stats: Arc<Mutex<LoaderStats>>,
    policy: LargeUploadPolicy,
    poll_interval: Duration,
}

impl<B: Backend> Streamer<B> {
    /// Creates the copy engine's GPU objects on the calling thread.
    pub(crate) fn new(
        backend: Arc<B>,
        config: &LoaderConfig,
        queue: Arc<RequestQueue<UpdateRequest<B::Buffer>>>,
        ledger: Arc<TokenLedger>,
        stats: Arc<Mutex<LoaderStats>>,
    ) -> LoaderResult<Self> {
        let engine = CopyEngine::new(
            backend.as_ref(),
            config,
            Arc::clone(&ledger),
            Arc::clone(&stats),
        )?;

        Ok(Self {
            backend,
            engine,
            queue,
            ledger,
            stats,
            policy: config.large_upload_policy,
            poll_interval: config.fence_poll_interval(),
        })
    }

    /// Thread entry point.
    pub(crate) fn run(mut self) {
        tracing::info!(
            "Resource streamer started on '{}' ({} sets x {} bytes)",
            self.backend.name(),
            self.engine.set_count(),
            self.engine.ring_capacity()
        );

        match self.stream() {
            Ok(()) => tracing::info!(
                "Resource streamer stopped, all tokens up to {} complete",
                self.ledger.last_completed()
            ),
            Err(e) => {
                tracing::error!("Resource streamer stopped: {}", e);
                self.ledger.poison(e.to_string());
                self.queue.close();
                if let Pop::Batch(dropped) = self.queue.pop_all(Some(Duration::ZERO)) {
                    tracing::warn!("Dropped {} queued requests after failure", dropped.len());
                }
            }
        }
    }

    fn stream(&mut self) -> LoaderResult<()> {
        loop {
            self.engine.retire_completed();

            let timeout = self.engine.has_in_flight().then_some(self.poll_interval);
            match self.queue.pop_all(timeout) {
                Pop::Batch(batch) => self.process_batch(batch)?,
                Pop::TimedOut => {}
                Pop::Closed => {
                    self.engine.flush()?;
                    self.engine.wait_idle()?;
                    return Ok(());
                }
            }
        }
    }

    /// Records a dequeued batch and submits it.
    ///
    /// Sets that signal while the batch is being recorded are retired
    /// between requests.
    fn process_batch(&mut self, batch: Vec<UpdateRequest<B::Buffer>>) -> LoaderResult<()> {
        tracing::trace!("Streamer dequeued {} requests", batch.len());
        for request in batch {
            self.process(request)?;
            self.engine.retire_completed();
        }
        self.engine.flush()?;
        Ok(())
    }

    fn process(&mut self, request: UpdateRequest<B::Buffer>) -> LoaderResult<()> {
        tracing::trace!("Processing {:?}", request);
        let UpdateRequest { token, kind } = request;
        self.stats.lock().requests_processed += 1;

        let outcome = match kind {
            RequestKind::BufferUpload(upload) => self.upload(upload)?,
            RequestKind::BufferBarrier(barrier) => self.barrier(&barrier)?,
        };
        if let UploadOutcome::InvalidRequest(reason) = outcome {
            tracing::warn!("Dropping request {}: {}", token, reason);
            self.ledger.record_failure(token, reason);
            self.stats.lock().invalid_requests += 1;
        }

        self.engine.active_set()?.cover(token);
        Ok(())
    }

    fn barrier(&mut self, barrier: &BufferBarrier<B::Buffer>) -> LoaderResult<UploadOutcome> {
        if barrier.buffer.is_destroyed() {
            return Ok(UploadOutcome::InvalidRequest(format!(
                "barrier on destroyed buffer {}",
                barrier.buffer.id()
            )));
        }

        let set = self.engine.active_set()?;
        match set.commands().buffer_barrier(barrier) {
            Ok(()) => {
                self.stats.lock().barriers += 1;
                Ok(UploadOutcome::Completed)
            }
            Err(e @ GpuError::Destroyed { .. }) => Ok(UploadOutcome::InvalidRequest(e.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    fn upload(&mut self, upload: BufferUpload<B::Buffer>) -> LoaderResult<UploadOutcome> {
        let BufferUpload {
            dst,
            dst_offset,
            payload,
            alignment,
        } = upload;

        let len = payload.len();
        if let Some(reason) = Self::validate_upload(dst.as_ref(), dst_offset, len) {
            return Ok(UploadOutcome::InvalidRequest(reason));
        }

        let outcome = match payload {
            UploadPayload::Staged(range) => self.upload_staged(&dst, dst_offset, range)?,
            UploadPayload::Bytes(bytes) => {
                self.upload_buffered(&dst, dst_offset, ChunkSource::Bytes(&bytes), len, alignment)?
            }
            UploadPayload::Zeroed(len) => {
                self.upload_buffered(&dst, dst_offset, ChunkSource::Zeroes, len, alignment)?
            }
        };

        if matches!(outcome, UploadOutcome::Completed) {
            let mut stats = self.stats.lock();
            stats.uploads += 1;
            stats.bytes_uploaded += len;
        }
        Ok(outcome)
    }

    fn validate_upload(dst: &B::Buffer, dst_offset: u64, len: u64) -> Option<String> {
        if dst.is_destroyed() {
            return Some(format!("destination buffer {} was destroyed", dst.id()));
        }
        if len == 0 {
            return Some("zero-sized upload".to_string());
        }
        match dst_offset.checked_add(len) {
            Some(end) if end <= dst.size() => None,
            _ => Some(format!(
                "upload {dst_offset}..{dst_offset}+{len} outside buffer {} of {} bytes",
                dst.id(),
                dst.size()
            )),
        }
    }

    /// Records a copy out of a temporary buffer the caller already filled.
    fn upload_staged(
        &mut self,
        dst: &Arc<B::Buffer>,
        dst_offset: u64,
        range: MappedRange<B::Buffer>,
    ) -> LoaderResult<UploadOutcome> {
        let set = self.engine.active_set()?;
        let recorded = set.commands().copy_buffer(
            range.buffer(),
            range.offset(),
            dst,
            dst_offset,
            range.size(),
        );
        if let Some(reason) = Self::rejection(recorded)? {
            return Ok(UploadOutcome::InvalidRequest(reason));
        }

        set.keep_alive(range);
        Ok(UploadOutcome::Completed)
    }

    /// Stages bytes through the ring, splitting if necessary, or through a
    /// dedicated buffer when the policy asks for it.
    fn upload_buffered(
        &mut self,
        dst: &Arc<B::Buffer>,
        dst_offset: u64,
        source: ChunkSource<'_>,
        len: u64,
        alignment: u64,
    ) -> LoaderResult<UploadOutcome> {
        let capacity = self.engine.ring_capacity();
        if len > capacity && self.policy == LargeUploadPolicy::DedicatedBuffer {
            return self.upload_dedicated(dst, dst_offset, source, len);
        }

        let mut copied = 0;
        let mut chunks = 0u64;
        while copied < len {
            match self.stage_chunk(dst, dst_offset, source, copied, len, alignment)? {
                StageResult::Copied(bytes) => {
                    copied += bytes;
                    chunks += 1;
                }
                StageResult::StagingBufferFull => {
                    tracing::debug!(
                        "Staging ring full with {} of {} bytes left, rotating",
                        len - copied,
                        len
                    );
                    self.engine.flush()?;
                    self.stats.lock().staging_full_rotations += 1;
                }
                StageResult::Rejected(reason) => return Ok(UploadOutcome::InvalidRequest(reason)),
            }
        }

        if chunks > 1 {
            self.stats.lock().split_chunks += chunks;
        }
        Ok(UploadOutcome::Completed)
    }

    /// Stages the next part of an upload into the active ring.
    fn stage_chunk(
        &mut self,
        dst: &Arc<B::Buffer>,
        dst_offset: u64,
        source: ChunkSource<'_>,
        copied: u64,
        len: u64,
        alignment: u64,
    ) -> LoaderResult<StageResult> {
        let capacity = self.engine.ring_capacity();
        let remaining = len - copied;
        let set = self.engine.active_set()?;

        // Anything that fits a whole ring is staged in one piece; only
        // oversized uploads take whatever the ring has left.
        let exact = remaining <= capacity && !set.is_fresh();
        let Some(range) = set.allocate(remaining, alignment, exact) else {
            return Ok(StageResult::StagingBufferFull);
        };

        source.stage(&range, copied)?;
        let recorded = set.commands().copy_buffer(
            range.buffer(),
            range.offset(),
            dst,
            dst_offset + copied,
            range.size(),
        );
        if let Some(reason) = Self::rejection(recorded)? {
            return Ok(StageResult::Rejected(reason));
        }

        self.stats.lock().staging_allocations += 1;
        Ok(StageResult::Copied(range.size()))
    }

    fn upload_dedicated(
        &mut self,
        dst: &Arc<B::Buffer>,
        dst_offset: u64,
        source: ChunkSource<'_>,
        len: u64,
    ) -> LoaderResult<UploadOutcome> {
        let buffer = self.backend.create_buffer(
            &BufferDesc::new(len, MemoryUsage::CpuOnly)
                .with_flags(BufferCreationFlags::PERSISTENT_MAP)
                .with_label("loader-dedicated-upload"),
        )?;
        let range = MappedRange::new(buffer, 0, len, MappedRangeFlags::TEMPORARY);
        source.stage(&range, 0)?;
        tracing::debug!("Staging {} bytes through a dedicated buffer", len);

        let set = self.engine.active_set()?;
        let recorded = set
            .commands()
            .copy_buffer(range.buffer(), 0, dst, dst_offset, len);
        if let Some(reason) = Self::rejection(recorded)? {
            return Ok(UploadOutcome::InvalidRequest(reason));
        }

        set.keep_alive(range);
        self.stats.lock().dedicated_buffers += 1;
        Ok(UploadOutcome::Completed)
    }

    /// Splits recording errors into request rejections and fatal errors.
    fn rejection(recorded: Result<(), GpuError>) -> LoaderResult<Option<String>> {
        match recorded {
            Ok(()) => Ok(None),
            Err(e @ (GpuError::Destroyed { .. } | GpuError::OutOfBounds { .. })) => {
                Ok(Some(e.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}
