//! # Resource Loader
//!
//! The public face of the streaming engine. Any number of threads may
//! queue work and wait on tokens; one background thread does all the GPU
//! work.
//!
//! ```text
//!   add_resource ─────────┐
//!   end_update_resource ──┼──> RequestQueue ──> "resource-streamer" thread
//!   update_resource ──────┤      (token)             │
//!   transition_buffer ────┘                          ▼
//!                                            CopyEngine ──> Queue::submit
//!   wait_for_token ───> TokenLedger <── advance ── fence retired
//! ```
//!
//! Producers never block on submission: a token is handed back as soon as
//! the request is queued. Work that needs no GPU copy (writes to
//! host-visible buffers) happens on the calling thread and returns
//! [`SyncToken::NONE`], which is always complete.

use crate::config::LoaderConfig;
use crate::desc::{
    determine_start_state, BufferLoadDesc, BufferUpdate, BufferUpdateDesc, LoadedBuffer,
};
use crate::error::{LoaderError, LoaderResult};
use crate::queue::RequestQueue;
use crate::request::{BufferUpload, RequestKind, UpdateRequest, UploadPayload};
use crate::staging::{MappedRange, MappedRangeFlags};
use crate::stats::LoaderStats;
use crate::streamer::Streamer;
use bytemuck::Pod;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use streamline_core::{SyncToken, TokenLedger};
use streamline_gpu::{
    Backend, BufferBarrier, BufferCreationFlags, BufferDesc, GpuBuffer, MemoryUsage,
    ResourceState,
};

/// Asynchronous buffer loader over a [`Backend`].
pub struct ResourceLoader<B: Backend> {
    backend: Arc<B>,
    config: LoaderConfig,
    queue: Arc<RequestQueue<UpdateRequest<B::Buffer>>>,
    ledger: Arc<TokenLedger>,
    stats: Arc<Mutex<LoaderStats>>,
    streamer: Option<JoinHandle<()>>,
}

impl<B: Backend> ResourceLoader<B> {
    /// Validates `config`, creates the resource sets and starts the
    /// streamer thread.
    ///
    /// # Errors
    ///
    /// - [`LoaderError::InvalidConfig`] if `config` fails validation
    /// - a backend error if a resource set cannot be created
    /// - [`LoaderError::Spawn`] if the thread cannot be started
    pub fn new(backend: Arc<B>, config: LoaderConfig) -> LoaderResult<Self> {
        config.validate()?;

        let queue = Arc::new(RequestQueue::new());
        let ledger = Arc::new(TokenLedger::new());
        let stats = Arc::new(Mutex::new(LoaderStats::default()));
        let streamer = Streamer::new(
            Arc::clone(&backend),
            &config,
            Arc::clone(&queue),
            Arc::clone(&ledger),
            Arc::clone(&stats),
        )?;

        let handle = thread::Builder::new()
            .name("resource-streamer".to_string())
            .spawn(move || streamer.run())
            .map_err(|e| LoaderError::Spawn(e.to_string()))?;

        tracing::info!(
            "Resource loader ready: {} sets x {} byte staging rings, {:?} policy",
            config.buffer_count,
            config.staging_buffer_size,
            config.large_upload_policy
        );

        Ok(Self {
            backend,
            config,
            queue,
            ledger,
            stats,
            streamer: Some(handle),
        })
    }

    // ========================================================================
    // REQUESTS
    // ========================================================================

    /// Creates a buffer and queues its initial contents.
    ///
    /// Device-local buffers with data (or `force_reset`) start in
    /// [`ResourceState::Common`] and are filled by a queued copy.
    /// Host-visible buffers are written on the calling thread. Device-local
    /// buffers without data get a queued transition to their start state,
    /// derived from their usage when none was given.
    ///
    /// # Errors
    ///
    /// - [`LoaderError::InvalidRequest`] for a zero-sized buffer, data
    ///   larger than the buffer, or an alignment larger than a staging ring
    /// - [`LoaderError::DeviceLost`] once the loader has failed
    /// - a backend error if the buffer cannot be created
    pub fn add_resource(&self, load: BufferLoadDesc) -> LoaderResult<LoadedBuffer<B>> {
        let BufferLoadDesc {
            mut desc,
            data,
            force_reset,
            alignment,
        } = load;

        if desc.size == 0 {
            return Err(LoaderError::InvalidRequest(format!(
                "buffer '{}' has zero size",
                desc.label
            )));
        }
        if let Some(data) = &data {
            if data.len() as u64 > desc.size {
                return Err(LoaderError::InvalidRequest(format!(
                    "{} bytes of data do not fit buffer '{}' of {} bytes",
                    data.len(),
                    desc.label,
                    desc.size
                )));
            }
        }
        let alignment = self.alignment(alignment)?;
        self.check_alive()?;

        let needs_update = data.is_some() || force_reset;
        let device_local = desc.memory_usage == MemoryUsage::GpuOnly;
        if device_local {
            if needs_update {
                desc.start_state = ResourceState::Common;
            } else if desc.start_state == ResourceState::Undefined {
                desc.start_state = determine_start_state(&desc);
                tracing::warn!(
                    "Buffer '{}' has no start state, using {:?} derived from its usage",
                    desc.label,
                    desc.start_state
                );
            }
        }

        let buffer = self.backend.create_buffer(&desc)?;
        tracing::debug!(
            "Created buffer {} '{}' ({} bytes, {:?})",
            buffer.id(),
            desc.label,
            desc.size,
            desc.memory_usage
        );

        if !device_local {
            if needs_update {
                let range = Self::map_directly(&buffer, 0, desc.size)?;
                if force_reset {
                    range.fill(0, desc.size, 0)?;
                }
                if let Some(data) = &data {
                    range.write(0, data)?;
                }
            }
            return Ok(LoadedBuffer {
                buffer,
                token: SyncToken::NONE,
            });
        }

        let token = if needs_update {
            let mut token = SyncToken::NONE;
            if force_reset {
                let zeroes = UploadPayload::Zeroed(desc.size);
                token = self.enqueue(Self::upload(&buffer, 0, zeroes, alignment))?;
            }
            if let Some(data) = data.filter(|data| !data.is_empty()) {
                let bytes = UploadPayload::Bytes(data);
                token = self.enqueue(Self::upload(&buffer, 0, bytes, alignment))?;
            }
            token
        } else if matches!(
            desc.start_state,
            ResourceState::Undefined | ResourceState::Common
        ) {
            SyncToken::NONE
        } else {
            self.enqueue(RequestKind::BufferBarrier(BufferBarrier {
                buffer: Arc::clone(&buffer),
                old_state: ResourceState::Undefined,
                new_state: desc.start_state,
            }))?
        };

        Ok(LoadedBuffer { buffer, token })
    }

    /// Reserves a CPU-writable range covering part of an existing buffer.
    ///
    /// Host-visible buffers are mapped in place. Device-local buffers get a
    /// temporary upload buffer sized exactly to the range, released after
    /// the copy retires.
    ///
    /// # Errors
    ///
    /// [`LoaderError::InvalidRequest`] if the range leaves the buffer or
    /// the buffer was destroyed, or a backend error if mapping fails.
    pub fn begin_update_resource(
        &self,
        desc: BufferUpdateDesc<B>,
    ) -> LoaderResult<BufferUpdate<B>> {
        let BufferUpdateDesc {
            buffer,
            dst_offset,
            size,
        } = desc;

        if buffer.is_destroyed() {
            return Err(LoaderError::InvalidRequest(format!(
                "buffer {} was destroyed",
                buffer.id()
            )));
        }
        let size = if size == 0 {
            buffer.size().saturating_sub(dst_offset)
        } else {
            size
        };
        Self::check_range(buffer.as_ref(), dst_offset, size)?;

        let range = if buffer.memory_usage().is_cpu_visible() {
            Self::map_directly(&buffer, dst_offset, size)?
        } else {
            let staging = self.backend.create_buffer(
                &BufferDesc::new(size, MemoryUsage::CpuOnly)
                    .with_flags(BufferCreationFlags::PERSISTENT_MAP)
                    .with_label(format!("update-buffer-{}", buffer.id())),
            )?;
            self.stats.lock().temporary_buffers += 1;
            MappedRange::new(staging, 0, size, MappedRangeFlags::TEMPORARY)
        };

        Ok(BufferUpdate {
            buffer,
            dst_offset,
            range,
        })
    }

    /// Publishes a begun update.
    ///
    /// Host-visible destinations were written in place, so this only
    /// releases the mapping and returns [`SyncToken::NONE`]. Device-local
    /// destinations get a queued copy out of the temporary buffer.
    ///
    /// # Errors
    ///
    /// [`LoaderError::DeviceLost`] once the loader has failed.
    pub fn end_update_resource(&self, update: BufferUpdate<B>) -> LoaderResult<SyncToken> {
        let BufferUpdate {
            buffer,
            dst_offset,
            range,
        } = update;

        if !range.flags().contains(MappedRangeFlags::TEMPORARY) {
            drop(range);
            return Ok(SyncToken::NONE);
        }

        self.enqueue(Self::upload(
            &buffer,
            dst_offset,
            UploadPayload::Staged(range),
            self.config.default_alignment,
        ))
    }

    /// Copies `data` into an existing buffer at `desc.dst_offset`.
    ///
    /// `desc.size` must be 0 or the length of `data`. Host-visible
    /// destinations are written immediately and return
    /// [`SyncToken::NONE`].
    ///
    /// # Errors
    ///
    /// [`LoaderError::InvalidRequest`] for an empty or out-of-range update,
    /// [`LoaderError::DeviceLost`] once the loader has failed.
    pub fn update_resource(
        &self,
        desc: BufferUpdateDesc<B>,
        data: Vec<u8>,
    ) -> LoaderResult<SyncToken> {
        let BufferUpdateDesc {
            buffer,
            dst_offset,
            size,
        } = desc;

        let len = data.len() as u64;
        if size != 0 && size != len {
            return Err(LoaderError::InvalidRequest(format!(
                "update declares {size} bytes but carries {len}"
            )));
        }
        if len == 0 {
            return Err(LoaderError::InvalidRequest("zero-sized update".to_string()));
        }
        Self::check_range(buffer.as_ref(), dst_offset, len)?;

        if buffer.memory_usage().is_cpu_visible() {
            Self::map_directly(&buffer, dst_offset, len)?.write(0, &data)?;
            return Ok(SyncToken::NONE);
        }

        self.enqueue(Self::upload(
            &buffer,
            dst_offset,
            UploadPayload::Bytes(data),
            self.config.default_alignment,
        ))
    }

    /// [`ResourceLoader::update_resource`] for a slice of plain-old-data
    /// values.
    ///
    /// # Errors
    ///
    /// Same as [`ResourceLoader::update_resource`].
    pub fn update_resource_pod<T: Pod>(
        &self,
        desc: BufferUpdateDesc<B>,
        values: &[T],
    ) -> LoaderResult<SyncToken> {
        self.update_resource(desc, bytemuck::cast_slice(values).to_vec())
    }

    /// Queues a state transition, ordered after every request queued
    /// before it.
    ///
    /// # Errors
    ///
    /// [`LoaderError::InvalidRequest`] if the buffer was destroyed,
    /// [`LoaderError::DeviceLost`] once the loader has failed.
    pub fn transition_buffer(
        &self,
        buffer: &Arc<B::Buffer>,
        old_state: ResourceState,
        new_state: ResourceState,
    ) -> LoaderResult<SyncToken> {
        if buffer.is_destroyed() {
            return Err(LoaderError::InvalidRequest(format!(
                "buffer {} was destroyed",
                buffer.id()
            )));
        }
        self.enqueue(RequestKind::BufferBarrier(BufferBarrier {
            buffer: Arc::clone(buffer),
            old_state,
            new_state,
        }))
    }

    // ========================================================================
    // TOKENS
    // ========================================================================

    /// Returns true once `token` has retired, successfully or not.
    #[must_use]
    pub fn is_token_completed(&self, token: SyncToken) -> bool {
        self.ledger.is_completed(token)
    }

    /// Blocks until `token` has retired.
    ///
    /// # Errors
    ///
    /// - [`LoaderError::RequestFailed`] if the streamer dropped the request
    /// - [`LoaderError::DeviceLost`] if the loader failed first
    /// - [`LoaderError::TokenNotIssued`] for a token this loader never
    ///   returned
    pub fn wait_for_token(&self, token: SyncToken) -> LoaderResult<()> {
        Ok(self.ledger.wait(token)?)
    }

    /// Like [`ResourceLoader::wait_for_token`], giving up after `timeout`.
    /// Returns `Ok(false)` on timeout.
    ///
    /// # Errors
    ///
    /// Same as [`ResourceLoader::wait_for_token`].
    pub fn wait_for_token_timeout(
        &self,
        token: SyncToken,
        timeout: Duration,
    ) -> LoaderResult<bool> {
        Ok(self.ledger.wait_timeout(token, timeout)?)
    }

    /// Highest token known to have retired.
    #[must_use]
    pub fn last_token_completed(&self) -> SyncToken {
        self.ledger.last_completed()
    }

    /// Highest token handed out so far.
    #[must_use]
    pub fn last_token_issued(&self) -> SyncToken {
        self.ledger.last_issued()
    }

    /// Returns true if every token issued so far has retired.
    #[must_use]
    pub fn all_resource_loads_completed(&self) -> bool {
        self.ledger.all_completed()
    }

    /// Waits for every token issued before the call. Work queued by other
    /// threads during the wait is not covered.
    ///
    /// # Errors
    ///
    /// [`LoaderError::DeviceLost`] if the loader failed first.
    pub fn wait_for_all_resource_loads(&self) -> LoaderResult<()> {
        Ok(self.ledger.wait_all()?)
    }

    // ========================================================================
    // INTROSPECTION
    // ========================================================================

    /// Requests queued but not yet picked up by the streamer.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.queue.len()
    }

    /// Snapshot of the streamer counters.
    #[must_use]
    pub fn stats(&self) -> LoaderStats {
        self.stats.lock().clone()
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// The backend the loader drives.
    #[must_use]
    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    // ========================================================================
    // HELPERS
    // ========================================================================

    fn upload(
        dst: &Arc<B::Buffer>,
        dst_offset: u64,
        payload: UploadPayload<B::Buffer>,
        alignment: u64,
    ) -> RequestKind<B::Buffer> {
        RequestKind::BufferUpload(BufferUpload {
            dst: Arc::clone(dst),
            dst_offset,
            payload,
            alignment,
        })
    }

    fn enqueue(&self, kind: RequestKind<B::Buffer>) -> LoaderResult<SyncToken> {
        self.check_alive()?;
        let token = self
            .queue
            .push_with(&self.ledger, |token| UpdateRequest { token, kind })
            .map_err(|e| match self.ledger.poison_reason() {
                Some(reason) => LoaderError::DeviceLost(reason),
                None => e,
            })?;
        tracing::trace!("Queued request {}", token);
        Ok(token)
    }

    fn check_alive(&self) -> LoaderResult<()> {
        match self.ledger.poison_reason() {
            Some(reason) => Err(LoaderError::DeviceLost(reason)),
            None => Ok(()),
        }
    }

    fn alignment(&self, requested: Option<u64>) -> LoaderResult<u64> {
        let alignment = requested.unwrap_or(self.config.default_alignment);
        if alignment > self.config.staging_buffer_size {
            return Err(LoaderError::InvalidRequest(format!(
                "alignment {alignment} exceeds staging ring of {} bytes",
                self.config.staging_buffer_size
            )));
        }
        Ok(alignment)
    }

    fn check_range(buffer: &B::Buffer, offset: u64, size: u64) -> LoaderResult<()> {
        if size == 0 {
            return Err(LoaderError::InvalidRequest(format!(
                "empty range at {offset} in buffer {}",
                buffer.id()
            )));
        }
        match offset.checked_add(size) {
            Some(end) if end <= buffer.size() => Ok(()),
            _ => Err(LoaderError::InvalidRequest(format!(
                "range {offset}..{offset}+{size} outside buffer {} of {} bytes",
                buffer.id(),
                buffer.size()
            ))),
        }
    }

    /// Takes a map on a host-visible buffer for the life of the range.
    ///
    /// Maps nest, so concurrent ranges on one buffer each release only
    /// their own map.
    fn map_directly(
        buffer: &Arc<B::Buffer>,
        offset: u64,
        size: u64,
    ) -> LoaderResult<MappedRange<B::Buffer>> {
        buffer.map()?;
        Ok(MappedRange::new(
            Arc::clone(buffer),
            offset,
            size,
            MappedRangeFlags::UNMAP_ON_RELEASE,
        ))
    }
}

impl<B: Backend> fmt::Debug for ResourceLoader<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceLoader")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<B: Backend> Drop for ResourceLoader<B> {
    fn drop(&mut self) {
        self.queue.close();
        if let Some(handle) = self.streamer.take() {
            if handle.join().is_err() {
                tracing::error!("Resource streamer thread panicked");
            }
        }
        tracing::info!(
            "Resource loader shut down at {} (issued {})",
            self.ledger.last_completed(),
            self.ledger.last_issued()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use streamline_gpu::{BufferUsage, HostBackend};

    fn loader() -> ResourceLoader<HostBackend> {
        ResourceLoader::new(
            Arc::new(HostBackend::default()),
            LoaderConfig::default().with_staging_buffer_size(1024),
        )
        .unwrap()
    }

    #[test]
    fn test_rejects_invalid_config() {
        let err = ResourceLoader::new(
            Arc::new(HostBackend::default()),
            LoaderConfig::default().with_buffer_count(0),
        )
        .unwrap_err();
        assert!(matches!(err, LoaderError::InvalidConfig(_)));
    }

    #[test]
    fn test_add_resource_uploads_device_local() {
        let loader = loader();
        let loaded = loader
            .add_resource(
                BufferLoadDesc::new(BufferDesc::new(64, MemoryUsage::GpuOnly))
                    .with_data(vec![9; 64]),
            )
            .unwrap();

        assert!(!loaded.token.is_none());
        loader.wait_for_token(loaded.token).unwrap();
        assert_eq!(loaded.buffer.contents(), vec![9; 64]);
        assert_eq!(loaded.buffer.current_state(), ResourceState::Common);
    }

    #[test]
    fn test_add_resource_writes_host_visible_directly() {
        let loader = loader();
        let loaded = loader
            .add_resource(
                BufferLoadDesc::new(BufferDesc::new(8, MemoryUsage::CpuToGpu))
                    .with_data(vec![1, 2, 3]),
            )
            .unwrap();

        assert!(loaded.token.is_none());
        assert!(loader.is_token_completed(loaded.token));
        assert!(!loaded.buffer.is_mapped());
        assert_eq!(loaded.buffer.contents(), vec![1, 2, 3, 0, 0, 0, 0, 0]);
        assert_eq!(loader.last_token_issued(), SyncToken::NONE);
    }

    #[test]
    fn test_add_resource_transitions_to_derived_state() {
        let loader = loader();
        let loaded = loader
            .add_resource(BufferLoadDesc::new(
                BufferDesc::new(16, MemoryUsage::GpuOnly).with_usage(BufferUsage::INDEX),
            ))
            .unwrap();

        loader.wait_for_token(loaded.token).unwrap();
        assert_eq!(loaded.buffer.current_state(), ResourceState::IndexBuffer);
        assert_eq!(loader.stats().barriers, 1);
    }

    #[test]
    fn test_add_resource_force_reset_with_partial_data() {
        let loader = loader();
        let loaded = loader
            .add_resource(
                BufferLoadDesc::new(BufferDesc::new(8, MemoryUsage::GpuOnly))
                    .with_data(vec![7, 7])
                    .with_force_reset(),
            )
            .unwrap();

        loader.wait_for_token(loaded.token).unwrap();
        assert_eq!(loaded.buffer.contents(), vec![7, 7, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_add_resource_rejects_bad_requests() {
        let loader = loader();

        let zero =
            loader.add_resource(BufferLoadDesc::new(BufferDesc::new(0, MemoryUsage::GpuOnly)));
        assert!(matches!(zero, Err(LoaderError::InvalidRequest(_))));

        let oversized = loader.add_resource(
            BufferLoadDesc::new(BufferDesc::new(4, MemoryUsage::GpuOnly)).with_data(vec![0; 5]),
        );
        assert!(matches!(oversized, Err(LoaderError::InvalidRequest(_))));

        let misaligned = loader.add_resource(
            BufferLoadDesc::new(BufferDesc::new(4, MemoryUsage::GpuOnly))
                .with_data(vec![0; 4])
                .with_alignment(4096),
        );
        assert!(matches!(misaligned, Err(LoaderError::InvalidRequest(_))));
        assert_eq!(loader.last_token_issued(), SyncToken::NONE);
    }

    #[test]
    fn test_update_whole_buffer_defaults_to_end() {
        let loader = loader();
        let loaded = loader
            .add_resource(BufferLoadDesc::new(BufferDesc::new(32, MemoryUsage::GpuOnly)))
            .unwrap();

        let update = loader
            .begin_update_resource(BufferUpdateDesc::range(Arc::clone(&loaded.buffer), 8, 0))
            .unwrap();
        assert_eq!(update.size(), 24);
        assert!(update.mapped().flags().contains(MappedRangeFlags::TEMPORARY));
        update.fill(0, 24, 5).unwrap();

        let token = loader.end_update_resource(update).unwrap();
        loader.wait_for_token(token).unwrap();

        let mut expected = vec![0; 8];
        expected.extend(vec![5; 24]);
        assert_eq!(loaded.buffer.contents(), expected);
        assert_eq!(loader.stats().temporary_buffers, 1);
    }

    #[test]
    fn test_begin_update_rejects_out_of_range() {
        let loader = loader();
        let loaded = loader
            .add_resource(BufferLoadDesc::new(BufferDesc::new(16, MemoryUsage::GpuOnly)))
            .unwrap();

        let buffer = &loaded.buffer;
        let past_end =
            loader.begin_update_resource(BufferUpdateDesc::range(Arc::clone(buffer), 16, 0));
        assert!(matches!(past_end, Err(LoaderError::InvalidRequest(_))));

        let too_long =
            loader.begin_update_resource(BufferUpdateDesc::range(Arc::clone(buffer), 8, 9));
        assert!(matches!(too_long, Err(LoaderError::InvalidRequest(_))));
    }

    #[test]
    fn test_wait_on_unissued_token() {
        let loader = loader();
        let err = loader.wait_for_token(SyncToken::from_raw(42)).unwrap_err();
        assert!(matches!(err, LoaderError::TokenNotIssued { .. }));
    }
}
