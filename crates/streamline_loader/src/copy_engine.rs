//! # Copy Engine
//!
//! A ring of resource sets, each able to record and submit one batch of
//! copies:
//!
//! ```text
//!            next
//!             │
//!   ┌─────────▼───────┐ ┌─────────────────┐ ┌─────────────────┐
//!   │ set 0: active   │ │ set 1: in flight│ │ set 2: idle     │
//!   │ cmd recording   │ │ fence armed     │ │ fence signalled │
//!   │ arena [####--]  │ │ arena [######]  │ │ arena [------]  │
//!   └─────────────────┘ └─────────────────┘ └─────────────────┘
//! ```
//!
//! Sets are activated round robin. Reusing a set that is still in flight
//! first waits on its fence (bounded by the fence timeout). A set's arena
//! is rewound and its temporary buffers released only after its fence has
//! been observed signalled, and the ledger is advanced to the highest
//! token recorded in it at the same moment.
//!
//! Only the streamer thread owns a `CopyEngine`.

use crate::config::LoaderConfig;
use crate::error::{LoaderError, LoaderResult};
use crate::staging::{MappedRange, MappedRangeFlags};
use crate::stats::LoaderStats;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use streamline_core::{StagingArena, SyncToken, TokenLedger};
use streamline_gpu::{
    Backend, BufferCreationFlags, BufferDesc, CommandBuffer, CommandPool, Fence, MemoryUsage,
    Queue, QueueDesc, QueueType,
};

/// One rotation slot: fence, command buffer and staging ring.
pub(crate) struct ResourceSet<B: Backend> {
    index: usize,
    fence: B::Fence,
    command_pool: B::CommandPool,
    command_buffer: B::CommandBuffer,
    staging: Arc<B::Buffer>,
    arena: StagingArena,
    temporaries: Vec<MappedRange<B::Buffer>>,
    max_token: SyncToken,
    in_flight: bool,
}

impl<B: Backend> ResourceSet<B> {
    fn new(backend: &B, queue: &B::Queue, index: usize, staging_size: u64) -> LoaderResult<Self> {
        let command_pool = backend.create_command_pool(queue)?;
        let command_buffer = command_pool.allocate_command_buffer()?;
        let staging = backend.create_buffer(
            &BufferDesc::new(staging_size, MemoryUsage::CpuOnly)
                .with_flags(BufferCreationFlags::PERSISTENT_MAP)
                .with_label(format!("resource-set-{index}-staging")),
        )?;

        Ok(Self {
            index,
            fence: backend.create_fence()?,
            command_pool,
            command_buffer,
            staging,
            arena: StagingArena::new(staging_size),
            temporaries: Vec::new(),
            max_token: SyncToken::NONE,
            in_flight: false,
        })
    }

    /// Carves a range from the staging ring.
    ///
    /// `exact` asks for all of `size` or nothing; otherwise the largest
    /// range up to `size` is returned. `None` means the ring is full.
    pub(crate) fn allocate(
        &mut self,
        size: u64,
        alignment: u64,
        exact: bool,
    ) -> Option<MappedRange<B::Buffer>> {
        let slice = if exact {
            self.arena.try_alloc(size, alignment)
        } else {
            self.arena.alloc_up_to(size, alignment)
        }?;

        Some(MappedRange::new(
            Arc::clone(&self.staging),
            slice.offset,
            slice.size,
            MappedRangeFlags::NONE,
        ))
    }

    /// Returns true if nothing has been staged since the last rewind.
    pub(crate) fn is_fresh(&self) -> bool {
        self.arena.is_empty()
    }

    /// The command buffer being recorded.
    pub(crate) fn commands(&mut self) -> &mut B::CommandBuffer {
        &mut self.command_buffer
    }

    /// Keeps a temporary range alive until this set retires.
    pub(crate) fn keep_alive(&mut self, range: MappedRange<B::Buffer>) {
        self.temporaries.push(range);
    }

    /// Makes `token` complete when this set retires.
    pub(crate) fn cover(&mut self, token: SyncToken) {
        self.max_token = self.max_token.max(token);
    }

    fn has_work(&self) -> bool {
        self.command_buffer.command_count() > 0
            || !self.max_token.is_none()
            || !self.temporaries.is_empty()
    }

    /// Rewinds the set and returns the token it covered.
    fn retire(&mut self) -> SyncToken {
        self.in_flight = false;
        self.arena.reset();
        self.temporaries.clear();
        std::mem::replace(&mut self.max_token, SyncToken::NONE)
    }
}

/// The ring of resource sets plus the transfer queue they submit to.
pub(crate) struct CopyEngine<B: Backend> {
    queue: B::Queue,
    sets: Vec<ResourceSet<B>>,
    active: Option<usize>,
    next: usize,
    in_flight: VecDeque<usize>,
    ledger: Arc<TokenLedger>,
    stats: Arc<Mutex<LoaderStats>>,
    fence_timeout: Duration,
}

impl<B: Backend> CopyEngine<B> {
    pub(crate) fn new(
        backend: &B,
        config: &LoaderConfig,
        ledger: Arc<TokenLedger>,
        stats: Arc<Mutex<LoaderStats>>,
    ) -> LoaderResult<Self> {
        let queue = backend.create_queue(&QueueDesc {
            label: "resource-loader".to_string(),
            queue_type: QueueType::Transfer,
        })?;
        let sets = (0..config.buffer_count)
            .map(|index| ResourceSet::new(backend, &queue, index, config.staging_buffer_size))
            .collect::<LoaderResult<Vec<_>>>()?;

        Ok(Self {
            queue,
            sets,
            active: None,
            next: 0,
            in_flight: VecDeque::with_capacity(config.buffer_count),
            ledger,
            stats,
            fence_timeout: config.fence_timeout(),
        })
    }

    /// Capacity of one staging ring.
    pub(crate) fn ring_capacity(&self) -> u64 {
        self.sets.first().map_or(0, |set| set.arena.capacity())
    }

    /// Number of sets in the ring.
    pub(crate) fn set_count(&self) -> usize {
        self.sets.len()
    }

    pub(crate) fn has_in_flight(&self) -> bool {
        !self.in_flight.is_empty()
    }

    /// Returns the set being recorded, activating the next one if needed.
    ///
    /// Activating a set that is still in flight blocks on its fence.
    pub(crate) fn active_set(&mut self) -> LoaderResult<&mut ResourceSet<B>> {
        if let Some(index) = self.active {
            return Ok(&mut self.sets[index]);
        }

        let index = self.next;
        while self.sets[index].in_flight {
            self.wait_oldest()?;
        }

        let set = &mut self.sets[index];
        set.command_pool.reset()?;
        set.command_buffer.begin()?;
        self.active = Some(index);
        self.next = (index + 1) % self.sets.len();
        tracing::trace!("Activated resource set {}", index);

        Ok(&mut self.sets[index])
    }

    /// Submits the active set if it recorded anything.
    ///
    /// Returns true if a submission was made.
    pub(crate) fn flush(&mut self) -> LoaderResult<bool> {
        let Some(index) = self.active.take() else {
            return Ok(false);
        };

        let set = &mut self.sets[index];
        set.command_buffer.end()?;
        if !set.has_work() {
            set.arena.reset();
            self.next = index;
            return Ok(false);
        }

        let commands = set.command_buffer.command_count();
        let staged = set.arena.used();
        self.queue.submit(&mut set.command_buffer, &set.fence)?;
        set.in_flight = true;
        self.in_flight.push_back(index);
        self.stats.lock().submissions += 1;

        tracing::debug!(
            "Submitted resource set {} ({} commands, {} staged bytes, up to {})",
            index,
            commands,
            staged,
            set.max_token
        );
        Ok(true)
    }

    /// Retires every in-flight set whose fence has signalled, oldest
    /// first, without blocking.
    pub(crate) fn retire_completed(&mut self) -> usize {
        let mut retired = 0;
        while let Some(&index) = self.in_flight.front() {
            if !self.sets[index].fence.status().is_signaled() {
                break;
            }
            self.retire_front();
            retired += 1;
        }
        retired
    }

    /// Blocks until every in-flight set has retired.
    pub(crate) fn wait_idle(&mut self) -> LoaderResult<()> {
        while self.has_in_flight() {
            self.wait_oldest()?;
        }
        Ok(())
    }

    /// Blocks on the oldest in-flight set's fence, then retires it.
    fn wait_oldest(&mut self) -> LoaderResult<()> {
        let Some(&index) = self.in_flight.front() else {
            return Ok(());
        };

        let fence = &self.sets[index].fence;
        if !fence.status().is_signaled() {
            self.stats.lock().fence_stalls += 1;
            tracing::debug!("Waiting on fence of resource set {}", index);
            if !fence.wait(self.fence_timeout)? {
                return Err(LoaderError::DeviceLost(format!(
                    "fence of resource set {index} did not signal within {:?}",
                    self.fence_timeout
                )));
            }
        }

        self.retire_front();
        Ok(())
    }

    fn retire_front(&mut self) {
        let Some(index) = self.in_flight.pop_front() else {
            return;
        };
        let set = &mut self.sets[index];
        let token = set.retire();
        self.stats.lock().sets_retired += 1;
        tracing::trace!("Retired resource set {} up to {}", set.index, token);

        if !token.is_none() {
            self.ledger.advance(token);
        }
    }
}

impl<B: Backend> Drop for CopyEngine<B> {
    fn drop(&mut self) {
        if let Err(e) = self.queue.wait_idle() {
            tracing::warn!("Transfer queue did not drain on shutdown: {}", e);
        }
    }
}
