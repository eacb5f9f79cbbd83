//! Host queues and the timeline thread that executes their submissions.

use super::command::HostCommand;
use super::fence::FenceShared;
use super::{HostCommandBuffer, HostDevice, HostFence};
use crate::error::{GpuError, GpuResult};
use crate::traits::{CommandBuffer, Queue};
use crate::types::{QueueDesc, QueueType};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// One `submit` call in flight.
struct Submission {
    index: u64,
    commands: Vec<HostCommand>,
    fence: Arc<FenceShared>,
}

/// Counts submissions that have not executed yet.
#[derive(Default)]
struct IdleTracker {
    pending: Mutex<u64>,
    drained: Condvar,
}

impl IdleTracker {
    fn begin(&self) {
        *self.pending.lock() += 1;
    }

    fn finish(&self) {
        let mut pending = self.pending.lock();
        *pending = pending.saturating_sub(1);
        if *pending == 0 {
            self.drained.notify_all();
        }
    }

    fn wait(&self) {
        let mut pending = self.pending.lock();
        while *pending > 0 {
            self.drained.wait(&mut pending);
        }
    }
}

/// A queue of the host backend.
///
/// Owns a timeline thread. Dropping the queue lets the thread finish every
/// pending submission, then joins it.
pub struct HostQueue {
    desc: QueueDesc,
    device: Arc<HostDevice>,
    sender: Option<Sender<Submission>>,
    idle: Arc<IdleTracker>,
    next_index: Mutex<u64>,
    timeline: Option<JoinHandle<()>>,
}

impl fmt::Debug for HostQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostQueue")
            .field("label", &self.desc.label)
            .field("queue_type", &self.desc.queue_type)
            .finish_non_exhaustive()
    }
}

impl HostQueue {
    pub(crate) fn spawn(
        desc: QueueDesc,
        execution_delay: Duration,
        device: Arc<HostDevice>,
    ) -> GpuResult<Self> {
        let (sender, receiver) = unbounded();
        let idle = Arc::new(IdleTracker::default());

        let timeline_idle = Arc::clone(&idle);
        let timeline = thread::Builder::new()
            .name(format!("host-timeline-{}", desc.label))
            .spawn(move || Self::timeline_loop(&receiver, &timeline_idle, execution_delay))
            .map_err(|e| GpuError::Backend(format!("failed to spawn timeline thread: {e}")))?;

        Ok(Self {
            desc,
            device,
            sender: Some(sender),
            idle,
            next_index: Mutex::new(0),
            timeline: Some(timeline),
        })
    }

    /// Queue family.
    #[must_use]
    pub fn queue_type(&self) -> QueueType {
        self.desc.queue_type
    }

    /// Executes submissions strictly in the order they were sent.
    fn timeline_loop(
        receiver: &Receiver<Submission>,
        idle: &IdleTracker,
        execution_delay: Duration,
    ) {
        tracing::debug!("Host timeline started");

        for submission in receiver.iter() {
            if !execution_delay.is_zero() {
                thread::sleep(execution_delay);
            }
            for command in &submission.commands {
                command.execute();
            }
            tracing::trace!(
                "Host timeline executed submission {} ({} commands)",
                submission.index,
                submission.commands.len()
            );
            submission.fence.signal();
            idle.finish();
        }

        tracing::debug!("Host timeline stopped");
    }
}

impl Queue for HostQueue {
    type CommandBuffer = HostCommandBuffer;
    type Fence = HostFence;

    fn submit(&self, commands: &mut HostCommandBuffer, fence: &HostFence) -> GpuResult<()> {
        self.device.check_alive()?;
        if commands.is_recording() {
            return Err(GpuError::StillRecording);
        }
        if self.device.take_injected_failure() {
            self.device.lose("injected submission failure");
            return Err(GpuError::DeviceLost("injected submission failure".to_string()));
        }

        let shared = fence.shared();
        shared.arm()?;

        let index = {
            let mut next = self.next_index.lock();
            *next += 1;
            *next
        };
        let submission = Submission {
            index,
            commands: commands.take_commands(),
            fence: Arc::clone(&shared),
        };

        let Some(sender) = &self.sender else {
            shared.disarm();
            return Err(GpuError::Backend("queue is shut down".to_string()));
        };
        self.idle.begin();
        if sender.send(submission).is_err() {
            self.idle.finish();
            shared.disarm();
            return Err(GpuError::Backend("timeline thread exited".to_string()));
        }

        self.device.count_submission();
        Ok(())
    }

    fn wait_idle(&self) -> GpuResult<()> {
        self.device.check_alive()?;
        self.idle.wait();
        Ok(())
    }
}

impl Drop for HostQueue {
    fn drop(&mut self) {
        drop(self.sender.take());
        if let Some(handle) = self.timeline.take() {
            let _ = handle.join();
        }
    }
}
