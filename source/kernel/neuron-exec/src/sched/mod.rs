// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Proportional-share stride scheduler for a single scheduling domain
//! OWNERS: @kernel-sched-team
//! PUBLIC API: Scheduler (admit/enqueue/schedule_next/yield_current/finish_current/purge),
//!             TaskId, EnqueueOutcome, EnqueueRejectReason
//! DEPENDS_ON: nexus_stride::StrideQueue, config::SchedConfig
//! INVARIANTS: Queue sorted by stride; running task is never also queued;
//!             saturation rejects deterministically and never drops the running task
//!
//! Each dispatch charges the running task `big_stride / priority`; the task with the
//! smallest accumulated stride runs next, so CPU share is proportional to priority.

use core::marker::PhantomData;

use nexus_stride::{QueueError, StrideQueue};

use crate::config::{SchedConfig, STRIDE_QUEUE_CAPACITY};
use crate::types::Pid;

/// Task identifier handed out by the scheduler.
pub type TaskId = Pid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueRejectReason {
    QueueFull { capacity: usize },
    AlreadyQueued { id: TaskId },
}

#[must_use = "enqueue outcomes must be handled"]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued,
    Rejected(EnqueueRejectReason),
}

#[derive(Debug, Clone, Copy)]
struct Running {
    id: TaskId,
    stride: u64,
}

/// Stride scheduler owning the run queue of one domain.
///
/// `Scheduler` is `!Send` and `!Sync`: it is driven through `&mut` by the single kernel
/// thread of control and carries no locking of its own.
pub struct Scheduler {
    queue: StrideQueue<STRIDE_QUEUE_CAPACITY>,
    current: Option<Running>,
    config: SchedConfig,
    _not_send_sync: PhantomData<*mut ()>,
}
static_assertions::assert_not_impl_any!(Scheduler: Send, Sync);

impl Scheduler {
    /// Creates an empty scheduler with the build-time configuration.
    pub fn new() -> Self {
        Self::with_config(SchedConfig::new())
    }

    pub fn with_config(config: SchedConfig) -> Self {
        Self {
            queue: StrideQueue::new(),
            current: None,
            config,
            _not_send_sync: PhantomData,
        }
    }

    pub fn config(&self) -> &SchedConfig {
        &self.config
    }

    /// Stride increment charged for one dispatch at `priority`.
    pub fn pass(&self, priority: u64) -> u64 {
        self.config.pass(priority)
    }

    /// Stride given to a newly schedulable task.
    ///
    /// Newcomers start level with the least-advanced runnable task so they neither starve
    /// nor monopolise the CPU while catching up.
    pub fn admission_stride(&self) -> u64 {
        let running = self.current.map(|run| run.stride);
        if self.queue.is_empty() {
            return running.unwrap_or(0);
        }
        self.queue
            .min_stride()
            .map_or(running.unwrap_or(0), |queued| running.map_or(queued, |run| run.min(queued)))
    }

    /// Makes `id` runnable at the admission stride.
    pub fn admit(&mut self, id: TaskId) -> EnqueueOutcome {
        let stride = self.admission_stride();
        self.enqueue(id, stride)
    }

    /// Queues `id` with an explicit stride.
    pub fn enqueue(&mut self, id: TaskId, stride: u64) -> EnqueueOutcome {
        if self.current.is_some_and(|run| run.id == id) {
            return self.reject(EnqueueRejectReason::AlreadyQueued { id });
        }
        match self.queue.push(id.as_raw(), stride) {
            Ok(()) => EnqueueOutcome::Enqueued,
            Err(QueueError::Full { capacity }) => {
                self.reject(EnqueueRejectReason::QueueFull { capacity })
            }
            Err(_) => self.reject(EnqueueRejectReason::AlreadyQueued { id }),
        }
    }

    fn reject(&self, reason: EnqueueRejectReason) -> EnqueueOutcome {
        log_warn!(target: "sched", "enqueue rejected: {:?}", reason);
        EnqueueOutcome::Rejected(reason)
    }

    /// Dispatches the queued task with the smallest stride.
    ///
    /// A task still marked as running is left untouched; callers re-queue it first with
    /// [`Scheduler::yield_current`].
    pub fn schedule_next(&mut self) -> Option<TaskId> {
        if let Some(run) = self.current {
            return Some(run.id);
        }
        let node = self.queue.pop_min().ok()?;
        let id = Pid::from_raw(node.subject);
        self.current = Some(Running { id, stride: node.stride });
        Some(id)
    }

    /// Charges the running task one pass at `priority` and puts it back in the queue.
    ///
    /// On saturation the task stays current so it is not silently lost.
    pub fn yield_current(&mut self, priority: u64) {
        let Some(run) = self.current.take() else { return };
        let stride = run.stride.saturating_add(self.pass(priority));
        if matches!(self.enqueue(run.id, stride), EnqueueOutcome::Rejected(_)) {
            self.current = Some(Running { id: run.id, stride });
        }
    }

    /// Marks the current task as finished without re-enqueuing it.
    pub fn finish_current(&mut self) {
        self.current = None;
    }

    /// Removes all references to `id`, queued or running.
    pub fn purge(&mut self, id: TaskId) {
        let _ = self.queue.remove(id.as_raw());
        if self.current.is_some_and(|run| run.id == id) {
            self.current = None;
        }
    }

    /// Overrides the stride of a queued task and restores queue order.
    pub fn update_stride(&mut self, id: TaskId, stride: u64) -> Result<u64, QueueError> {
        self.queue.update_stride(id.as_raw(), stride)
    }

    pub fn current(&self) -> Option<TaskId> {
        self.current.map(|run| run.id)
    }

    /// Stride of `id`, whether running or queued.
    pub fn stride_of(&self, id: TaskId) -> Option<u64> {
        match self.current {
            Some(run) if run.id == id => Some(run.stride),
            _ => self.queue.find(id.as_raw()).map(|node| node.stride),
        }
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_idle(&self) -> bool {
        self.current.is_none() && self.queue.is_empty()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}


#[cfg(test)]
mod tests_prop;
