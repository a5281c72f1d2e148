// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Task table holding per-subject scheduling and address-space state
//! OWNERS: @kernel-sched-team
//! PUBLIC API: Task (priority/mapped_pages/mapper/release_frames), TaskTable (spawn/get/get_mut/remove), SpawnError
//! DEPENDS_ON: mm::{PageTable, Mapper, FrameAllocator}, config::MAX_TASKS, types::Pid
//! INVARIANTS: PID 0 never allocated; slot index = pid - 1; table bounded by MAX_TASKS

extern crate alloc;

use alloc::vec::Vec;
use core::marker::PhantomData;

use crate::config::{MAX_TASKS, MIN_PRIORITY};
use crate::mm::{FrameAllocator, Mapper, PageFlags, PageTable, UnmapRequest, PAGE_SIZE};

pub use crate::types::Pid;

/// Error returned when spawning a new task.
#[must_use = "spawn errors must be handled explicitly"]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnError {
    /// Every slot in the table is occupied.
    TableFull,
    /// Priority below the accepted minimum.
    InvalidPriority,
    /// Scheduler refused to queue the new task.
    RunQueueFull,
}

/// Minimal task control block.
pub struct Task {
    pid: Pid,
    priority: u64,
    mapped_pages: usize,
    dispatches: u64,
    page_table: PageTable,
}

impl Task {
    fn new(pid: Pid, priority: u64) -> Self {
        Self { pid, priority, mapped_pages: 0, dispatches: 0, page_table: PageTable::new() }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn priority(&self) -> u64 {
        self.priority
    }

    /// Sets the scheduling weight; values below `MIN_PRIORITY` are refused.
    pub fn set_priority(&mut self, priority: u64) -> Option<u64> {
        if priority < MIN_PRIORITY {
            return None;
        }
        self.priority = priority;
        Some(priority)
    }

    /// Pages currently mapped through `mmap`.
    pub fn mapped_pages(&self) -> usize {
        self.mapped_pages
    }

    /// Number of times the scheduler has dispatched this task.
    pub fn dispatches(&self) -> u64 {
        self.dispatches
    }

    pub(crate) fn record_dispatch(&mut self) {
        self.dispatches += 1;
    }

    pub fn page_table(&self) -> &PageTable {
        &self.page_table
    }

    /// Mapper over this task's address space drawing frames from `frames`.
    pub fn mapper<'a, A: FrameAllocator>(
        &'a mut self,
        frames: &'a mut A,
    ) -> Mapper<'a, PageTable, A> {
        Mapper::new(&mut self.page_table, frames, &mut self.mapped_pages)
    }

    /// Unmaps every user page and hands its frame back to `frames`.
    ///
    /// Returns the number of pages released.
    pub fn release_frames<A: FrameAllocator>(&mut self, frames: &mut A) -> usize {
        let mut user_pages = Vec::new();
        self.page_table.for_each_leaf(|va, _, flags| {
            if flags.contains(PageFlags::USER) {
                user_pages.push(va);
            }
        });
        let mut mapper = self.mapper(frames);
        let mut released = 0;
        for va in user_pages {
            match mapper.unmap(&UnmapRequest::decode(va, PAGE_SIZE)) {
                Ok(()) => released += 1,
                Err(err) => log_error!(target: "mm", "release of {:#x} failed: {}", va, err),
            }
        }
        released
    }
}

/// Kernel task table managing task control blocks.
pub struct TaskTable {
    slots: Vec<Option<Task>>,
    live: usize,
    // Single kernel execution context.
    _not_send_sync: PhantomData<*mut ()>,
}

impl TaskTable {
    pub fn new() -> Self {
        Self { slots: Vec::new(), live: 0, _not_send_sync: PhantomData }
    }

    /// Creates a task in the lowest free slot.
    pub fn spawn(&mut self, priority: u64) -> Result<Pid, SpawnError> {
        if priority < MIN_PRIORITY {
            return Err(SpawnError::InvalidPriority);
        }
        let index = match self.slots.iter().position(Option::is_none) {
            Some(index) => index,
            None if self.slots.len() < MAX_TASKS => {
                self.slots.push(None);
                self.slots.len() - 1
            }
            None => return Err(SpawnError::TableFull),
        };
        let pid = Pid::from_raw(index as u32 + 1);
        self.slots[index] = Some(Task::new(pid, priority));
        self.live += 1;
        Ok(pid)
    }

    pub fn get(&self, pid: Pid) -> Option<&Task> {
        let index = Self::slot_of(pid)?;
        self.slots.get(index)?.as_ref()
    }

    pub fn get_mut(&mut self, pid: Pid) -> Option<&mut Task> {
        let index = Self::slot_of(pid)?;
        self.slots.get_mut(index)?.as_mut()
    }

    /// Drops the task, releasing its page-table pages.
    pub fn remove(&mut self, pid: Pid) -> Option<Task> {
        let index = Self::slot_of(pid)?;
        let task = self.slots.get_mut(index)?.take()?;
        self.live -= 1;
        Some(task)
    }

    /// Number of live tasks.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.slots.iter().flatten()
    }

    fn slot_of(pid: Pid) -> Option<usize> {
        pid.as_index().checked_sub(1)
    }
}

impl Default for TaskTable {
    fn default() -> Self {
        Self::new()
    }
}
