// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Kernel facade tying the scheduler, task table, frame pool and syscall table together
//! OWNERS: @kernel-team
//! PUBLIC API: Kernel (new/spawn/tick/syscall/exit_current/translate)
//! DEPENDS_ON: sched::Scheduler, task::TaskTable, mm::FramePool, syscall::{SyscallTable, api}
//! INVARIANTS: The current task of the scheduler always exists in the task table

use crate::{
    mm::{self, FramePool, UserPage},
    sched::{EnqueueOutcome, Scheduler},
    syscall::{self, api, Args, SyscallTable},
    task::{Pid, SpawnError, Task, TaskTable},
    types::VirtAddr,
};

/// Charges the running task for its slice and dispatches the next one.
pub(crate) fn reschedule(scheduler: &mut Scheduler, tasks: &mut TaskTable) -> Option<Pid> {
    if let Some(pid) = scheduler.current() {
        let priority =
            tasks.get(pid).map_or(scheduler.config().default_priority, Task::priority);
        scheduler.yield_current(priority);
    }
    let next = scheduler.schedule_next()?;
    if let Some(task) = tasks.get_mut(next) {
        task.record_dispatch();
    }
    Some(next)
}

/// Single scheduling domain with its tasks and user memory.
pub struct Kernel {
    scheduler: Scheduler,
    tasks: TaskTable,
    frames: FramePool,
    syscalls: SyscallTable,
}

impl Kernel {
    /// Creates a kernel drawing user frames from the configured window.
    pub fn new() -> Self {
        Self::with_frame_pool(FramePool::default())
    }

    pub fn with_frame_pool(frames: FramePool) -> Self {
        let mut syscalls = SyscallTable::new();
        api::install_handlers(&mut syscalls);
        Self { scheduler: Scheduler::new(), tasks: TaskTable::new(), frames, syscalls }
    }

    /// Creates a runnable task with the given priority.
    pub fn spawn(&mut self, priority: u64) -> Result<Pid, SpawnError> {
        let pid = self.tasks.spawn(priority)?;
        if let EnqueueOutcome::Rejected(reason) = self.scheduler.admit(pid) {
            self.tasks.remove(pid);
            log_error!(target: "sched", "spawn of pid {} rejected: {:?}", pid, reason);
            return Err(SpawnError::RunQueueFull);
        }
        log_info!(target: "sched", "spawned pid {} priority {}", pid, priority);
        Ok(pid)
    }

    /// Timer tick: re-queues the running task and picks the smallest stride.
    pub fn tick(&mut self) -> Option<Pid> {
        reschedule(&mut self.scheduler, &mut self.tasks)
    }

    /// Executes syscall `number` for the current task and returns the raw result register.
    pub fn syscall(&mut self, number: usize, regs: [usize; 6]) -> isize {
        let mut ctx = api::Context::new(&mut self.scheduler, &mut self.tasks, &mut self.frames);
        let result = self.syscalls.dispatch(number, &mut ctx, &Args::new(regs));
        if let Err(err) = result {
            log_debug!(target: "syscall", "syscall {} failed: {}", number, err);
        }
        syscall::encode_result(result)
    }

    /// Terminates the running task and returns its pid.
    ///
    /// Every user page still mapped by the task is unmapped and its frame returned to the pool.
    pub fn exit_current(&mut self) -> Option<Pid> {
        let pid = self.scheduler.current()?;
        self.scheduler.purge(pid);
        if let Some(mut task) = self.tasks.remove(pid) {
            let released = task.release_frames(&mut self.frames);
            log_info!(
                target: "sched",
                "pid {} exited after {} dispatches, {} frames released",
                pid,
                task.dispatches(),
                released
            );
        }
        Some(pid)
    }

    pub fn current(&self) -> Option<Pid> {
        self.scheduler.current()
    }

    pub fn task(&self, pid: Pid) -> Option<&Task> {
        self.tasks.get(pid)
    }

    pub fn tasks(&self) -> &TaskTable {
        &self.tasks
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn frames(&self) -> &FramePool {
        &self.frames
    }

    /// Resolves a user address of `pid` to its backing page.
    pub fn translate(&self, pid: Pid, va: usize) -> Option<UserPage> {
        let va = VirtAddr::new(va)?;
        mm::mapper::translate_user(self.tasks.get(pid)?.page_table(), va)
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DEFAULT_PRIORITY, MAX_TASKS};

    #[test]
    fn first_tick_dispatches_first_spawn() {
        let mut kernel = Kernel::new();
        let a = kernel.spawn(DEFAULT_PRIORITY).unwrap();
        let _b = kernel.spawn(DEFAULT_PRIORITY).unwrap();
        assert_eq!(kernel.current(), None);
        assert_eq!(kernel.tick(), Some(a));
        assert_eq!(kernel.task(a).unwrap().dispatches(), 1);
    }

    #[test]
    fn equal_priorities_alternate() {
        let mut kernel = Kernel::new();
        let a = kernel.spawn(DEFAULT_PRIORITY).unwrap();
        let b = kernel.spawn(DEFAULT_PRIORITY).unwrap();
        let order: Vec<Pid> = (0..4).filter_map(|_| kernel.tick()).collect();
        assert_eq!(order, vec![a, b, a, b]);
    }

    #[test]
    fn exit_drops_task_and_queue_entry() {
        let mut kernel = Kernel::new();
        let a = kernel.spawn(DEFAULT_PRIORITY).unwrap();
        let b = kernel.spawn(DEFAULT_PRIORITY).unwrap();
        assert_eq!(kernel.tick(), Some(a));
        assert_eq!(kernel.exit_current(), Some(a));
        assert!(kernel.task(a).is_none());
        assert_eq!(kernel.tick(), Some(b));
        assert_eq!(kernel.tick(), Some(b));
        assert_eq!(kernel.exit_current(), Some(b));
        assert_eq!(kernel.tick(), None);
        assert_eq!(kernel.exit_current(), None);
    }

    #[test]
    fn exit_returns_mapped_frames() {
        let mut kernel = Kernel::with_frame_pool(FramePool::new(0x8100_0000, 2).unwrap());
        let a = kernel.spawn(DEFAULT_PRIORITY).unwrap();
        assert_eq!(kernel.tick(), Some(a));
        let regs = [0x1000_0000, 2 * mm::PAGE_SIZE, 0b011, 0, 0, 0];
        assert_eq!(kernel.syscall(syscall::SYSCALL_MMAP, regs), 0);
        assert_eq!(kernel.frames().in_use(), 2);
        assert_eq!(kernel.exit_current(), Some(a));
        assert_eq!(kernel.frames().in_use(), 0);
    }

    #[test]
    fn spawn_fails_when_table_is_full() {
        let mut kernel = Kernel::new();
        for _ in 0..MAX_TASKS {
            kernel.spawn(DEFAULT_PRIORITY).unwrap();
        }
        assert_eq!(kernel.spawn(DEFAULT_PRIORITY), Err(SpawnError::TableFull));
        assert_eq!(kernel.scheduler().queue_len(), MAX_TASKS);
    }
}
