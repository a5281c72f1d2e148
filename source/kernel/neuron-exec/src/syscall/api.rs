// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Syscall handlers exposed to the dispatcher
//! OWNERS: @kernel-team
//! PUBLIC API: install_handlers(table), Context, MmapArgs, MunmapArgs
//! DEPENDS_ON: sched::Scheduler, task::TaskTable, mm::{FramePool, MapRequest, UnmapRequest}
//! INVARIANTS: Stable syscall IDs; Decode→Check→Execute pattern; arguments fully validated
//!             before the address space is touched

use super::{
    Args, Error, SysResult, SyscallTable, SYSCALL_GETPID, SYSCALL_MMAP, SYSCALL_MUNMAP,
    SYSCALL_SCHED_YIELD, SYSCALL_SETPRIORITY,
};
use crate::{
    config::MIN_PRIORITY,
    mm::{FramePool, MapRequest, UnmapRequest},
    sched::Scheduler,
    task::{self, Pid},
};

/// Kernel state a handler may touch on behalf of the current task.
pub struct Context<'a> {
    pub scheduler: &'a mut Scheduler,
    pub tasks: &'a mut task::TaskTable,
    pub frames: &'a mut FramePool,
}

impl<'a> Context<'a> {
    pub fn new(
        scheduler: &'a mut Scheduler,
        tasks: &'a mut task::TaskTable,
        frames: &'a mut FramePool,
    ) -> Self {
        Self { scheduler, tasks, frames }
    }

    fn current_pid(&self) -> Result<Pid, Error> {
        self.scheduler.current().ok_or(Error::NoCurrentTask)
    }

    fn current_task(&mut self) -> Result<&mut task::Task, Error> {
        let pid = self.current_pid()?;
        self.tasks.get_mut(pid).ok_or(Error::NoCurrentTask)
    }
}

// Typed decoders for Decode→Check→Execute

/// `mmap(start, len, prot, flags, fd)`; `flags` and `fd` are accepted and ignored.
#[derive(Copy, Clone, Debug)]
pub struct MmapArgs {
    start: usize,
    len: usize,
    prot: u64,
}

impl MmapArgs {
    #[inline]
    pub fn decode(args: &Args) -> Result<Self, Error> {
        Ok(Self { start: args.get(0), len: args.get(1), prot: args.get(2) as u64 })
    }

    #[inline]
    pub fn check(&self) -> Result<MapRequest, Error> {
        Ok(MapRequest::decode(self.start, self.len, self.prot)?)
    }
}

/// `munmap(start, len)`.
#[derive(Copy, Clone, Debug)]
pub struct MunmapArgs {
    start: usize,
    len: usize,
}

impl MunmapArgs {
    #[inline]
    pub fn decode(args: &Args) -> Result<Self, Error> {
        Ok(Self { start: args.get(0), len: args.get(1) })
    }

    #[inline]
    pub fn check(&self) -> Result<UnmapRequest, Error> {
        Ok(UnmapRequest::decode(self.start, self.len))
    }
}

#[derive(Copy, Clone)]
struct SetPriorityArgsTyped {
    priority: isize,
}

impl SetPriorityArgsTyped {
    #[inline]
    fn decode(args: &Args) -> Result<Self, Error> {
        Ok(Self { priority: args.get(0) as isize })
    }

    #[inline]
    fn check(&self) -> Result<u64, Error> {
        u64::try_from(self.priority)
            .ok()
            .filter(|priority| *priority >= MIN_PRIORITY)
            .ok_or(Error::InvalidArgument)
    }
}

/// Registers every handler of this module.
pub fn install_handlers(table: &mut SyscallTable) {
    table.register(SYSCALL_SCHED_YIELD, sys_sched_yield);
    table.register(SYSCALL_SETPRIORITY, sys_set_priority);
    table.register(SYSCALL_GETPID, sys_getpid);
    table.register(SYSCALL_MUNMAP, sys_munmap);
    table.register(SYSCALL_MMAP, sys_mmap);
}

fn sys_sched_yield(ctx: &mut Context<'_>, _args: &Args) -> SysResult<usize> {
    let pid = ctx.current_pid()?;
    let next = crate::kernel::reschedule(ctx.scheduler, ctx.tasks);
    log_trace!(target: "syscall", "yield pid={} next={:?}", pid, next.map(Pid::as_raw));
    Ok(0)
}

fn sys_set_priority(ctx: &mut Context<'_>, args: &Args) -> SysResult<usize> {
    let typed = SetPriorityArgsTyped::decode(args)?;
    let priority = typed.check()?;
    let task = ctx.current_task()?;
    let applied = task.set_priority(priority).ok_or(Error::InvalidArgument)?;
    usize::try_from(applied).map_err(|_| Error::InvalidArgument)
}

fn sys_getpid(ctx: &mut Context<'_>, _args: &Args) -> SysResult<usize> {
    Ok(ctx.current_pid()?.as_index())
}

fn sys_mmap(ctx: &mut Context<'_>, args: &Args) -> SysResult<usize> {
    let req = MmapArgs::decode(args)?.check()?;
    let pid = ctx.current_pid()?;
    let task = ctx.tasks.get_mut(pid).ok_or(Error::NoCurrentTask)?;
    task.mapper(&mut *ctx.frames).map(&req)?;
    log_debug!(
        target: "syscall",
        "mmap pid={} start={} pages={} prot={:?}",
        pid,
        req.start(),
        req.pages(),
        req.protection()
    );
    Ok(0)
}

fn sys_munmap(ctx: &mut Context<'_>, args: &Args) -> SysResult<usize> {
    let req = MunmapArgs::decode(args)?.check()?;
    let pid = ctx.current_pid()?;
    let task = ctx.tasks.get_mut(pid).ok_or(Error::NoCurrentTask)?;
    task.mapper(&mut *ctx.frames).unmap(&req)?;
    log_debug!(target: "syscall", "munmap pid={} pages={}", pid, req.pages());
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_PRIORITY;
    use crate::mm::{MmapError, PAGE_SIZE};
    use crate::sched::EnqueueOutcome;

    struct Fixture {
        scheduler: Scheduler,
        tasks: task::TaskTable,
        frames: FramePool,
        table: SyscallTable,
    }

    impl Fixture {
        fn with_running_task() -> Self {
            let mut fixture = Self {
                scheduler: Scheduler::new(),
                tasks: task::TaskTable::new(),
                frames: FramePool::new(0x8100_0000, 16).unwrap(),
                table: SyscallTable::new(),
            };
            install_handlers(&mut fixture.table);
            let pid = fixture.tasks.spawn(DEFAULT_PRIORITY).unwrap();
            assert_eq!(fixture.scheduler.admit(pid), EnqueueOutcome::Enqueued);
            assert_eq!(fixture.scheduler.schedule_next(), Some(pid));
            fixture
        }

        fn call(&mut self, number: usize, regs: [usize; 6]) -> SysResult<usize> {
            let mut ctx = Context::new(&mut self.scheduler, &mut self.tasks, &mut self.frames);
            self.table.dispatch(number, &mut ctx, &Args::new(regs))
        }
    }

    #[test]
    fn mmap_args_ignore_flags_and_fd() {
        let args = Args::new([0x1000_0000, PAGE_SIZE, 0b011, 0xdead, usize::MAX, 0]);
        let req = MmapArgs::decode(&args).unwrap().check().unwrap();
        assert_eq!(req.pages(), 1);
        assert_eq!(req.start().raw(), 0x1000_0000);
    }

    #[test]
    fn mmap_and_munmap_update_the_current_task() {
        let mut fx = Fixture::with_running_task();
        let pid = fx.scheduler.current().unwrap();
        assert_eq!(fx.call(SYSCALL_MMAP, [0x2000_0000, 2 * PAGE_SIZE, 0b001, 0, 0, 0]), Ok(0));
        assert_eq!(fx.tasks.get(pid).unwrap().mapped_pages(), 2);
        assert_eq!(fx.call(SYSCALL_MUNMAP, [0x2000_0000, 2 * PAGE_SIZE, 0, 0, 0, 0]), Ok(0));
        assert_eq!(fx.tasks.get(pid).unwrap().mapped_pages(), 0);
        assert_eq!(
            fx.call(SYSCALL_MUNMAP, [0x2000_0000, PAGE_SIZE, 0, 0, 0, 0]),
            Err(Error::Mmap(MmapError::NotMapped {
                va: crate::types::VirtAddr::new(0x2000_0000).unwrap()
            }))
        );
    }

    #[test]
    fn set_priority_rejects_values_up_to_one() {
        let mut fx = Fixture::with_running_task();
        assert_eq!(fx.call(SYSCALL_SETPRIORITY, [1, 0, 0, 0, 0, 0]), Err(Error::InvalidArgument));
        assert_eq!(fx.call(SYSCALL_SETPRIORITY, [0, 0, 0, 0, 0, 0]), Err(Error::InvalidArgument));
        assert_eq!(
            fx.call(SYSCALL_SETPRIORITY, [(-4isize) as usize, 0, 0, 0, 0, 0]),
            Err(Error::InvalidArgument)
        );
        assert_eq!(fx.call(SYSCALL_SETPRIORITY, [2, 0, 0, 0, 0, 0]), Ok(2));
    }

    #[test]
    fn handlers_need_a_current_task() {
        let mut fx = Fixture::with_running_task();
        fx.scheduler.finish_current();
        assert_eq!(fx.call(SYSCALL_GETPID, [0; 6]), Err(Error::NoCurrentTask));
        assert_eq!(fx.call(SYSCALL_SETPRIORITY, [8, 0, 0, 0, 0, 0]), Err(Error::NoCurrentTask));
        assert_eq!(fx.call(SYSCALL_SCHED_YIELD, [0; 6]), Err(Error::NoCurrentTask));
    }

    #[test]
    fn unknown_number_is_invalid() {
        let mut fx = Fixture::with_running_task();
        assert_eq!(fx.call(57, [0; 6]), Err(Error::InvalidSyscall));
    }
}
