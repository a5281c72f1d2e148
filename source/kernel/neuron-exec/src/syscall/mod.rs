// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Syscall dispatcher and error handling
//! OWNERS: @kernel-team
//! PUBLIC API: SyscallTable, Args, Error, Handler, SysResult, encode_result, SYSCALL_* IDs
//! DEPENDS_ON: mm, syscall::api
//! INVARIANTS: Fixed MAX_SYSCALL window; stable IDs; decode/check/execute discipline;
//!             every failure surfaces to user space as -1

pub mod api;

use core::fmt;

use crate::mm;

/// Size of the dispatch window.
const MAX_SYSCALL: usize = 256;

/// Result type used by syscall handlers.
pub type SysResult<T> = Result<T, Error>;

/// Syscall arguments passed in registers a0-a5.
#[derive(Default, Clone, Copy, Debug)]
pub struct Args {
    regs: [usize; 6],
}

impl Args {
    /// Creates a new argument pack from the provided registers.
    pub const fn new(regs: [usize; 6]) -> Self {
        Self { regs }
    }

    /// Returns the raw register at `index`.
    pub fn get(&self, index: usize) -> usize {
        self.regs[index]
    }
}

/// Public syscall numbers (RISC-V Linux numbering).
pub const SYSCALL_SCHED_YIELD: usize = 124;
pub const SYSCALL_SETPRIORITY: usize = 140;
pub const SYSCALL_GETPID: usize = 172;
pub const SYSCALL_MUNMAP: usize = 215;
pub const SYSCALL_MMAP: usize = 222;

/// Error returned by the dispatcher and handler stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Syscall number not present in the dispatch table.
    InvalidSyscall,
    /// Mapping request was rejected.
    Mmap(mm::MmapError),
    /// Scalar argument outside its accepted range.
    InvalidArgument,
    /// No task is running on behalf of the caller.
    NoCurrentTask,
}

impl From<mm::MmapError> for Error {
    fn from(value: mm::MmapError) -> Self {
        Self::Mmap(value)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Mmap(err) => write!(f, "mmap: {}", err),
            other => write!(f, "{:?}", other),
        }
    }
}

/// Folds a handler result into the raw return register: the value or `-1`.
pub fn encode_result(result: SysResult<usize>) -> isize {
    match result {
        Ok(value) => isize::try_from(value).unwrap_or(-1),
        Err(_) => -1,
    }
}

/// Type alias for a syscall handler.
pub type Handler = fn(&mut api::Context<'_>, &Args) -> SysResult<usize>;

/// Dispatch table storing handlers by syscall number.
pub struct SyscallTable {
    handlers: [Option<Handler>; MAX_SYSCALL],
}

impl SyscallTable {
    /// Creates an empty dispatch table.
    pub const fn new() -> Self {
        const NONE: Option<Handler> = None;
        Self { handlers: [NONE; MAX_SYSCALL] }
    }

    /// Registers a handler.
    pub fn register(&mut self, number: usize, handler: Handler) {
        if number < MAX_SYSCALL {
            self.handlers[number] = Some(handler);
        }
    }

    /// Returns true when a handler is registered for `number`.
    pub fn is_registered(&self, number: usize) -> bool {
        self.handlers.get(number).is_some_and(Option::is_some)
    }

    /// Executes the handler referenced by `number`.
    #[must_use]
    pub fn dispatch(
        &self,
        number: usize,
        ctx: &mut api::Context<'_>,
        args: &Args,
    ) -> SysResult<usize> {
        self.handlers
            .get(number)
            .and_then(|entry| *entry)
            .ok_or(Error::InvalidSyscall)
            .and_then(|handler| handler(ctx, args))
    }
}

impl Default for SyscallTable {
    fn default() -> Self {
        Self::new()
    }
}
