// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Process-execution core: stride scheduling and user memory mappings
//! OWNERS: @kernel-team
//! PUBLIC API: Kernel, sched::Scheduler, mm::{Mapper, PageTable, FramePool}, syscall::*
//! DEPENDS_ON: nexus-stride (queue), bitflags, spin, static_assertions
//! INVARIANTS: Single scheduling domain; all state reached through `&mut` (no internal locking)

#![cfg_attr(not(test), no_std)]
#![cfg_attr(not(test), forbid(clippy::unwrap_used))]

extern crate alloc;

#[macro_use]
pub mod diag;

pub mod config;
mod kernel;
pub mod mm;
pub mod sched;
pub mod syscall;
pub mod task;
pub mod types;
#[cfg(all(target_arch = "riscv64", target_os = "none"))]
mod uart;

pub use diag::log;
pub use kernel::Kernel;
