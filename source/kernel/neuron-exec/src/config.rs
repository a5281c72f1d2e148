// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Build-time knobs for scheduling and user memory
//! OWNERS: @kernel-team
//! PUBLIC API: SchedConfig, BIG_STRIDE, DEFAULT_PRIORITY, MIN_PRIORITY, STRIDE_QUEUE_CAPACITY,
//!             MAX_TASKS, USER_FRAME_BASE, USER_FRAME_COUNT
//! INVARIANTS: MIN_PRIORITY > 1 so the pass value never exceeds BIG_STRIDE / 2

use static_assertions::const_assert;

use crate::mm::PAGE_SIZE;

/// Numerator of the pass value: a subject advances by `BIG_STRIDE / priority` per dispatch.
pub const BIG_STRIDE: u64 = 65_536;
/// Priority assigned to freshly spawned subjects.
pub const DEFAULT_PRIORITY: u64 = 16;
/// Smallest priority accepted by `set_priority`.
pub const MIN_PRIORITY: u64 = 2;
/// Slots in the per-domain stride queue.
pub const STRIDE_QUEUE_CAPACITY: usize = 1024;
/// Upper bound on live tasks in the task table.
pub const MAX_TASKS: usize = 64;

/// First physical address handed out for user mappings (past the 16 MiB kernel image).
pub const USER_FRAME_BASE: usize = 0x8100_0000;
/// Frames in the default user pool (16 MiB).
pub const USER_FRAME_COUNT: usize = 4096;

const_assert!(MIN_PRIORITY > 1);
const_assert!(DEFAULT_PRIORITY >= MIN_PRIORITY);
const_assert!(MAX_TASKS <= STRIDE_QUEUE_CAPACITY);
const_assert!(USER_FRAME_BASE % PAGE_SIZE == 0);

/// Per-scheduler tuning.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SchedConfig {
    pub big_stride: u64,
    pub default_priority: u64,
}

impl SchedConfig {
    pub const fn new() -> Self {
        Self { big_stride: BIG_STRIDE, default_priority: DEFAULT_PRIORITY }
    }

    /// Stride increment charged for one dispatch at `priority`.
    ///
    /// Never zero: a priority above `big_stride` still advances the stride by one.
    pub fn pass(&self, priority: u64) -> u64 {
        (self.big_stride / priority.max(1)).max(1)
    }
}

impl Default for SchedConfig {
    fn default() -> Self {
        Self::new()
    }
}
