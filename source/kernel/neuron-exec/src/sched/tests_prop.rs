// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg(test)]
//! CONTEXT: Property-based tests for stride fairness
//! OWNERS: @kernel-sched-team
//! NOTE: Tests only; no kernel logic.
//!
//! TEST_SCOPE:
//!   - Stride spread stays within one maximal pass
//!   - Yield/schedule cycles never lose or duplicate a task
//!
//! TEST_SCENARIOS:
//!   - stride_spread_bounded_by_max_pass(): any priority mix keeps strides within one pass
//!   - tasks_are_conserved(): queued + running equals the admitted set after every tick

use super::{EnqueueOutcome, Scheduler, TaskId};
use crate::types::Pid;
use proptest::prelude::*;

fn run_ticks(sched: &mut Scheduler, priorities: &[u64], ticks: usize) {
    for _ in 0..ticks {
        if let Some(id) = sched.current() {
            sched.yield_current(priorities[id.as_index() - 1]);
        }
        let _ = sched.schedule_next();
    }
}

fn admit_all(sched: &mut Scheduler, count: usize) -> Vec<TaskId> {
    (1..=count as u32)
        .map(|raw| {
            let id = Pid::from_raw(raw);
            assert_eq!(sched.admit(id), EnqueueOutcome::Enqueued);
            id
        })
        .collect()
}

proptest! {
    #[test]
    fn stride_spread_bounded_by_max_pass(
        priorities in proptest::collection::vec(2u64..64, 1..8),
        ticks in 0usize..400,
    ) {
        let mut sched = Scheduler::new();
        let ids = admit_all(&mut sched, priorities.len());
        run_ticks(&mut sched, &priorities, ticks);

        let max_pass = priorities.iter().map(|p| sched.pass(*p)).max().unwrap_or(0);
        let strides: Vec<u64> = ids.iter().filter_map(|id| sched.stride_of(*id)).collect();
        prop_assert_eq!(strides.len(), ids.len());
        let lo = strides.iter().copied().min().unwrap_or(0);
        let hi = strides.iter().copied().max().unwrap_or(0);
        prop_assert!(hi - lo <= max_pass, "spread {} exceeds pass {}", hi - lo, max_pass);
    }

    #[test]
    fn tasks_are_conserved(
        priorities in proptest::collection::vec(2u64..64, 1..8),
        ticks in 1usize..200,
    ) {
        let mut sched = Scheduler::new();
        let ids = admit_all(&mut sched, priorities.len());
        for _ in 0..ticks {
            run_ticks(&mut sched, &priorities, 1);
            let running = usize::from(sched.current().is_some());
            prop_assert_eq!(sched.queue_len() + running, ids.len());
        }
    }
}
