//! CONTEXT: Property-based tests for the stride queue ordering invariant
//! OWNERS: @kernel-sched-team
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: 2 property tests
//!
//! TEST_SCOPE:
//!   - Sort invariant under interleaved push/pop/update/remove
//!   - Pop sequence matches a stable sort of the pushed entries
//!
//! TEST_SCENARIOS:
//!   - stays_sorted_under_random_ops(): arbitrary op sequences never break ordering or size bounds
//!   - pop_order_is_stable_sort(): draining equals a stable sort by stride
//!
//! DEPENDENCIES:
//!   - nexus_stride::StrideQueue: queue under test
//!   - proptest: strategy-driven operation sequences
use nexus_stride::StrideQueue;
use proptest::prelude::*;

const CAP: usize = 12;

#[derive(Clone, Debug)]
enum Op {
    Push(u32, u64),
    Pop,
    Update(u32, u64),
    Remove(u32),
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u32..16, 0u64..64).prop_map(|(id, stride)| Op::Push(id, stride)),
        Just(Op::Pop),
        (0u32..16, 0u64..64).prop_map(|(id, stride)| Op::Update(id, stride)),
        (0u32..16).prop_map(Op::Remove),
    ]
}

proptest! {
    #[test]
    fn stays_sorted_under_random_ops(ops in proptest::collection::vec(arb_op(), 0..96)) {
        let mut queue = StrideQueue::<CAP>::new();
        for op in ops {
            let before = queue.len();
            match op {
                Op::Push(id, stride) => {
                    if queue.push(id, stride).is_ok() {
                        prop_assert_eq!(queue.len(), before + 1);
                    } else {
                        prop_assert_eq!(queue.len(), before);
                    }
                }
                Op::Pop => {
                    let min = queue.min_stride();
                    match queue.pop_min() {
                        Ok(node) => prop_assert_eq!(Some(node.stride), min),
                        Err(_) => prop_assert_eq!(before, 0),
                    }
                }
                Op::Update(id, stride) => {
                    if queue.update_stride(id, stride).is_ok() {
                        prop_assert_eq!(queue.find(id).map(|node| node.stride), Some(stride));
                    }
                    prop_assert_eq!(queue.len(), before);
                }
                Op::Remove(id) => {
                    let _ = queue.remove(id);
                    prop_assert!(queue.find(id).is_none());
                }
            }
            prop_assert!(queue.len() <= CAP);
            prop_assert!(queue.is_sorted());
        }
    }

    #[test]
    fn pop_order_is_stable_sort(strides in proptest::collection::vec(0u64..8, 0..CAP)) {
        let mut queue = StrideQueue::<CAP>::new();
        for (id, stride) in strides.iter().enumerate() {
            queue.push(id as u32, *stride).unwrap();
        }
        let mut expected: Vec<(u32, u64)> =
            strides.iter().enumerate().map(|(id, stride)| (id as u32, *stride)).collect();
        expected.sort_by_key(|entry| entry.1);

        let mut drained = Vec::new();
        while let Ok(node) = queue.pop_min() {
            drained.push((node.subject, node.stride));
        }
        prop_assert_eq!(drained, expected);
    }
}
