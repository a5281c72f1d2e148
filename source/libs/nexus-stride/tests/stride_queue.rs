//! CONTEXT: Tests for stride queue ordering, capacity and error reporting
//! OWNERS: @kernel-sched-team
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: 7 integration tests
//!
//! TEST_SCOPE:
//!   - Pop order follows ascending stride
//!   - Stride updates reposition entries
//!   - Capacity and empty-queue boundaries
//!   - Duplicate subject rejection
//!
//! TEST_SCENARIOS:
//!   - pops_in_ascending_stride_order(): strides [5,2,8,1] pop as D,B,A,C
//!   - update_moves_subject_to_front(): lowered stride is popped first
//!   - push_beyond_capacity_is_rejected(): extra push leaves the queue unchanged
//!   - empty_pop_reports_empty(): pop on empty queue errors without changing size
//!   - zero_stride_is_distinct_from_empty(): min_stride separates "empty" from stride 0
//!   - duplicate_subject_rejected(): second push of a queued id is refused
//!   - update_unknown_subject_not_found(): update on absent id errors without mutation
//!
//! DEPENDENCIES:
//!   - nexus_stride::StrideQueue: queue under test
use nexus_stride::{QueueError, StrideNode, StrideQueue};

const A: u32 = 10;
const B: u32 = 11;
const C: u32 = 12;
const D: u32 = 13;

#[test]
fn pops_in_ascending_stride_order() {
    let mut queue = StrideQueue::<16>::new();
    for (subject, stride) in [(A, 5), (B, 2), (C, 8), (D, 1)] {
        queue.push(subject, stride).unwrap();
    }
    let mut popped = Vec::new();
    while let Ok(node) = queue.pop_min() {
        popped.push(node);
    }
    assert_eq!(
        popped,
        [
            StrideNode { subject: D, stride: 1 },
            StrideNode { subject: B, stride: 2 },
            StrideNode { subject: A, stride: 5 },
            StrideNode { subject: C, stride: 8 },
        ]
    );
}

#[test]
fn update_moves_subject_to_front() {
    let mut queue = StrideQueue::<16>::new();
    queue.push(A, 10).unwrap();
    queue.push(B, 20).unwrap();
    queue.push(C, 30).unwrap();

    assert_eq!(queue.update_stride(C, 5), Ok(5));
    assert_eq!(queue.peek_min(), Some(&StrideNode { subject: C, stride: 5 }));
    assert_eq!(queue.pop_min().map(|node| node.subject), Ok(C));
    assert!(queue.is_sorted());
}

#[test]
fn push_beyond_capacity_is_rejected() {
    let mut queue = StrideQueue::<4>::new();
    for subject in 0..4u32 {
        queue.push(subject, u64::from(subject) * 3).unwrap();
    }
    let before: Vec<_> = queue.iter().copied().collect();

    assert_eq!(queue.push(99, 0), Err(QueueError::Full { capacity: 4 }));
    assert_eq!(queue.len(), queue.capacity());
    assert_eq!(queue.iter().copied().collect::<Vec<_>>(), before);
    assert!(queue.find(99).is_none());
}

#[test]
fn empty_pop_reports_empty() {
    let mut queue = StrideQueue::<4>::new();
    assert_eq!(queue.pop_min(), Err(QueueError::Empty));
    assert_eq!(queue.len(), 0);
    assert!(queue.is_empty());
}

#[test]
fn zero_stride_is_distinct_from_empty() {
    let mut queue = StrideQueue::<4>::new();
    assert!(queue.is_empty());
    assert_eq!(queue.min_stride(), None);

    queue.push(A, 0).unwrap();
    assert!(!queue.is_empty());
    assert_eq!(queue.min_stride(), Some(0));
}

#[test]
fn duplicate_subject_rejected() {
    let mut queue = StrideQueue::<4>::new();
    queue.push(A, 7).unwrap();
    assert_eq!(queue.push(A, 1), Err(QueueError::Duplicate { subject: A }));
    assert_eq!(queue.len(), 1);
    assert_eq!(queue.find(A), Some(&StrideNode { subject: A, stride: 7 }));
}

#[test]
fn update_unknown_subject_not_found() {
    let mut queue = StrideQueue::<4>::new();
    queue.push(A, 7).unwrap();
    assert_eq!(queue.update_stride(B, 1), Err(QueueError::NotFound { subject: B }));
    assert_eq!(queue.as_slice(), [StrideNode { subject: A, stride: 7 }]);
}
