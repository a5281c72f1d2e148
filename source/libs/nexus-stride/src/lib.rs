// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), no_std)]

//! CONTEXT: Fixed-capacity stride queue backing proportional-share scheduling
//! OWNERS: @kernel-sched-team
//! PUBLIC API: StrideQueue (new/push/pop_min/find/update_stride/remove/min_stride), StrideNode, QueueError
//! DEPENDS_ON: core
//! INVARIANTS: Live entries ascending by stride; equal strides keep insertion order;
//!             subject ids unique; capacity fixed at construction
//!
//! The queue is a plain array kept sorted at all times. Insertion and stride updates are
//! insertion-sort fix-ups (O(n) shifts), removal of the minimum is a head pop followed by a
//! left shift. Subject counts are bounded by the task table, so the linear cost is fine and
//! keeps the structure allocation-free.

use core::fmt;

/// One schedulable subject and its accumulated pass value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StrideNode {
    pub subject: u32,
    pub stride: u64,
}

impl StrideNode {
    const EMPTY: Self = Self { subject: 0, stride: 0 };
}

/// Failure reported by queue operations. The queue is left untouched in every case.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueError {
    /// The queue already holds `capacity` entries.
    Full { capacity: usize },
    /// The subject is already queued.
    Duplicate { subject: u32 },
    /// The queue holds no entries.
    Empty,
    /// No entry exists for the subject.
    NotFound { subject: u32 },
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueError::Full { capacity } => write!(f, "stride queue full (capacity {})", capacity),
            QueueError::Duplicate { subject } => write!(f, "subject {} already queued", subject),
            QueueError::Empty => f.write_str("stride queue empty"),
            QueueError::NotFound { subject } => write!(f, "subject {} not queued", subject),
        }
    }
}

/// Stride-ordered queue holding at most `CAP` subjects.
#[derive(Clone)]
pub struct StrideQueue<const CAP: usize> {
    data: [StrideNode; CAP],
    len: usize,
}

impl<const CAP: usize> StrideQueue<CAP> {
    /// Creates an empty queue.
    pub const fn new() -> Self {
        Self { data: [StrideNode::EMPTY; CAP], len: 0 }
    }

    pub const fn capacity(&self) -> usize {
        CAP
    }

    pub const fn len(&self) -> usize {
        self.len
    }

    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Inserts `subject` behind every entry whose stride is less than or equal to `stride`.
    pub fn push(&mut self, subject: u32, stride: u64) -> Result<(), QueueError> {
        if self.len >= CAP {
            return Err(QueueError::Full { capacity: CAP });
        }
        if self.position(subject).is_some() {
            return Err(QueueError::Duplicate { subject });
        }
        let mut index = self.len;
        while index > 0 && self.data[index - 1].stride > stride {
            self.data[index] = self.data[index - 1];
            index -= 1;
        }
        self.data[index] = StrideNode { subject, stride };
        self.len += 1;
        debug_assert!(self.is_sorted());
        Ok(())
    }

    /// Removes and returns the entry with the smallest stride.
    pub fn pop_min(&mut self) -> Result<StrideNode, QueueError> {
        if self.is_empty() {
            return Err(QueueError::Empty);
        }
        let head = self.data[0];
        self.data.copy_within(1..self.len, 0);
        self.len -= 1;
        Ok(head)
    }

    /// Returns the entry with the smallest stride without removing it.
    pub fn peek_min(&self) -> Option<&StrideNode> {
        self.as_slice().first()
    }

    /// Smallest queued stride, `None` when nothing is queued.
    ///
    /// A queued subject may legitimately carry stride zero; emptiness is never encoded in
    /// the stride value.
    pub fn min_stride(&self) -> Option<u64> {
        self.peek_min().map(|node| node.stride)
    }

    /// Returns the first entry for `subject`.
    pub fn find(&self, subject: u32) -> Option<&StrideNode> {
        self.as_slice().iter().find(|node| node.subject == subject)
    }

    /// Replaces the stride of `subject` and moves it to its sorted position.
    ///
    /// A lowered stride moves left past entries that are now greater; a raised (or equal)
    /// stride moves right past entries that are now smaller.
    pub fn update_stride(&mut self, subject: u32, stride: u64) -> Result<u64, QueueError> {
        let mut index = self.position(subject).ok_or(QueueError::NotFound { subject })?;
        let previous = self.data[index].stride;
        if stride < previous {
            while index > 0 && self.data[index - 1].stride > stride {
                self.data[index] = self.data[index - 1];
                index -= 1;
            }
        } else {
            while index + 1 < self.len && self.data[index + 1].stride < stride {
                self.data[index] = self.data[index + 1];
                index += 1;
            }
        }
        self.data[index] = StrideNode { subject, stride };
        debug_assert!(self.is_sorted());
        Ok(stride)
    }

    /// Removes `subject` wherever it sits in the queue.
    pub fn remove(&mut self, subject: u32) -> Result<StrideNode, QueueError> {
        let index = self.position(subject).ok_or(QueueError::NotFound { subject })?;
        let node = self.data[index];
        self.data.copy_within(index + 1..self.len, index);
        self.len -= 1;
        Ok(node)
    }

    /// Live entries in queue order (ascending stride).
    pub fn as_slice(&self) -> &[StrideNode] {
        &self.data[..self.len]
    }

    pub fn iter(&self) -> core::slice::Iter<'_, StrideNode> {
        self.as_slice().iter()
    }

    /// Checks the ordering invariant over the live range.
    pub fn is_sorted(&self) -> bool {
        self.as_slice().windows(2).all(|pair| pair[0].stride <= pair[1].stride)
    }

    fn position(&self, subject: u32) -> Option<usize> {
        self.as_slice().iter().position(|node| node.subject == subject)
    }
}

impl<const CAP: usize> Default for StrideQueue<CAP> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const CAP: usize> fmt::Debug for StrideQueue<CAP> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.as_slice()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subjects<const CAP: usize>(queue: &StrideQueue<CAP>) -> Vec<u32> {
        queue.iter().map(|node| node.subject).collect()
    }

    #[test]
    fn equal_strides_keep_insertion_order() {
        let mut queue = StrideQueue::<8>::new();
        queue.push(1, 10).unwrap();
        queue.push(2, 10).unwrap();
        queue.push(3, 5).unwrap();
        queue.push(4, 10).unwrap();
        assert_eq!(subjects(&queue), [3, 1, 2, 4]);
    }

    #[test]
    fn raised_stride_moves_behind_equal_entries_only_if_smaller() {
        let mut queue = StrideQueue::<8>::new();
        queue.push(1, 10).unwrap();
        queue.push(2, 20).unwrap();
        queue.push(3, 20).unwrap();
        queue.push(4, 30).unwrap();
        assert_eq!(queue.update_stride(1, 20), Ok(20));
        // Entries with an equal stride stay behind the moved subject.
        assert_eq!(subjects(&queue), [1, 2, 3, 4]);
        assert_eq!(queue.update_stride(1, 25), Ok(25));
        assert_eq!(subjects(&queue), [2, 3, 1, 4]);
    }

    #[test]
    fn lowered_stride_stops_behind_equal_entries() {
        let mut queue = StrideQueue::<8>::new();
        queue.push(1, 10).unwrap();
        queue.push(2, 20).unwrap();
        queue.push(3, 30).unwrap();
        queue.update_stride(3, 10).unwrap();
        assert_eq!(subjects(&queue), [1, 3, 2]);
    }

    #[test]
    fn remove_keeps_order() {
        let mut queue = StrideQueue::<4>::new();
        queue.push(1, 3).unwrap();
        queue.push(2, 1).unwrap();
        queue.push(3, 2).unwrap();
        assert_eq!(queue.remove(3), Ok(StrideNode { subject: 3, stride: 2 }));
        assert_eq!(subjects(&queue), [2, 1]);
        assert_eq!(queue.remove(3), Err(QueueError::NotFound { subject: 3 }));
    }

    #[test]
    fn zero_capacity_rejects_everything() {
        let mut queue = StrideQueue::<0>::new();
        assert_eq!(queue.push(1, 0), Err(QueueError::Full { capacity: 0 }));
        assert_eq!(queue.pop_min(), Err(QueueError::Empty));
    }
}
