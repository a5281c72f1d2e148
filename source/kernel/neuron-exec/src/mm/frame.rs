// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Physical frame pool backing user mappings
//! OWNERS: @kernel-mm-team
//! PUBLIC API: PhysFrame, FrameAllocator (allocate/free), FramePool, FrameError
//! DEPENDS_ON: alloc::vec (bitmap storage)
//! INVARIANTS: A frame is owned by at most one mapping; double frees are rejected

extern crate alloc;

use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

use super::PAGE_SIZE;
use crate::config::{USER_FRAME_BASE, USER_FRAME_COUNT};

const WORD_BITS: usize = u64::BITS as usize;

/// Page-aligned physical frame, identified by its base address.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PhysFrame(usize);

impl PhysFrame {
    /// Returns `None` unless `base` is page aligned.
    pub const fn from_base(base: usize) -> Option<Self> {
        if base % PAGE_SIZE == 0 {
            Some(Self(base))
        } else {
            None
        }
    }

    pub const fn base(self) -> usize {
        self.0
    }
}

impl fmt::Display for PhysFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Errors reported when handing a frame back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameError {
    /// Frame lies outside the pool.
    Foreign,
    /// Frame is not currently allocated.
    DoubleFree,
}

/// Source of physical frames for user mappings.
pub trait FrameAllocator {
    /// Hands out one zeroed frame, or `None` when exhausted.
    fn allocate(&mut self) -> Option<PhysFrame>;

    /// Returns a frame previously obtained from [`FrameAllocator::allocate`].
    fn free(&mut self, frame: PhysFrame) -> Result<(), FrameError>;
}

/// Bitmap allocator over a contiguous run of frames.
pub struct FramePool {
    base: usize,
    frames: usize,
    bitmap: Vec<u64>,
    next: usize,
    in_use: usize,
}

impl FramePool {
    /// Creates a pool of `frames` frames starting at the page-aligned address `base`.
    pub fn new(base: usize, frames: usize) -> Option<Self> {
        PhysFrame::from_base(base)?;
        frames.checked_mul(PAGE_SIZE).and_then(|bytes| base.checked_add(bytes))?;
        Some(Self::with_layout(base, frames))
    }

    fn with_layout(base: usize, frames: usize) -> Self {
        Self {
            base,
            frames,
            bitmap: vec![0; frames.div_ceil(WORD_BITS)],
            next: 0,
            in_use: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.frames
    }

    pub fn in_use(&self) -> usize {
        self.in_use
    }

    pub fn available(&self) -> usize {
        self.frames - self.in_use
    }

    /// Returns true when `frame` is currently handed out by this pool.
    pub fn is_allocated(&self, frame: PhysFrame) -> bool {
        self.index_of(frame).is_some_and(|index| self.test(index))
    }

    fn index_of(&self, frame: PhysFrame) -> Option<usize> {
        let offset = frame.base().checked_sub(self.base)?;
        let index = offset / PAGE_SIZE;
        (index < self.frames).then_some(index)
    }

    fn test(&self, index: usize) -> bool {
        self.bitmap[index / WORD_BITS] & (1 << (index % WORD_BITS)) != 0
    }
}

impl Default for FramePool {
    /// Pool over the configured user frame window.
    fn default() -> Self {
        Self::with_layout(USER_FRAME_BASE, USER_FRAME_COUNT)
    }
}

impl FrameAllocator for FramePool {
    fn allocate(&mut self) -> Option<PhysFrame> {
        for _ in 0..self.frames {
            let index = self.next;
            self.next = (index + 1) % self.frames;
            if !self.test(index) {
                self.bitmap[index / WORD_BITS] |= 1 << (index % WORD_BITS);
                self.in_use += 1;
                let frame = PhysFrame(self.base + index * PAGE_SIZE);
                zero_frame(frame);
                return Some(frame);
            }
        }
        None
    }

    fn free(&mut self, frame: PhysFrame) -> Result<(), FrameError> {
        let index = self.index_of(frame).ok_or(FrameError::Foreign)?;
        if !self.test(index) {
            return Err(FrameError::DoubleFree);
        }
        self.bitmap[index / WORD_BITS] &= !(1 << (index % WORD_BITS));
        self.in_use -= 1;
        Ok(())
    }
}

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
fn zero_frame(frame: PhysFrame) {
    // SAFETY: the user frame pool lies inside the kernel's identity-mapped RAM window and
    // the frame was just taken out of the pool, so nothing else references it.
    unsafe {
        core::ptr::write_bytes(frame.base() as *mut u8, 0, PAGE_SIZE);
    }
}

#[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
fn zero_frame(_frame: PhysFrame) {}
