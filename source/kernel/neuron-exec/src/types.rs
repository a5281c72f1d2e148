// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Minimal newtypes for safer syscall decoding
//! OWNERS: @kernel-team
//! PUBLIC API: VirtAddr, Pid
//! DEPENDS_ON: mm::page_table::is_canonical_sv39, PAGE_SIZE
//! INVARIANTS: VirtAddr is always canonical Sv39; PID 0 is never handed to user space

use crate::mm::{page_table::is_canonical_sv39, PAGE_SIZE};
use core::fmt;

/// Canonical Sv39 virtual address.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtAddr(usize);

impl VirtAddr {
    #[inline]
    pub fn new(addr: usize) -> Option<Self> {
        if is_canonical_sv39(addr) {
            Some(Self(addr))
        } else {
            None
        }
    }

    #[inline]
    pub fn page_aligned(addr: usize) -> Option<Self> {
        Self::new(addr).filter(|va| va.is_page_aligned())
    }

    #[inline]
    pub fn raw(self) -> usize {
        self.0
    }

    #[inline]
    pub fn is_page_aligned(self) -> bool {
        self.0 % PAGE_SIZE == 0
    }

    #[inline]
    pub fn page_offset(self) -> usize {
        self.0 % PAGE_SIZE
    }

    /// Base of the page containing this address.
    #[inline]
    pub fn page_base(self) -> Self {
        Self(self.0 & !(PAGE_SIZE - 1))
    }

    /// Address `pages` pages above this one, if it stays canonical.
    #[inline]
    pub fn add_pages(self, pages: usize) -> Option<Self> {
        pages.checked_mul(PAGE_SIZE).and_then(|bytes| self.0.checked_add(bytes)).and_then(Self::new)
    }
}

impl fmt::Display for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Process identifier.
///
/// **Ownership**: Only `TaskTable` creates PIDs.
/// **Invariant**: PID 0 is reserved for the kernel.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Pid(u32);

impl Pid {
    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn as_raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn as_index(self) -> usize {
        self.0 as usize
    }

    /// Kernel PID (reserved, never exposed to userspace).
    pub const KERNEL: Self = Self(0);
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_raw())
    }
}
