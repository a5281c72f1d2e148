// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: User virtual memory: Sv39 page tables, the frame pool and the mmap/munmap mapper
//! OWNERS: @kernel-mm-team
//! PUBLIC API: PageTable, PageMapper, PageFlags, MapError, FramePool, FrameAllocator, PhysFrame,
//!             Mapper, MapRequest, UnmapRequest, Protection, MmapError, UserPage
//! DEPENDS_ON: bitflags, types::VirtAddr
//! INVARIANTS: Page-granular mappings; user leaves always carry USER|VALID;
//!             map/unmap either complete or leave no trace

pub mod frame;
pub mod mapper;
pub mod page_table;

pub use frame::{FrameAllocator, FrameError, FramePool, PhysFrame};
pub use mapper::{MapRequest, Mapper, MmapError, Protection, UnmapRequest, UserPage};
pub use page_table::{MapError, PageFlags, PageMapper, PageTable, PAGE_SIZE};

/// Number of pages needed to cover `len` bytes.
#[inline]
pub const fn pages_for(len: usize) -> usize {
    len.div_ceil(PAGE_SIZE)
}

#[cfg(feature = "failpoints")]
pub mod failpoints {
    use core::sync::atomic::{AtomicBool, Ordering};

    static DENY_NEXT_INSTALL: AtomicBool = AtomicBool::new(false);

    /// Forces the next `PageTable` install to return [`super::MapError::PermissionDenied`].
    pub fn deny_next_install() {
        DENY_NEXT_INSTALL.store(true, Ordering::SeqCst);
    }

    pub(super) fn take_deny() -> bool {
        DENY_NEXT_INSTALL.swap(false, Ordering::SeqCst)
    }
}
