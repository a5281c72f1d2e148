// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Anonymous user mappings behind the mmap/munmap syscalls
//! OWNERS: @kernel-mm-team
//! PUBLIC API: Protection, MapRequest, UnmapRequest, Mapper (map/unmap/translate), UserPage, MmapError
//! DEPENDS_ON: page_table::PageMapper, frame::FrameAllocator, types::VirtAddr
//! INVARIANTS: Arguments validated before any page is touched; mapped-page counter equals
//!             pages mapped minus pages unmapped; a failed call leaves table, frames and
//!             counter exactly as they were
//!
//! Requests follow the Decode → Check → Execute discipline used by the syscall layer:
//! `MapRequest::decode` / `UnmapRequest::decode` turn raw register values into typed
//! requests, `Mapper` executes them against a page-table capability and a frame source.

use bitflags::bitflags;
use core::fmt;

use super::frame::{FrameAllocator, PhysFrame};
use super::page_table::{MapError, PageFlags, PageMapper};
use super::pages_for;
use crate::types::VirtAddr;

bitflags! {
    /// Protection word accepted by `mmap`.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Protection: u64 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXEC = 1 << 2;
    }
}

impl Protection {
    /// Accepts words with at least one access bit and no bits above bit 2.
    pub fn from_word(word: u64) -> Result<Self, MmapError> {
        Self::from_bits(word)
            .filter(|prot| !prot.is_empty())
            .ok_or(MmapError::InvalidProtection)
    }

    /// Leaf flags for a user page with this protection.
    pub fn page_flags(self) -> PageFlags {
        let mut flags = PageFlags::VALID | PageFlags::USER;
        if self.contains(Protection::READ) {
            flags |= PageFlags::READ;
        }
        if self.contains(Protection::WRITE) {
            flags |= PageFlags::WRITE;
        }
        if self.contains(Protection::EXEC) {
            flags |= PageFlags::EXECUTE;
        }
        flags
    }
}

/// Failure of a map or unmap request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MmapError {
    /// Protection word has no access bit or sets a reserved bit.
    InvalidProtection,
    /// Requested length is zero.
    ZeroLength,
    /// Start address is not page aligned.
    Unaligned,
    /// Range leaves the canonical address space.
    Overflow,
    /// Frame source ran dry.
    OutOfMemory,
    /// Page-table capability refused an install or removal.
    Map(MapError),
    /// Page in the range is not mapped for the user.
    NotMapped { va: VirtAddr },
}

impl From<MapError> for MmapError {
    fn from(value: MapError) -> Self {
        Self::Map(value)
    }
}

impl fmt::Display for MmapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MmapError::NotMapped { va } => write!(f, "page {} not mapped", va),
            other => write!(f, "{:?}", other),
        }
    }
}

/// Validated `mmap` arguments.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MapRequest {
    start: VirtAddr,
    pages: usize,
    prot: Protection,
}

impl MapRequest {
    /// Checks protection, then length, then alignment and range.
    pub fn decode(start: usize, len: usize, prot: u64) -> Result<Self, MmapError> {
        let prot = Protection::from_word(prot)?;
        if len == 0 {
            return Err(MmapError::ZeroLength);
        }
        if start % super::PAGE_SIZE != 0 {
            return Err(MmapError::Unaligned);
        }
        let start = VirtAddr::new(start).ok_or(MmapError::Overflow)?;
        let pages = pages_for(len);
        // The last mapped page must itself be canonical.
        start.add_pages(pages - 1).ok_or(MmapError::Overflow)?;
        Ok(Self { start, pages, prot })
    }

    pub fn start(&self) -> VirtAddr {
        self.start
    }

    pub fn pages(&self) -> usize {
        self.pages
    }

    pub fn protection(&self) -> Protection {
        self.prot
    }
}

/// Validated `munmap` arguments.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UnmapRequest {
    start: usize,
    pages: usize,
}

impl UnmapRequest {
    /// Only computes the page span; per-page checks happen against the table.
    pub fn decode(start: usize, len: usize) -> Self {
        Self { start, pages: pages_for(len) }
    }

    pub fn pages(&self) -> usize {
        self.pages
    }
}

/// User page reached through a translation of the owning page table.
///
/// Only [`Mapper::translate`] creates values of this type, so holding one means the page
/// was mapped with `USER` at the time of the lookup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UserPage {
    va: VirtAddr,
    frame: PhysFrame,
    flags: PageFlags,
}

impl UserPage {
    pub fn va(&self) -> VirtAddr {
        self.va
    }

    pub fn frame(&self) -> PhysFrame {
        self.frame
    }

    pub fn flags(&self) -> PageFlags {
        self.flags
    }

    /// Physical address of `addr`, which must fall inside this page.
    pub fn phys_addr(&self, addr: VirtAddr) -> Option<usize> {
        (addr.page_base() == self.va).then(|| self.frame.base() + addr.page_offset())
    }
}

/// Executes mapping requests for one address space.
///
/// Borrows the page table, the frame source and the owning task's mapped-page counter for
/// the duration of one syscall.
pub struct Mapper<'a, M: PageMapper, A: FrameAllocator> {
    table: &'a mut M,
    frames: &'a mut A,
    mapped_pages: &'a mut usize,
}

impl<'a, M: PageMapper, A: FrameAllocator> Mapper<'a, M, A> {
    pub fn new(table: &'a mut M, frames: &'a mut A, mapped_pages: &'a mut usize) -> Self {
        Self { table, frames, mapped_pages }
    }

    /// Backs every page of `req` with a fresh frame.
    ///
    /// On any failure the pages installed by this call are removed again and their frames
    /// returned, so the call has no lasting effect.
    pub fn map(&mut self, req: &MapRequest) -> Result<(), MmapError> {
        let flags = req.prot.page_flags();
        for page in 0..req.pages {
            let va = req.start.add_pages(page).ok_or(MmapError::Overflow);
            let result = va.and_then(|va| self.map_one(va, flags));
            if let Err(err) = result {
                log_warn!(
                    target: "mm",
                    "mmap {} pages at {} failed at page {}: {}",
                    req.pages,
                    req.start,
                    page,
                    err
                );
                self.rollback(req.start, page);
                return Err(err);
            }
        }
        Ok(())
    }

    fn map_one(&mut self, va: VirtAddr, flags: PageFlags) -> Result<(), MmapError> {
        let frame = self.frames.allocate().ok_or(MmapError::OutOfMemory)?;
        if let Err(err) = self.table.install(va, frame, flags) {
            self.release(frame);
            return Err(err.into());
        }
        *self.mapped_pages += 1;
        #[cfg(feature = "debug_uart")]
        log_trace!(target: "mm", "map {} -> {} {:?}", va, frame, flags);
        Ok(())
    }

    fn rollback(&mut self, start: VirtAddr, installed: usize) {
        for page in (0..installed).rev() {
            let Some(va) = start.add_pages(page) else { continue };
            match self.table.remove(va) {
                Ok(frame) => {
                    self.release(frame);
                    *self.mapped_pages -= 1;
                }
                Err(err) => log_error!(target: "mm", "rollback of {} failed: {:?}", va, err),
            }
        }
    }

    /// Removes every page of `req`, returning frames to the pool.
    ///
    /// All pages are checked (aligned, mapped for the user) before the first one is removed.
    pub fn unmap(&mut self, req: &UnmapRequest) -> Result<(), MmapError> {
        let mut va = req.start;
        for _ in 0..req.pages {
            if va % super::PAGE_SIZE != 0 {
                return Err(MmapError::Unaligned);
            }
            let page = VirtAddr::new(va).ok_or(MmapError::Overflow)?;
            self.translate(page).ok_or(MmapError::NotMapped { va: page })?;
            va = va.checked_add(super::PAGE_SIZE).ok_or(MmapError::Overflow)?;
        }

        let mut va = req.start;
        for _ in 0..req.pages {
            let page = VirtAddr::new(va).ok_or(MmapError::Overflow)?;
            let frame = self.table.remove(page)?;
            self.release(frame);
            *self.mapped_pages -= 1;
            va += super::PAGE_SIZE;
        }
        Ok(())
    }

    /// Translates a user virtual address; kernel-only leaves are not reported.
    pub fn translate(&self, va: VirtAddr) -> Option<UserPage> {
        translate_user(&*self.table, va)
    }

    fn release(&mut self, frame: PhysFrame) {
        if let Err(err) = self.frames.free(frame) {
            log_error!(target: "mm", "frame {} release failed: {:?}", frame, err);
        }
    }
}

/// Translates `va` through `table`, yielding a handle only for user-accessible pages.
pub fn translate_user<M: PageMapper + ?Sized>(table: &M, va: VirtAddr) -> Option<UserPage> {
    let (frame, flags) = table.translate(va)?;
    flags
        .contains(PageFlags::VALID | PageFlags::USER)
        .then_some(UserPage { va: va.page_base(), frame, flags })
}
