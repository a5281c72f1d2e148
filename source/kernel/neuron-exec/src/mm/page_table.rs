// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Sv39 page-table implementation with lazy allocation of intermediate levels.

extern crate alloc;

use alloc::{boxed::Box, vec, vec::Vec};
use core::ptr::NonNull;

use bitflags::bitflags;
use static_assertions::const_assert_eq;

use super::frame::PhysFrame;
use crate::types::VirtAddr;

/// Size of a single page in bytes.
pub const PAGE_SIZE: usize = 4096;
/// Number of entries per Sv39 page-table page.
const PT_ENTRIES: usize = 512;
const PPN_SHIFT: usize = 10;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    /// Flags stored in Sv39 page-table entries.
    pub struct PageFlags: usize {
        const VALID = 1 << 0;
        const READ = 1 << 1;
        const WRITE = 1 << 2;
        const EXECUTE = 1 << 3;
        const USER = 1 << 4;
        const GLOBAL = 1 << 5;
        const ACCESSED = 1 << 6;
        const DIRTY = 1 << 7;
    }
}

const LEAF_PERMS: PageFlags = PageFlags::READ.union(PageFlags::WRITE).union(PageFlags::EXECUTE);
const FLAG_MASK: usize = (1 << PPN_SHIFT) - 1;

/// Error returned when manipulating page tables.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MapError {
    /// Virtual or physical address was not page aligned.
    Unaligned,
    /// Mapping extends beyond the canonical Sv39 range.
    OutOfRange,
    /// Install refused (failpoint or policy).
    PermissionDenied,
    /// Mapping collides with an existing entry.
    Overlap,
    /// Flags do not describe a valid leaf entry.
    InvalidFlags,
    /// No leaf entry exists at the address.
    NotMapped,
}

/// Page-granular mapping capability consumed by the user mapper.
///
/// `PageTable` is the in-tree implementation; tests substitute instrumented doubles.
pub trait PageMapper {
    /// Installs one 4 KiB leaf mapping `va -> frame`.
    fn install(&mut self, va: VirtAddr, frame: PhysFrame, flags: PageFlags) -> Result<(), MapError>;

    /// Returns the frame and flags backing the page at `va`.
    fn translate(&self, va: VirtAddr) -> Option<(PhysFrame, PageFlags)>;

    /// Removes the leaf at `va` and returns the frame it referenced.
    fn remove(&mut self, va: VirtAddr) -> Result<PhysFrame, MapError>;
}

#[repr(align(4096))]
struct PageTablePage {
    entries: [usize; PT_ENTRIES],
}

const_assert_eq!(core::mem::size_of::<PageTablePage>(), PAGE_SIZE);

impl PageTablePage {
    const fn new() -> Self {
        Self { entries: [0; PT_ENTRIES] }
    }
}

/// Three-level Sv39 page table allocating intermediate levels on demand.
pub struct PageTable {
    root: NonNull<PageTablePage>,
    owned: Vec<NonNull<PageTablePage>>,
}

impl PageTable {
    /// Creates an empty Sv39 page table with a fresh root page.
    pub fn new() -> Self {
        let root = Self::alloc_page();
        Self { root, owned: vec![root] }
    }

    /// Looks up the raw leaf entry mapped at `va` if it exists.
    pub fn lookup(&self, va: usize) -> Option<usize> {
        if va % PAGE_SIZE != 0 || !is_canonical_sv39(va) {
            return None;
        }
        // SAFETY: `leaf_slot` only yields pointers into pages owned by `self`.
        self.leaf_slot(va).map(|slot| unsafe { *slot.as_ptr() })
    }

    /// Installs a 4 KiB mapping from `va` to `pa` using `flags`.
    pub fn map(&mut self, va: usize, pa: usize, flags: PageFlags) -> Result<(), MapError> {
        if va % PAGE_SIZE != 0 || pa % PAGE_SIZE != 0 {
            return Err(MapError::Unaligned);
        }
        if !is_canonical_sv39(va) {
            return Err(MapError::OutOfRange);
        }
        if flags.intersection(LEAF_PERMS).is_empty() || !flags.contains(PageFlags::VALID) {
            return Err(MapError::InvalidFlags);
        }
        #[cfg(feature = "failpoints")]
        if super::failpoints::take_deny() {
            return Err(MapError::PermissionDenied);
        }

        let indices = vpn_indices(va);
        let mut table = self.root;
        for (level, index) in indices.iter().enumerate() {
            // SAFETY: `table` is either the root or a page allocated by `alloc_page` and
            // recorded in `owned`; both live as long as `self`.
            let entry = unsafe { &mut (*table.as_ptr()).entries[*index] };
            if level == indices.len() - 1 {
                if *entry & PageFlags::VALID.bits() != 0 {
                    return Err(MapError::Overlap);
                }
                *entry = ((pa / PAGE_SIZE) << PPN_SHIFT) | flags.bits();
                return Ok(());
            }

            if *entry & PageFlags::VALID.bits() != 0 {
                if *entry & LEAF_PERMS.bits() != 0 {
                    return Err(MapError::Overlap);
                }
                table = next_level(*entry).ok_or(MapError::OutOfRange)?;
                continue;
            }

            let next = Self::alloc_page();
            self.owned.push(next);
            let ppn = next.as_ptr() as usize / PAGE_SIZE;
            *entry = (ppn << PPN_SHIFT) | PageFlags::VALID.bits();
            table = next;
        }
        Ok(())
    }

    /// Clears the leaf at `va` and returns the physical address it pointed to.
    ///
    /// Intermediate tables stay allocated; they are reclaimed when the table is dropped.
    pub fn unmap(&mut self, va: usize) -> Result<usize, MapError> {
        if va % PAGE_SIZE != 0 {
            return Err(MapError::Unaligned);
        }
        if !is_canonical_sv39(va) {
            return Err(MapError::OutOfRange);
        }
        let slot = self.leaf_slot(va).ok_or(MapError::NotMapped)?;
        // SAFETY: see `lookup`; `&mut self` guarantees exclusive access to the entry.
        let entry = unsafe { core::ptr::replace(slot.as_ptr(), 0) };
        flush_page(va);
        Ok(entry_pa(entry))
    }

    /// Calls `f(va, pa, flags)` for every 4 KiB leaf, in ascending table order.
    pub fn for_each_leaf(&self, mut f: impl FnMut(usize, usize, PageFlags)) {
        for (i2, l1) in self.branches(self.root) {
            for (i1, l0) in self.branches(l1) {
                // SAFETY: `l0` was reached through a valid non-leaf entry owned by `self`.
                let entries = unsafe { &(*l0.as_ptr()).entries };
                for (i0, entry) in entries.iter().enumerate() {
                    if *entry & PageFlags::VALID.bits() == 0 || *entry & LEAF_PERMS.bits() == 0 {
                        continue;
                    }
                    let va = sign_extend((i2 << 30) | (i1 << 21) | (i0 << 12));
                    f(va, entry_pa(*entry), PageFlags::from_bits_truncate(*entry & FLAG_MASK));
                }
            }
        }
    }

    /// Valid non-leaf entries of `table` with their index.
    fn branches<'a>(
        &'a self,
        table: NonNull<PageTablePage>,
    ) -> impl Iterator<Item = (usize, NonNull<PageTablePage>)> + 'a {
        // SAFETY: callers pass the root or a page reached through a valid entry; every
        // such page is owned by `self` and lives as long as the borrow.
        let entries: &'a [usize; PT_ENTRIES] = unsafe { &(*table.as_ptr()).entries };
        entries.iter().enumerate().filter_map(|(index, entry)| {
            let branch = *entry & PageFlags::VALID.bits() != 0 && *entry & LEAF_PERMS.bits() == 0;
            if branch {
                next_level(*entry).map(|next| (index, next))
            } else {
                None
            }
        })
    }

    /// Walks to the valid leaf entry for `va`.
    fn leaf_slot(&self, va: usize) -> Option<NonNull<usize>> {
        let indices = vpn_indices(va);
        let mut table = self.root;
        for (level, index) in indices.iter().enumerate() {
            // SAFETY: every table reached here is owned by `self`.
            let slot = unsafe { core::ptr::addr_of_mut!((*table.as_ptr()).entries[*index]) };
            // SAFETY: `slot` points into a live page.
            let entry = unsafe { *slot };
            if entry & PageFlags::VALID.bits() == 0 {
                return None;
            }
            let is_leaf = entry & LEAF_PERMS.bits() != 0;
            if level == indices.len() - 1 {
                return if is_leaf { NonNull::new(slot) } else { None };
            }
            if is_leaf {
                return None;
            }
            table = next_level(entry)?;
        }
        None
    }

    fn alloc_page() -> NonNull<PageTablePage> {
        let boxed = Box::new(PageTablePage::new());
        // SAFETY: Box never yields a null pointer.
        unsafe { NonNull::new_unchecked(Box::into_raw(boxed)) }
    }
}

impl Default for PageTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PageMapper for PageTable {
    fn install(&mut self, va: VirtAddr, frame: PhysFrame, flags: PageFlags) -> Result<(), MapError> {
        self.map(va.raw(), frame.base(), flags)
    }

    fn translate(&self, va: VirtAddr) -> Option<(PhysFrame, PageFlags)> {
        let entry = self.lookup(va.page_base().raw())?;
        let frame = PhysFrame::from_base(entry_pa(entry))?;
        Some((frame, PageFlags::from_bits_truncate(entry & FLAG_MASK)))
    }

    fn remove(&mut self, va: VirtAddr) -> Result<PhysFrame, MapError> {
        let pa = self.unmap(va.raw())?;
        PhysFrame::from_base(pa).ok_or(MapError::Unaligned)
    }
}

impl Drop for PageTable {
    fn drop(&mut self) {
        for page in self.owned.drain(..) {
            // SAFETY: every pointer originates from `alloc_page` and is unique.
            unsafe { drop(Box::from_raw(page.as_ptr())) };
        }
    }
}

fn next_level(entry: usize) -> Option<NonNull<PageTablePage>> {
    NonNull::new(entry_pa(entry) as *mut PageTablePage)
}

const fn entry_pa(entry: usize) -> usize {
    (entry >> PPN_SHIFT) * PAGE_SIZE
}

/// Table indices from the root (VPN[2]) down to the leaf level (VPN[0]).
fn vpn_indices(va: usize) -> [usize; 3] {
    let vpn0 = (va >> 12) & 0x1ff;
    let vpn1 = (va >> 21) & 0x1ff;
    let vpn2 = (va >> 30) & 0x1ff;
    [vpn2, vpn1, vpn0]
}

/// Copies bit 38 into the upper bits of a 39-bit address.
const fn sign_extend(va: usize) -> usize {
    if va & (1 << 38) != 0 {
        va | !((1 << 39) - 1)
    } else {
        va
    }
}

pub(crate) fn is_canonical_sv39(va: usize) -> bool {
    let sign = (va >> 38) & 1;
    let upper = va >> 39;
    if sign == 0 {
        upper == 0
    } else {
        upper == usize::MAX >> 39
    }
}

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
fn flush_page(va: usize) {
    // Stale translations must not survive the unmap of a user page.
    #[allow(unused_unsafe)]
    unsafe {
        riscv::asm::sfence_vma(0, va);
    }
}

#[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
fn flush_page(_va: usize) {}
