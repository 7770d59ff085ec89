// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Guest memory subsystem: physical memory, page-table walker and
//! translation lookaside buffers for a user-mode RV64 simulator.
//!
//! Physical addresses returned by the [`Mmu`] are plain byte offsets into
//! [`PhysicalMemory`]; no host-pointer arithmetic is involved anywhere in
//! this crate.

pub mod mmu;
pub mod phys;
pub mod pte;
pub mod satp;
pub mod tlb;

pub use mmu::{Exception, Mmu};
pub use phys::{MemoryError, PhysicalMemory};
pub use pte::{AccessFlags, PageTableEntry, PteFlags};
pub use satp::{Mode, Satp};
pub use tlb::Tlb;

/// A guest virtual address.
pub type VirtAddr = u64;
/// An offset into guest physical memory.
pub type PhysAddr = u64;

pub const PAGE_BYTESIZE: u64 = 1 << 12; // 4 KiB
pub const PHYS_MEMORY_BYTESIZE: u64 = 1 << 30; // 1 GiB
pub const PHYS_PAGE_COUNT: u64 = PHYS_MEMORY_BYTESIZE / PAGE_BYTESIZE;

pub const PAGE_NUM_SHIFT: u32 = 12;
pub const PAGE_OFFSET_MASK: u64 = 0xFFF;

/// Size of a single page-table entry in guest memory.
pub const PTE_BYTESIZE: u64 = 8;

#[inline]
#[must_use]
pub fn page_number(addr: u64) -> u64 {
    addr >> PAGE_NUM_SHIFT
}

#[inline]
#[must_use]
pub fn page_offset(addr: u64) -> u64 {
    addr & PAGE_OFFSET_MASK
}

/// The access class of a memory request, selecting both the permission bits
/// demanded from a leaf PTE and the TLB that caches the translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemAccess {
    /// Instruction fetch.
    Fetch,
    /// Data load.
    Read,
    /// Data store.
    Write,
}

impl MemAccess {
    /// The permission bits a leaf PTE must carry to satisfy this access.
    #[must_use]
    pub fn request(self) -> AccessFlags {
        match self {
            // Fetched memory must be both readable and executable.
            MemAccess::Fetch => AccessFlags::READ | AccessFlags::EXECUTE,
            MemAccess::Read => AccessFlags::READ,
            MemAccess::Write => AccessFlags::WRITE,
        }
    }
}
