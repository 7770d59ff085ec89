// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Software page-table walker for the Sv39/Sv48/Sv57/Sv64 translation
//! schemes.
//!
//! One permission-parameterised walk serves instruction fetch, loads and
//! stores alike; [`Mmu::translate`] picks the request mask from the access
//! class. [`Mmu::translate_allocating`] is the loader-side variant that
//! materialises missing tables and leaves on the way down.

use crate::phys::{MemoryError, PhysicalMemory};
use crate::pte::{AccessFlags, PageTableEntry, PteFlags};
use crate::satp::{Mode, Satp};
use crate::{MemAccess, PAGE_BYTESIZE, PTE_BYTESIZE, PhysAddr, VirtAddr, page_offset};

/// Translation faults surfaced to the installed exception handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Exception {
    #[error("noncanonical address")]
    NoncanonicalAddress,
    #[error("invalid page table entry")]
    PteNotValid,
    #[error("writable page not readable")]
    WriteNoRead,
    #[error("no read permission")]
    NoReadPerm,
    #[error("no write permission")]
    NoWritePerm,
    #[error("no execute permission")]
    NoExecutePerm,
    #[error("no leaf pte found")]
    NoLeafPte,
    #[error("misaligned superpage")]
    MisalignedSuperpage,
    #[error("unsupported feature")]
    Unsupported,
}

/// Decides what happens on a translation fault: `true` resumes the walk as if
/// nothing happened, `false` aborts it with physical address 0.
///
/// The default handler never returns; tests install recording handlers.
pub type ExceptionHandler = Box<dyn Fn(Exception) -> bool + Send>;

/// Terminates the simulation. A fault that reaches this handler means the
/// guest accessed memory in a way no shim can patch up.
pub fn default_exception_handler(exception: Exception) -> bool {
    tracing::error!("mmu exception occured: {exception}");
    std::process::exit(1);
}

pub struct Mmu {
    // Mode and root table address are unpacked from satp on every write to
    // the register so the hot walk path does no field extraction.
    mode: Mode,
    root_table_paddr: PhysAddr,
    handler: ExceptionHandler,
}

impl Mmu {
    #[must_use]
    pub fn new() -> Self {
        Self {
            mode: Mode::Bare,
            root_table_paddr: 0,
            handler: Box::new(default_exception_handler),
        }
    }

    pub fn set_satp(&mut self, value: u64) {
        let satp = Satp::from_bits(value);
        self.mode = satp.mode().unwrap_or_else(|| {
            (self.handler)(Exception::Unsupported);
            Mode::Bare
        });
        self.root_table_paddr = satp.ppn() * PAGE_BYTESIZE;
    }

    #[must_use]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn set_exception_handler(&mut self, handler: ExceptionHandler) {
        self.handler = handler;
    }

    /// Translates `vaddr` for the given access class. Returns 0 when a fault
    /// occurred and the installed handler chose to abort the walk.
    #[must_use]
    pub fn translate(&self, pmem: &PhysicalMemory, access: MemAccess, vaddr: VirtAddr) -> PhysAddr {
        self.walk(pmem, access.request(), vaddr)
    }

    fn walk(&self, pmem: &PhysicalMemory, request: AccessFlags, vaddr: VirtAddr) -> PhysAddr {
        let Some(levels) = self.mode.levels() else {
            return vaddr;
        };
        if !self.is_canonical(vaddr) && !(self.handler)(Exception::NoncanonicalAddress) {
            return 0;
        }

        let mut table = self.root_table_paddr;
        for level in (0..levels).rev() {
            let vpn = vpn_slice(vaddr, level);
            // A PTE outside physical memory cannot be valid.
            let pte = PageTableEntry::from_bits(
                pmem.read_u64(table + vpn * PTE_BYTESIZE).unwrap_or(0),
            );

            if !pte.is_valid() && !(self.handler)(Exception::PteNotValid) {
                return 0;
            }
            if pte.flags().contains(PteFlags::WRITE)
                && !pte.flags().contains(PteFlags::READ)
                && !(self.handler)(Exception::WriteNoRead)
            {
                return 0;
            }

            if pte.is_leaf() {
                if level > 0 {
                    // Superpage: the low `level` ppn bits must be zero and
                    // are filled from the vpn slice instead.
                    let mask = (1u64 << level) - 1;
                    if pte.ppn() & mask != 0
                        && !(self.handler)(Exception::MisalignedSuperpage)
                    {
                        return 0;
                    }
                    if !self.check_permissions(pte, request) {
                        return 0;
                    }
                    return ((pte.ppn() & !mask) | (vpn & mask)) * PAGE_BYTESIZE
                        + page_offset(vaddr);
                }

                if !self.check_permissions(pte, request) {
                    return 0;
                }
                return pte.ppn() * PAGE_BYTESIZE + page_offset(vaddr);
            }

            if level == 0 {
                // Walked all levels without finding a leaf.
                (self.handler)(Exception::NoLeafPte);
                return 0;
            }
            table = pte.ppn() * PAGE_BYTESIZE;
        }
        unreachable!("walk always terminates at level 0")
    }

    /// The loader-side walk: any invalid entry on the way down gets a freshly
    /// allocated zero page, and a newly created leaf is stamped with the
    /// permissions in `request`.
    ///
    /// # Errors
    ///
    /// Fails when physical memory is exhausted or a page-table access runs
    /// out of bounds. MMU faults still go through the exception handler; an
    /// aborted walk yields `Ok(0)` like [`Mmu::translate`].
    pub fn translate_allocating(
        &self,
        pmem: &mut PhysicalMemory,
        vaddr: VirtAddr,
        request: AccessFlags,
    ) -> Result<PhysAddr, MemoryError> {
        let Some(levels) = self.mode.levels() else {
            return Ok(vaddr);
        };
        if !self.is_canonical(vaddr) && !(self.handler)(Exception::NoncanonicalAddress) {
            return Ok(0);
        }

        let mut table = self.root_table_paddr;
        for level in (0..levels).rev() {
            let vpn = vpn_slice(vaddr, level);
            let pte_paddr = table + vpn * PTE_BYTESIZE;
            let mut pte = PageTableEntry::from_bits(pmem.read_u64(pte_paddr)?);

            if !pte.is_valid() {
                let page_num = pmem.get_empty_page_number().ok_or(MemoryError::OutOfMemory)?;
                pmem.allocate_page(page_num)?;

                pte = PageTableEntry::default();
                pte.set_ppn(page_num);
                pte.insert_flags(PteFlags::VALID);
                if level == 0 {
                    pte.insert_flags(PteFlags::from_bits_truncate(request.bits()));
                }
                pmem.write_u64(pte_paddr, pte.bits())?;
            }

            if level == 0 {
                return Ok(pte.ppn() * PAGE_BYTESIZE + page_offset(vaddr));
            }
            if pte.is_leaf() {
                // An existing superpage covers this address already.
                let mask = (1u64 << level) - 1;
                return Ok(((pte.ppn() & !mask) | (vpn & mask)) * PAGE_BYTESIZE
                    + page_offset(vaddr));
            }
            table = pte.ppn() * PAGE_BYTESIZE;
        }
        unreachable!("walk always terminates at level 0")
    }

    fn check_permissions(&self, pte: PageTableEntry, request: AccessFlags) -> bool {
        if request.contains(AccessFlags::READ)
            && !pte.flags().contains(PteFlags::READ)
            && !(self.handler)(Exception::NoReadPerm)
        {
            return false;
        }
        if request.contains(AccessFlags::WRITE)
            && !pte.flags().contains(PteFlags::WRITE)
            && !(self.handler)(Exception::NoWritePerm)
        {
            return false;
        }
        if request.contains(AccessFlags::EXECUTE)
            && !pte.flags().contains(PteFlags::EXECUTE)
            && !(self.handler)(Exception::NoExecutePerm)
        {
            return false;
        }
        true
    }

    fn is_canonical(&self, vaddr: VirtAddr) -> bool {
        // The bits above the mode's address width (sign bit included) must
        // agree; Sv64 covers the full 64-bit space.
        let upper_mask = match self.mode {
            Mode::Bare | Mode::Sv64 => return true,
            Mode::Sv39 => 0xFFFF_FFC0_0000_0000u64,
            Mode::Sv48 => 0xFFFF_8000_0000_0000u64,
            Mode::Sv57 => 0xFF00_0000_0000_0000u64,
        };
        let upper = vaddr & upper_mask;
        upper == 0 || upper == upper_mask
    }
}

impl Default for Mmu {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for Mmu {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Mmu")
            .field("mode", &self.mode)
            .field("root_table_paddr", &format_args!("{:#x}", self.root_table_paddr))
            .finish()
    }
}

#[inline]
fn vpn_slice(vaddr: VirtAddr, level: u32) -> u64 {
    (vaddr >> (crate::PAGE_NUM_SHIFT + 9 * level)) & 0x1FF
}
