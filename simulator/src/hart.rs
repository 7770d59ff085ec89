// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The simulated hardware thread.

use std::sync::Arc;

use rvsim_mem::{
    AccessFlags, MemAccess, MemoryError, Mmu, Mode, PAGE_BYTESIZE, PAGE_NUM_SHIFT, PhysAddr,
    PhysicalMemory, Satp, Tlb, VirtAddr, page_number, page_offset,
};

use crate::bb::{BasicBlock, BlockCache, MAX_BLOCK_SIZE};
use crate::instruction::{DecodedInstruction, reg};
use crate::jit::Compiler;
use crate::{CSR_COUNT, CSR_SATP_INDEX, INSTRUCTION_BYTESIZE, decoder, dispatcher};

/// One simulated RV64 hart: the architectural register file and program
/// counter plus the machinery that feeds them (MMU, TLBs, block cache and
/// the tiered execution driver).
///
/// The layout is `repr(C)` with the register file and program counter up
/// front: generated code addresses both through fixed offsets from the hart
/// pointer.
#[repr(C)]
pub struct Hart {
    regs: [u64; reg::COUNT],
    pc: VirtAddr,

    // Fields below are never touched by generated code.
    csrs: Box<[u64]>,
    pmem: PhysicalMemory,
    mmu: Mmu,
    tlb: Tlb,
    block_cache: Arc<BlockCache>,
    compiler: Compiler,
}

/// Byte offset of the register file inside [`Hart`], for the code generator.
pub(crate) const HART_REGS_OFFSET: usize = core::mem::offset_of!(Hart, regs);
/// Byte offset of the program counter inside [`Hart`], for the code
/// generator.
pub(crate) const HART_PC_OFFSET: usize = core::mem::offset_of!(Hart, pc);

impl Hart {
    /// Creates a hart over `pmem`, sets up an Sv48 address space with a
    /// freshly allocated root table and spawns the JIT worker.
    #[must_use]
    pub fn new(mut pmem: PhysicalMemory) -> Self {
        let root_ppn = pmem
            .get_empty_page_number()
            .expect("physical memory has no free page for the root table");
        pmem.allocate_page(root_ppn)
            .expect("root table page number is in range");

        let satp = Satp::new(Mode::Sv48, 0, root_ppn);
        let mut csrs = vec![0u64; CSR_COUNT].into_boxed_slice();
        csrs[CSR_SATP_INDEX] = satp.bits();

        let mut mmu = Mmu::new();
        mmu.set_satp(satp.bits());

        let block_cache = Arc::new(BlockCache::new());
        let compiler = Compiler::new(Arc::clone(&block_cache));

        Self {
            regs: [0; reg::COUNT],
            pc: 0,
            csrs,
            pmem,
            mmu,
            tlb: Tlb::new(),
            block_cache,
            compiler,
        }
    }

    #[inline]
    #[must_use]
    pub fn reg(&self, index: usize) -> u64 {
        self.regs[index]
    }

    #[inline]
    pub fn set_reg(&mut self, index: usize, value: u64) {
        self.regs[index] = value;
        // x0 is hardwired to zero; unconditionally restoring it beats a
        // branch in every executor.
        self.regs[reg::ZERO] = 0;
    }

    #[inline]
    #[must_use]
    pub fn pc(&self) -> VirtAddr {
        self.pc
    }

    #[inline]
    pub fn set_pc(&mut self, pc: VirtAddr) {
        self.pc = pc;
    }

    #[inline]
    pub fn advance_pc(&mut self) {
        self.pc = self.pc.wrapping_add(INSTRUCTION_BYTESIZE);
    }

    #[must_use]
    pub fn csr(&self, index: usize) -> u64 {
        self.csrs[index]
    }

    pub fn set_csr(&mut self, index: usize, value: u64) {
        self.csrs[index] = value;
    }

    #[must_use]
    pub fn mmu(&self) -> &Mmu {
        &self.mmu
    }

    pub fn mmu_mut(&mut self) -> &mut Mmu {
        &mut self.mmu
    }

    #[must_use]
    pub fn pmem(&self) -> &PhysicalMemory {
        &self.pmem
    }

    pub fn pmem_mut(&mut self) -> &mut PhysicalMemory {
        &mut self.pmem
    }

    #[must_use]
    pub fn block_cache(&self) -> &BlockCache {
        &self.block_cache
    }

    /// Translates a guest virtual address, consulting the access class's TLB
    /// first and walking the page tables on a miss.
    #[must_use]
    pub fn phys_addr(&mut self, access: MemAccess, vaddr: VirtAddr) -> PhysAddr {
        let vpn = vaddr >> PAGE_NUM_SHIFT;
        if let Some(ppn) = self.tlb.find(access, vpn) {
            return ppn * PAGE_BYTESIZE + page_offset(vaddr);
        }
        let paddr = self.mmu.translate(&self.pmem, access, vaddr);
        self.tlb.insert(access, vpn, page_number(paddr));
        paddr
    }

    /// Loader-side translation that creates any missing tables and pages.
    ///
    /// # Errors
    ///
    /// Propagates [`MemoryError`] when physical memory is exhausted or a
    /// page-table access leaves physical memory.
    pub fn translate_allocating(
        &mut self,
        vaddr: VirtAddr,
        request: AccessFlags,
    ) -> Result<PhysAddr, MemoryError> {
        self.mmu.translate_allocating(&mut self.pmem, vaddr, request)
    }

    /// Reads and decodes straight-line guest code at the current program
    /// counter until the first control transfer, the block size limit or the
    /// end of the containing page, whichever comes first.
    fn fetch_basic_block(&mut self) -> BasicBlock {
        const MAX_BLOCK_BYTESIZE: usize = MAX_BLOCK_SIZE * INSTRUCTION_BYTESIZE as usize;

        let entrypoint = self.pc;
        let paddr = self.phys_addr(MemAccess::Fetch, entrypoint);

        // Never read past the block's page: the rest of the block may not be
        // physically contiguous.
        let until_page_end = (PAGE_BYTESIZE - page_offset(paddr)) as usize;
        let read_bytesize = until_page_end.min(MAX_BLOCK_BYTESIZE);
        let instr_count = read_bytesize / INSTRUCTION_BYTESIZE as usize;

        let mut window = [0u8; MAX_BLOCK_BYTESIZE];
        if let Err(err) = self.pmem.read(paddr, &mut window[..read_bytesize]) {
            tracing::error!("instruction fetch at {entrypoint:#x} failed: {err}");
            std::process::exit(1);
        }

        let mut body = Vec::with_capacity(instr_count + 1);
        for encoded in window[..read_bytesize]
            .chunks_exact(INSTRUCTION_BYTESIZE as usize)
            .map(|chunk| u32::from_le_bytes(chunk.try_into().unwrap()))
        {
            let instr = decoder::decode(encoded);
            let is_control_transfer = instr.opcode.is_control_transfer();
            body.push(instr);
            if is_control_transfer {
                break;
            }
        }
        body.push(DecodedInstruction::BLOCK_END);

        BasicBlock::new(entrypoint, body)
    }

    /// The cached block for the current program counter, fetching and
    /// decoding it on a miss.
    pub fn get_basic_block(&mut self) -> Arc<BasicBlock> {
        if let Some(block) = self.block_cache.find(self.pc) {
            return block;
        }
        let block = self.fetch_basic_block();
        self.block_cache.insert(block)
    }

    /// Runs one block through the tier the compiler picks: the compiled
    /// entry when it is published, the interpreter otherwise.
    pub fn execute_basic_block(&mut self, block: &BasicBlock) {
        if self.compiler.decrement_hotness_counter(block) {
            block.execute_compiled(self);
        } else {
            dispatcher::dispatch_execute(self, block.body());
        }
    }

    /// Drives the fetch/execute loop until the guest exits (pc = 0).
    /// Returns the number of simulated instructions.
    pub fn run(&mut self) -> u64 {
        let mut retired: u64 = 0;
        while self.pc != 0 {
            let block = self.get_basic_block();
            self.execute_basic_block(&block);
            retired += block.instr_count() as u64;
        }
        retired
    }
}

impl core::fmt::Debug for Hart {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Hart")
            .field("pc", &format_args!("{:#x}", self.pc))
            .field("mmu", &self.mmu)
            .finish()
    }
}
