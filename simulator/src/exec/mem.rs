// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Loads and stores.
//!
//! Addresses are translated through the read/write TLBs; multi-byte accesses
//! must be naturally aligned. A block never spans a page at fetch time and
//! aligned accesses never span one either, so each access is a single
//! physical read or write.

use rvsim_mem::MemAccess;

use crate::hart::Hart;
use crate::instruction::DecodedInstruction;

fn check_alignment(vaddr: u64, size: u64) {
    if vaddr % size != 0 {
        tracing::error!("unaligned {size}-byte guest access at {vaddr:#x}");
        std::process::exit(1);
    }
}

fn load(hart: &mut Hart, instr: &DecodedInstruction, size: usize) -> u64 {
    let vaddr = hart
        .reg(usize::from(instr.rs1))
        .wrapping_add(instr.imm as u64);
    if size > 1 {
        check_alignment(vaddr, size as u64);
    }
    let paddr = hart.phys_addr(MemAccess::Read, vaddr);

    let mut buf = [0u8; 8];
    if let Err(err) = hart.pmem().read(paddr, &mut buf[..size]) {
        tracing::error!("guest load failed: {err}");
        std::process::exit(1);
    }
    u64::from_le_bytes(buf)
}

fn store(hart: &mut Hart, instr: &DecodedInstruction, size: usize) {
    let vaddr = hart
        .reg(usize::from(instr.rs1))
        .wrapping_add(instr.imm as u64);
    if size > 1 {
        check_alignment(vaddr, size as u64);
    }
    let paddr = hart.phys_addr(MemAccess::Write, vaddr);

    let value = hart.reg(usize::from(instr.rs2)).to_le_bytes();
    if let Err(err) = hart.pmem_mut().write(paddr, &value[..size]) {
        tracing::error!("guest store failed: {err}");
        std::process::exit(1);
    }
    hart.advance_pc();
}

/// Sign-extends the low `bits` of a loaded value.
#[inline]
fn sext(value: u64, bits: u32) -> u64 {
    let shift = 64 - bits;
    (((value << shift) as i64) >> shift) as u64
}

pub(super) fn lb(hart: &mut Hart, instr: &DecodedInstruction) {
    let value = load(hart, instr, 1);
    hart.set_reg(usize::from(instr.rd), sext(value, 8));
    hart.advance_pc();
}

pub(super) fn lh(hart: &mut Hart, instr: &DecodedInstruction) {
    let value = load(hart, instr, 2);
    hart.set_reg(usize::from(instr.rd), sext(value, 16));
    hart.advance_pc();
}

pub(super) fn lw(hart: &mut Hart, instr: &DecodedInstruction) {
    let value = load(hart, instr, 4);
    hart.set_reg(usize::from(instr.rd), sext(value, 32));
    hart.advance_pc();
}

pub(super) fn ld(hart: &mut Hart, instr: &DecodedInstruction) {
    let value = load(hart, instr, 8);
    hart.set_reg(usize::from(instr.rd), value);
    hart.advance_pc();
}

pub(super) fn lbu(hart: &mut Hart, instr: &DecodedInstruction) {
    let value = load(hart, instr, 1);
    hart.set_reg(usize::from(instr.rd), value);
    hart.advance_pc();
}

pub(super) fn lhu(hart: &mut Hart, instr: &DecodedInstruction) {
    let value = load(hart, instr, 2);
    hart.set_reg(usize::from(instr.rd), value);
    hart.advance_pc();
}

pub(super) fn lwu(hart: &mut Hart, instr: &DecodedInstruction) {
    let value = load(hart, instr, 4);
    hart.set_reg(usize::from(instr.rd), value);
    hart.advance_pc();
}

pub(super) fn sb(hart: &mut Hart, instr: &DecodedInstruction) {
    store(hart, instr, 1);
}

pub(super) fn sh(hart: &mut Hart, instr: &DecodedInstruction) {
    store(hart, instr, 2);
}

pub(super) fn sw(hart: &mut Hart, instr: &DecodedInstruction) {
    store(hart, instr, 4);
}

pub(super) fn sd(hart: &mut Hart, instr: &DecodedInstruction) {
    store(hart, instr, 8);
}
