// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Jumps and conditional branches.

use crate::INSTRUCTION_BYTESIZE;
use crate::hart::Hart;
use crate::instruction::DecodedInstruction;

pub(super) fn jal(hart: &mut Hart, instr: &DecodedInstruction) {
    let pc = hart.pc();
    hart.set_reg(usize::from(instr.rd), pc.wrapping_add(INSTRUCTION_BYTESIZE));
    hart.set_pc(pc.wrapping_add(instr.imm as u64));
}

pub(super) fn jalr(hart: &mut Hart, instr: &DecodedInstruction) {
    // The target is computed before the link write; rd and rs1 may alias.
    let target = hart
        .reg(usize::from(instr.rs1))
        .wrapping_add(instr.imm as u64)
        & !1;
    let link = hart.pc().wrapping_add(INSTRUCTION_BYTESIZE);
    hart.set_reg(usize::from(instr.rd), link);
    hart.set_pc(target);
}

#[inline]
fn branch(hart: &mut Hart, instr: &DecodedInstruction, taken: bool) {
    if taken {
        hart.set_pc(hart.pc().wrapping_add(instr.imm as u64));
    } else {
        hart.advance_pc();
    }
}

#[inline]
fn operands(hart: &Hart, instr: &DecodedInstruction) -> (u64, u64) {
    (
        hart.reg(usize::from(instr.rs1)),
        hart.reg(usize::from(instr.rs2)),
    )
}

pub(super) fn beq(hart: &mut Hart, instr: &DecodedInstruction) {
    let (lhs, rhs) = operands(hart, instr);
    branch(hart, instr, lhs == rhs);
}

pub(super) fn bne(hart: &mut Hart, instr: &DecodedInstruction) {
    let (lhs, rhs) = operands(hart, instr);
    branch(hart, instr, lhs != rhs);
}

pub(super) fn blt(hart: &mut Hart, instr: &DecodedInstruction) {
    let (lhs, rhs) = operands(hart, instr);
    branch(hart, instr, (lhs as i64) < (rhs as i64));
}

pub(super) fn bge(hart: &mut Hart, instr: &DecodedInstruction) {
    let (lhs, rhs) = operands(hart, instr);
    branch(hart, instr, (lhs as i64) >= (rhs as i64));
}

pub(super) fn bltu(hart: &mut Hart, instr: &DecodedInstruction) {
    let (lhs, rhs) = operands(hart, instr);
    branch(hart, instr, lhs < rhs);
}

pub(super) fn bgeu(hart: &mut Hart, instr: &DecodedInstruction) {
    let (lhs, rhs) = operands(hart, instr);
    branch(hart, instr, lhs >= rhs);
}
