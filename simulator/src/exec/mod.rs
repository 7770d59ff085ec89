// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Per-opcode semantics over the hart state.
//!
//! [`step`] is the single dispatch point shared by the interpreter and the
//! JIT: the interpreter calls it per decoded instruction, the code generator
//! emits calls to [`exec_callback`] for every operation it does not lower
//! natively.

mod alu;
mod control;
mod mem;
mod system;

use crate::hart::Hart;
use crate::instruction::{DecodedInstruction, Opcode};

/// Executes one decoded instruction against the hart. The program counter is
/// advanced by the instruction itself: straight-line operations step it past
/// themselves, control transfers write it outright.
pub fn step(hart: &mut Hart, instr: &DecodedInstruction) {
    use Opcode::*;

    match instr.opcode {
        Lui => alu::lui(hart, instr),
        Auipc => alu::auipc(hart, instr),

        Jal => control::jal(hart, instr),
        Jalr => control::jalr(hart, instr),
        Beq => control::beq(hart, instr),
        Bne => control::bne(hart, instr),
        Blt => control::blt(hart, instr),
        Bge => control::bge(hart, instr),
        Bltu => control::bltu(hart, instr),
        Bgeu => control::bgeu(hart, instr),

        Lb => mem::lb(hart, instr),
        Lh => mem::lh(hart, instr),
        Lw => mem::lw(hart, instr),
        Ld => mem::ld(hart, instr),
        Lbu => mem::lbu(hart, instr),
        Lhu => mem::lhu(hart, instr),
        Lwu => mem::lwu(hart, instr),
        Sb => mem::sb(hart, instr),
        Sh => mem::sh(hart, instr),
        Sw => mem::sw(hart, instr),
        Sd => mem::sd(hart, instr),

        Addi => alu::addi(hart, instr),
        Slti => alu::slti(hart, instr),
        Sltiu => alu::sltiu(hart, instr),
        Xori => alu::xori(hart, instr),
        Ori => alu::ori(hart, instr),
        Andi => alu::andi(hart, instr),
        Slli => alu::slli(hart, instr),
        Srli => alu::srli(hart, instr),
        Srai => alu::srai(hart, instr),

        Add => alu::add(hart, instr),
        Sub => alu::sub(hart, instr),
        Sll => alu::sll(hart, instr),
        Slt => alu::slt(hart, instr),
        Sltu => alu::sltu(hart, instr),
        Xor => alu::xor(hart, instr),
        Srl => alu::srl(hart, instr),
        Sra => alu::sra(hart, instr),
        Or => alu::or(hart, instr),
        And => alu::and(hart, instr),

        Addiw => alu::addiw(hart, instr),
        Slliw => alu::slliw(hart, instr),
        Srliw => alu::srliw(hart, instr),
        Sraiw => alu::sraiw(hart, instr),

        Addw => alu::addw(hart, instr),
        Subw => alu::subw(hart, instr),
        Sllw => alu::sllw(hart, instr),
        Srlw => alu::srlw(hart, instr),
        Sraw => alu::sraw(hart, instr),

        Mul => alu::mul(hart, instr),
        Mulh => alu::mulh(hart, instr),
        Mulhsu => alu::mulhsu(hart, instr),
        Mulhu => alu::mulhu(hart, instr),
        Div => alu::div(hart, instr),
        Divu => alu::divu(hart, instr),
        Rem => alu::rem(hart, instr),
        Remu => alu::remu(hart, instr),

        Mulw => alu::mulw(hart, instr),
        Divw => alu::divw(hart, instr),
        Divuw => alu::divuw(hart, instr),
        Remw => alu::remw(hart, instr),
        Remuw => alu::remuw(hart, instr),

        Fence => system::fence(hart, instr),
        Ecall => system::ecall(hart, instr),
        Ebreak => system::ebreak(hart, instr),

        BasicBlockEnd => {}
        Invalid => system::invalid(hart, instr),
    }
}

/// C-ABI shim the generated code calls for instructions the code generator
/// does not lower natively (loads, stores, branches, syscalls, ...).
pub extern "C" fn exec_callback(hart: *mut Hart, instr: *const DecodedInstruction) {
    // Safety: generated code is only ever invoked from
    // `BasicBlock::execute_compiled` with the running hart and the block
    // body the function was compiled from; both pointers stay valid for the
    // duration of the call.
    unsafe { step(&mut *hart, &*instr) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::reg;
    use rvsim_mem::PhysicalMemory;

    fn hart() -> Hart {
        Hart::new(PhysicalMemory::new())
    }

    fn instr(opcode: Opcode, rd: usize, rs1: usize, rs2: usize, imm: i64) -> DecodedInstruction {
        DecodedInstruction {
            opcode,
            rd: rd as u8,
            rs1: rs1 as u8,
            rs2: rs2 as u8,
            shamt: (imm & 0x3F) as u8,
            imm,
        }
    }

    #[test]
    fn register_zero_swallows_writes() {
        let mut hart = hart();
        hart.set_reg(5, 7);
        for i in [
            instr(Opcode::Addi, 0, 5, 0, 42),
            instr(Opcode::Lui, 0, 0, 0, 0x1000),
            instr(Opcode::Add, 0, 5, 5, 0),
            instr(Opcode::Jal, 0, 0, 0, 8),
        ] {
            step(&mut hart, &i);
            assert_eq!(hart.reg(reg::ZERO), 0, "{:?}", i.opcode);
        }
    }

    #[test]
    fn straight_line_ops_advance_pc_by_four() {
        let mut hart = hart();
        hart.set_pc(0x1000);
        step(&mut hart, &instr(Opcode::Addi, 5, 0, 0, 1));
        assert_eq!(hart.pc(), 0x1004);
        step(&mut hart, &instr(Opcode::Fence, 0, 0, 0, 0));
        assert_eq!(hart.pc(), 0x1008);
        step(&mut hart, &instr(Opcode::Ebreak, 0, 0, 0, 0));
        assert_eq!(hart.pc(), 0x100C);
    }

    #[test]
    fn jumps_write_link_register_and_pc() {
        let mut hart = hart();
        hart.set_pc(0x1000);
        step(&mut hart, &instr(Opcode::Jal, reg::RA, 0, 0, 0x20));
        assert_eq!(hart.reg(reg::RA), 0x1004);
        assert_eq!(hart.pc(), 0x1020);

        hart.set_reg(5, 0x2003);
        step(&mut hart, &instr(Opcode::Jalr, reg::RA, 5, 0, 0));
        // The low bit of the target is cleared.
        assert_eq!(hart.pc(), 0x2002);
        assert_eq!(hart.reg(reg::RA), 0x1024);
    }

    #[test]
    fn jalr_reads_base_before_writing_link() {
        let mut hart = hart();
        hart.set_pc(0x1000);
        hart.set_reg(1, 0x4000);
        step(&mut hart, &instr(Opcode::Jalr, 1, 1, 0, 4));
        assert_eq!(hart.pc(), 0x4004);
        assert_eq!(hart.reg(1), 0x1004);
    }

    #[test]
    fn branch_taken_and_not_taken() {
        let mut hart = hart();
        hart.set_pc(0x1000);
        hart.set_reg(5, 1);
        hart.set_reg(6, 1);
        step(&mut hart, &instr(Opcode::Beq, 0, 5, 6, 0x10));
        assert_eq!(hart.pc(), 0x1010);
        step(&mut hart, &instr(Opcode::Bne, 0, 5, 6, 0x10));
        assert_eq!(hart.pc(), 0x1014);
    }

    #[test]
    fn signed_and_unsigned_compares_disagree_on_negative() {
        let mut hart = hart();
        hart.set_reg(5, u64::MAX); // -1 signed
        hart.set_reg(6, 1);
        step(&mut hart, &instr(Opcode::Slt, 7, 5, 6, 0));
        assert_eq!(hart.reg(7), 1);
        step(&mut hart, &instr(Opcode::Sltu, 7, 5, 6, 0));
        assert_eq!(hart.reg(7), 0);

        hart.set_pc(0x1000);
        step(&mut hart, &instr(Opcode::Blt, 0, 5, 6, 0x10));
        assert_eq!(hart.pc(), 0x1010);
        hart.set_pc(0x1000);
        step(&mut hart, &instr(Opcode::Bltu, 0, 5, 6, 0x10));
        assert_eq!(hart.pc(), 0x1004);
    }

    #[test]
    fn shifts_mask_their_amount() {
        let mut hart = hart();
        hart.set_reg(5, 1);
        hart.set_reg(6, 65); // masked to 1
        step(&mut hart, &instr(Opcode::Sll, 7, 5, 6, 0));
        assert_eq!(hart.reg(7), 2);

        hart.set_reg(5, 0x8000_0000_0000_0000);
        step(&mut hart, &instr(Opcode::Sra, 7, 5, 6, 0));
        assert_eq!(hart.reg(7), 0xC000_0000_0000_0000);
        step(&mut hart, &instr(Opcode::Srl, 7, 5, 6, 0));
        assert_eq!(hart.reg(7), 0x4000_0000_0000_0000);
    }

    #[test]
    fn word_ops_sign_extend_their_result() {
        let mut hart = hart();
        hart.set_reg(5, 0x7FFF_FFFF);
        step(&mut hart, &instr(Opcode::Addiw, 6, 5, 0, 1));
        assert_eq!(hart.reg(6), 0xFFFF_FFFF_8000_0000);

        hart.set_reg(5, 0xFFFF_FFFF);
        hart.set_reg(6, 1);
        step(&mut hart, &instr(Opcode::Addw, 7, 5, 6, 0));
        assert_eq!(hart.reg(7), 0);

        hart.set_reg(5, 0x8000_0000);
        step(&mut hart, &instr(Opcode::Sraiw, 7, 5, 0, 4));
        assert_eq!(hart.reg(7), 0xFFFF_FFFF_F800_0000);
    }

    #[test]
    fn mulh_variants() {
        let mut hart = hart();
        hart.set_reg(5, u64::MAX); // -1 signed
        hart.set_reg(6, u64::MAX);
        step(&mut hart, &instr(Opcode::Mulh, 7, 5, 6, 0));
        assert_eq!(hart.reg(7), 0); // (-1) * (-1) = 1, high bits 0
        step(&mut hart, &instr(Opcode::Mulhu, 7, 5, 6, 0));
        assert_eq!(hart.reg(7), 0xFFFF_FFFF_FFFF_FFFE);
        step(&mut hart, &instr(Opcode::Mulhsu, 7, 5, 6, 0));
        assert_eq!(hart.reg(7), u64::MAX); // -1 * UMAX, high = -1
    }

    #[test]
    fn division_special_cases_follow_the_isa() {
        let mut hart = hart();

        // Division by zero.
        hart.set_reg(5, 42);
        hart.set_reg(6, 0);
        step(&mut hart, &instr(Opcode::Div, 7, 5, 6, 0));
        assert_eq!(hart.reg(7), u64::MAX);
        step(&mut hart, &instr(Opcode::Divu, 7, 5, 6, 0));
        assert_eq!(hart.reg(7), u64::MAX);
        step(&mut hart, &instr(Opcode::Rem, 7, 5, 6, 0));
        assert_eq!(hart.reg(7), 42);
        step(&mut hart, &instr(Opcode::Remu, 7, 5, 6, 0));
        assert_eq!(hart.reg(7), 42);

        // Signed overflow: INT_MIN / -1.
        hart.set_reg(5, i64::MIN as u64);
        hart.set_reg(6, u64::MAX);
        step(&mut hart, &instr(Opcode::Div, 7, 5, 6, 0));
        assert_eq!(hart.reg(7), i64::MIN as u64);
        step(&mut hart, &instr(Opcode::Rem, 7, 5, 6, 0));
        assert_eq!(hart.reg(7), 0);

        // The 32-bit forms work on the truncated operands.
        hart.set_reg(5, u64::from(i32::MIN as u32));
        hart.set_reg(6, 0xFFFF_FFFF);
        step(&mut hart, &instr(Opcode::Divw, 7, 5, 6, 0));
        assert_eq!(hart.reg(7), i64::from(i32::MIN) as u64);
        step(&mut hart, &instr(Opcode::Remw, 7, 5, 6, 0));
        assert_eq!(hart.reg(7), 0);
    }

    #[test]
    fn loads_and_stores_round_trip() {
        let mut hart = hart();
        let vaddr = 0x10_0000u64;
        hart.translate_allocating(
            vaddr,
            rvsim_mem::AccessFlags::READ | rvsim_mem::AccessFlags::WRITE,
        )
        .unwrap();

        hart.set_reg(5, vaddr);
        hart.set_reg(6, 0xDEAD_BEEF_CAFE_F00D);
        step(&mut hart, &instr(Opcode::Sd, 0, 5, 6, 0));
        step(&mut hart, &instr(Opcode::Ld, 7, 5, 0, 0));
        assert_eq!(hart.reg(7), 0xDEAD_BEEF_CAFE_F00D);

        // Sub-word loads sign- or zero-extend.
        step(&mut hart, &instr(Opcode::Lw, 7, 5, 0, 0));
        assert_eq!(hart.reg(7), 0xFFFF_FFFF_CAFE_F00D);
        step(&mut hart, &instr(Opcode::Lwu, 7, 5, 0, 0));
        assert_eq!(hart.reg(7), 0xCAFE_F00D);
        step(&mut hart, &instr(Opcode::Lb, 7, 5, 0, 1));
        assert_eq!(hart.reg(7), 0xFFFF_FFFF_FFFF_FFF0);
        step(&mut hart, &instr(Opcode::Lbu, 7, 5, 0, 1));
        assert_eq!(hart.reg(7), 0xF0);
    }
}
