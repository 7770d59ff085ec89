#![allow(dead_code, reason = "each test binary uses a subset of these helpers")]

//! Hand-rolled encoders for the handful of instructions the end-to-end
//! guest programs need, plus a harness that maps them into a fresh hart.

use rvsim::Hart;
use rvsim::os::stack::{DEFAULT_STACK_ADDRESS, STACK_BYTESIZE, allocate_stack};
use rvsim_mem::{AccessFlags, PhysicalMemory};

fn r_type(funct7: u32, rs2: u32, rs1: u32, funct3: u32, rd: u32, opcode: u32) -> u32 {
    funct7 << 25 | rs2 << 20 | rs1 << 15 | funct3 << 12 | rd << 7 | opcode
}

fn i_type(imm: i32, rs1: u32, funct3: u32, rd: u32, opcode: u32) -> u32 {
    ((imm as u32) & 0xFFF) << 20 | rs1 << 15 | funct3 << 12 | rd << 7 | opcode
}

fn s_type(imm: i32, rs2: u32, rs1: u32, funct3: u32, opcode: u32) -> u32 {
    let imm = imm as u32;
    ((imm >> 5) & 0x7F) << 25 | rs2 << 20 | rs1 << 15 | funct3 << 12 | (imm & 0x1F) << 7 | opcode
}

fn b_type(imm: i32, rs2: u32, rs1: u32, funct3: u32, opcode: u32) -> u32 {
    let imm = imm as u32;
    ((imm >> 12) & 0x1) << 31
        | ((imm >> 5) & 0x3F) << 25
        | rs2 << 20
        | rs1 << 15
        | funct3 << 12
        | ((imm >> 1) & 0xF) << 8
        | ((imm >> 11) & 0x1) << 7
        | opcode
}

pub fn addi(rd: u32, rs1: u32, imm: i32) -> u32 {
    i_type(imm, rs1, 0b000, rd, 0b001_0011)
}

pub fn add(rd: u32, rs1: u32, rs2: u32) -> u32 {
    r_type(0, rs2, rs1, 0b000, rd, 0b011_0011)
}

pub fn mul(rd: u32, rs1: u32, rs2: u32) -> u32 {
    r_type(1, rs2, rs1, 0b000, rd, 0b011_0011)
}

pub fn sw(rs2: u32, rs1: u32, imm: i32) -> u32 {
    s_type(imm, rs2, rs1, 0b010, 0b010_0011)
}

pub fn lw(rd: u32, rs1: u32, imm: i32) -> u32 {
    i_type(imm, rs1, 0b010, rd, 0b000_0011)
}

pub fn beq(rs1: u32, rs2: u32, imm: i32) -> u32 {
    b_type(imm, rs2, rs1, 0b000, 0b110_0011)
}

pub fn bne(rs1: u32, rs2: u32, imm: i32) -> u32 {
    b_type(imm, rs2, rs1, 0b001, 0b110_0011)
}

pub fn ecall() -> u32 {
    0b111_0011
}

pub const CODE_VADDR: u64 = 0x1_0000;

/// A hart with `words` mapped read/execute at [`CODE_VADDR`], a full stack,
/// and the program counter on the first instruction.
pub fn hart_with_program(words: &[u32]) -> Hart {
    let mut hart = Hart::new(PhysicalMemory::new());

    for (i, word) in words.iter().enumerate() {
        let vaddr = CODE_VADDR + i as u64 * 4;
        let paddr = hart
            .translate_allocating(vaddr, AccessFlags::READ | AccessFlags::EXECUTE)
            .expect("program fits into guest memory");
        hart.pmem_mut()
            .write(paddr, &word.to_le_bytes())
            .expect("code page is in bounds");
    }

    allocate_stack(&mut hart, DEFAULT_STACK_ADDRESS, STACK_BYTESIZE)
        .expect("stack fits into guest memory");

    hart.set_pc(CODE_VADDR);
    hart
}

/// Copies raw bytes into freshly mapped read/write guest pages.
pub fn write_guest_data(hart: &mut Hart, vaddr: u64, bytes: &[u8]) {
    for (i, byte) in bytes.iter().enumerate() {
        let paddr = hart
            .translate_allocating(vaddr + i as u64, AccessFlags::READ | AccessFlags::WRITE)
            .expect("data fits into guest memory");
        hart.pmem_mut()
            .write(paddr, &[*byte])
            .expect("data page is in bounds");
    }
}
