// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Fences, environment calls and breakpoints.

use crate::hart::Hart;
use crate::instruction::DecodedInstruction;
use crate::os::syscall;

/// A single in-order hart with no device memory observes all its own
/// accesses in program order already.
pub(super) fn fence(hart: &mut Hart, _instr: &DecodedInstruction) {
    hart.advance_pc();
}

pub(super) fn ecall(hart: &mut Hart, _instr: &DecodedInstruction) {
    syscall::execute(hart);
}

/// No debugger is attached, so a breakpoint simply falls through.
pub(super) fn ebreak(hart: &mut Hart, _instr: &DecodedInstruction) {
    hart.advance_pc();
}

pub(super) fn invalid(hart: &mut Hart, _instr: &DecodedInstruction) {
    tracing::error!("invalid instruction at pc {:#x}", hart.pc());
    std::process::exit(1);
}
