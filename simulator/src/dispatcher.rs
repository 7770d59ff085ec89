// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The interpreter tier: walks a decoded block body and executes it.

use crate::exec;
use crate::hart::Hart;
use crate::instruction::{DecodedInstruction, Opcode};

/// Interprets one basic block. Block shape guarantees at most one control
/// transfer sits right before the sentinel, so executing every instruction
/// up to the sentinel leaves the program counter exactly where the block's
/// last instruction put it.
pub fn dispatch_execute(hart: &mut Hart, body: &[DecodedInstruction]) {
    for instr in body {
        if instr.opcode == Opcode::BasicBlockEnd {
            break;
        }
        tracing::trace!(
            pc = %format_args!("{:#x}", hart.pc()),
            op = ?instr.opcode,
            "interpret"
        );
        exec::step(hart, instr);
    }
}
