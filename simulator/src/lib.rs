// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A user-mode simulator for the RV64IM instruction set.
//!
//! The execution pipeline is tiered: guest code is fetched through a software
//! MMU and split TLBs into decoded [basic blocks](bb::BasicBlock), which a
//! dispatch-table interpreter executes until a per-block hotness counter runs
//! out; hot blocks are then compiled to host machine code by a background
//! cranelift worker and the compiled entry is published back into the block
//! cache.

pub mod bb;
pub mod decoder;
pub mod dispatcher;
pub mod exec;
pub mod hart;
pub mod instruction;
pub mod jit;
pub mod os;
pub mod perf;

pub use hart::Hart;

/// Every instruction this simulator understands is a fixed-width word.
pub const INSTRUCTION_BYTESIZE: u64 = 4;

pub const CSR_COUNT: usize = 4096;
pub const CSR_SATP_INDEX: usize = 0x180;
