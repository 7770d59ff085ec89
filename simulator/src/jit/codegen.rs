// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Cranelift-based code generation for basic blocks.
//!
//! Each block becomes one host function with the signature
//! `(hart_ptr, instr_base_ptr) -> ()`. Register-file and program-counter
//! slots are addressed at fixed offsets from the hart pointer; immediates
//! are embedded at generation time. Operations the generator does not lower
//! natively are forwarded to the interpreter's [`exec_callback`] with the
//! address of their decoded instruction, which keeps generated code correct
//! for every opcode the decoder knows.

use cranelift_codegen::Context;
use cranelift_codegen::ir::condcodes::IntCC;
use cranelift_codegen::ir::{
    AbiParam, InstBuilder, MemFlags, SigRef, Signature, Type, Value, types,
};
use cranelift_codegen::isa::CallConv;
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext};
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{Module, default_libcall_names};

use crate::bb::CompiledEntry;
use crate::exec::exec_callback;
use crate::hart::{HART_PC_OFFSET, HART_REGS_OFFSET};
use crate::instruction::{DecodedInstruction, Opcode};

/// The worker's compilation state: a JIT module owning the emitted code
/// arena plus reusable cranelift contexts.
pub(crate) struct JitBackend {
    module: JITModule,
    ctx: Context,
    builder_ctx: FunctionBuilderContext,
}

impl JitBackend {
    pub(crate) fn new() -> anyhow::Result<Self> {
        let builder = JITBuilder::new(default_libcall_names())?;
        let module = JITModule::new(builder);
        let ctx = module.make_context();
        Ok(Self {
            module,
            ctx,
            builder_ctx: FunctionBuilderContext::new(),
        })
    }

    /// Compiles a block body into executable host code and returns its
    /// entry.
    pub(crate) fn compile(&mut self, body: &[DecodedInstruction]) -> anyhow::Result<CompiledEntry> {
        let ptr_ty = self.module.target_config().pointer_type();
        let call_conv = self.module.target_config().default_call_conv;

        let mut sig = self.module.make_signature();
        sig.params.push(AbiParam::new(ptr_ty));
        sig.params.push(AbiParam::new(ptr_ty));
        let func_id = self.module.declare_anonymous_function(&sig)?;
        self.ctx.func.signature = sig;

        {
            let mut builder = FunctionBuilder::new(&mut self.ctx.func, &mut self.builder_ctx);
            let block = builder.create_block();
            builder.append_block_params_for_function_params(block);
            builder.switch_to_block(block);
            builder.seal_block(block);

            let hart_ptr = builder.block_params(block)[0];
            let instr_base = builder.block_params(block)[1];

            let mut generator =
                CodeGenerator::new(builder, ptr_ty, call_conv, hart_ptr, instr_base);
            for (offset, instr) in body.iter().enumerate() {
                if instr.opcode == Opcode::BasicBlockEnd {
                    break;
                }
                generator.generate(instr, offset);
            }
            generator.finish();
        }

        self.module.define_function(func_id, &mut self.ctx)?;
        self.module.clear_context(&mut self.ctx);
        self.module.finalize_definitions()?;

        let code = self.module.get_finalized_function(func_id);
        // Safety: `code` is the finalized, executable host function compiled
        // right above with exactly the `CompiledEntry` signature.
        Ok(unsafe { std::mem::transmute::<*const u8, CompiledEntry>(code) })
    }
}

struct CodeGenerator<'a> {
    builder: FunctionBuilder<'a>,
    hart_ptr: Value,
    instr_base: Value,
    exec_sig: SigRef,
    ptr_ty: Type,
}

impl<'a> CodeGenerator<'a> {
    fn new(
        mut builder: FunctionBuilder<'a>,
        ptr_ty: Type,
        call_conv: CallConv,
        hart_ptr: Value,
        instr_base: Value,
    ) -> Self {
        let mut exec_sig = Signature::new(call_conv);
        exec_sig.params.push(AbiParam::new(ptr_ty));
        exec_sig.params.push(AbiParam::new(ptr_ty));
        let exec_sig = builder.import_signature(exec_sig);

        Self {
            builder,
            hart_ptr,
            instr_base,
            exec_sig,
            ptr_ty,
        }
    }

    fn generate(&mut self, instr: &DecodedInstruction, offset: usize) {
        use Opcode::*;

        match instr.opcode {
            Lui => {
                self.set_reg_imm(instr.rd, instr.imm);
                self.increment_pc();
            }
            Auipc => {
                let pc = self.get_pc();
                let value = self.builder.ins().iadd_imm(pc, instr.imm);
                self.set_reg(instr.rd, value);
                self.increment_pc();
            }
            Jal => {
                let pc = self.get_pc();
                let link = self.builder.ins().iadd_imm(pc, 4);
                self.set_reg(instr.rd, link);
                let target = self.builder.ins().iadd_imm(pc, instr.imm);
                self.set_pc(target);
            }
            Jalr => {
                // Target before link write; rd and rs1 may alias.
                let base = self.get_reg(instr.rs1);
                let sum = self.builder.ins().iadd_imm(base, instr.imm);
                let target = self.builder.ins().band_imm(sum, -2);
                let pc = self.get_pc();
                let link = self.builder.ins().iadd_imm(pc, 4);
                self.set_reg(instr.rd, link);
                self.set_pc(target);
            }
            Addi => {
                let op = self.get_reg(instr.rs1);
                let value = self.builder.ins().iadd_imm(op, instr.imm);
                self.set_reg(instr.rd, value);
                self.increment_pc();
            }
            Slti => {
                let op = self.get_reg(instr.rs1);
                let flag = self
                    .builder
                    .ins()
                    .icmp_imm(IntCC::SignedLessThan, op, instr.imm);
                let value = self.builder.ins().uextend(types::I64, flag);
                self.set_reg(instr.rd, value);
                self.increment_pc();
            }
            Sltiu => {
                let op = self.get_reg(instr.rs1);
                let flag = self
                    .builder
                    .ins()
                    .icmp_imm(IntCC::UnsignedLessThan, op, instr.imm);
                let value = self.builder.ins().uextend(types::I64, flag);
                self.set_reg(instr.rd, value);
                self.increment_pc();
            }
            Xori => {
                let op = self.get_reg(instr.rs1);
                let value = self.builder.ins().bxor_imm(op, instr.imm);
                self.set_reg(instr.rd, value);
                self.increment_pc();
            }
            Ori => {
                let op = self.get_reg(instr.rs1);
                let value = self.builder.ins().bor_imm(op, instr.imm);
                self.set_reg(instr.rd, value);
                self.increment_pc();
            }
            Andi => {
                let op = self.get_reg(instr.rs1);
                let value = self.builder.ins().band_imm(op, instr.imm);
                self.set_reg(instr.rd, value);
                self.increment_pc();
            }
            Slli => {
                let op = self.get_reg(instr.rs1);
                let value = self.builder.ins().ishl_imm(op, i64::from(instr.shamt));
                self.set_reg(instr.rd, value);
                self.increment_pc();
            }
            Srli => {
                let op = self.get_reg(instr.rs1);
                let value = self.builder.ins().ushr_imm(op, i64::from(instr.shamt));
                self.set_reg(instr.rd, value);
                self.increment_pc();
            }
            Srai => {
                let op = self.get_reg(instr.rs1);
                let value = self.builder.ins().sshr_imm(op, i64::from(instr.shamt));
                self.set_reg(instr.rd, value);
                self.increment_pc();
            }
            Add => {
                let (lhs, rhs) = self.get_operands(instr);
                let value = self.builder.ins().iadd(lhs, rhs);
                self.write_back(instr.rd, value);
            }
            Sub => {
                let (lhs, rhs) = self.get_operands(instr);
                let value = self.builder.ins().isub(lhs, rhs);
                self.write_back(instr.rd, value);
            }
            // Cranelift shifts mask the amount by the operand width, same
            // as the architectural rs2 & 0x3F.
            Sll => {
                let (lhs, rhs) = self.get_operands(instr);
                let value = self.builder.ins().ishl(lhs, rhs);
                self.write_back(instr.rd, value);
            }
            Srl => {
                let (lhs, rhs) = self.get_operands(instr);
                let value = self.builder.ins().ushr(lhs, rhs);
                self.write_back(instr.rd, value);
            }
            Sra => {
                let (lhs, rhs) = self.get_operands(instr);
                let value = self.builder.ins().sshr(lhs, rhs);
                self.write_back(instr.rd, value);
            }
            Xor => {
                let (lhs, rhs) = self.get_operands(instr);
                let value = self.builder.ins().bxor(lhs, rhs);
                self.write_back(instr.rd, value);
            }
            Or => {
                let (lhs, rhs) = self.get_operands(instr);
                let value = self.builder.ins().bor(lhs, rhs);
                self.write_back(instr.rd, value);
            }
            And => {
                let (lhs, rhs) = self.get_operands(instr);
                let value = self.builder.ins().band(lhs, rhs);
                self.write_back(instr.rd, value);
            }
            Slt => {
                let (lhs, rhs) = self.get_operands(instr);
                let flag = self.builder.ins().icmp(IntCC::SignedLessThan, lhs, rhs);
                let value = self.builder.ins().uextend(types::I64, flag);
                self.write_back(instr.rd, value);
            }
            Sltu => {
                let (lhs, rhs) = self.get_operands(instr);
                let flag = self.builder.ins().icmp(IntCC::UnsignedLessThan, lhs, rhs);
                let value = self.builder.ins().uextend(types::I64, flag);
                self.write_back(instr.rd, value);
            }

            // Everything else (loads, stores, branches, the W forms, the M
            // extension and environment calls) runs through the interpreter
            // executor for this instruction.
            _ => self.invoke(offset),
        }
    }

    fn get_operands(&mut self, instr: &DecodedInstruction) -> (Value, Value) {
        (self.get_reg(instr.rs1), self.get_reg(instr.rs2))
    }

    /// The common tail of every straight-line computational lowering.
    fn write_back(&mut self, rd: u8, value: Value) {
        self.set_reg(rd, value);
        self.increment_pc();
    }

    /// Emits a call back into the interpreter for the instruction at
    /// `offset` in the block body.
    fn invoke(&mut self, offset: usize) {
        let instr_ptr = self.builder.ins().iadd_imm(
            self.instr_base,
            (offset * size_of::<DecodedInstruction>()) as i64,
        );
        let callee = self
            .builder
            .ins()
            .iconst(self.ptr_ty, exec_callback as usize as i64);
        self.builder
            .ins()
            .call_indirect(self.exec_sig, callee, &[self.hart_ptr, instr_ptr]);
    }

    fn get_reg(&mut self, index: u8) -> Value {
        if index == 0 {
            return self.builder.ins().iconst(types::I64, 0);
        }
        self.builder
            .ins()
            .load(types::I64, MemFlags::trusted(), self.hart_ptr, reg_offset(index))
    }

    fn set_reg(&mut self, index: u8, value: Value) {
        if index > 0 {
            self.builder
                .ins()
                .store(MemFlags::trusted(), value, self.hart_ptr, reg_offset(index));
        }
    }

    fn set_reg_imm(&mut self, index: u8, imm: i64) {
        if index > 0 {
            let value = self.builder.ins().iconst(types::I64, imm);
            self.set_reg(index, value);
        }
    }

    fn get_pc(&mut self) -> Value {
        self.builder.ins().load(
            types::I64,
            MemFlags::trusted(),
            self.hart_ptr,
            HART_PC_OFFSET as i32,
        )
    }

    fn set_pc(&mut self, value: Value) {
        self.builder.ins().store(
            MemFlags::trusted(),
            value,
            self.hart_ptr,
            HART_PC_OFFSET as i32,
        );
    }

    fn increment_pc(&mut self) {
        let pc = self.get_pc();
        let next = self
            .builder
            .ins()
            .iadd_imm(pc, crate::INSTRUCTION_BYTESIZE as i64);
        self.set_pc(next);
    }

    fn finish(mut self) {
        self.builder.ins().return_(&[]);
        self.builder.finalize();
    }
}

fn reg_offset(index: u8) -> i32 {
    (HART_REGS_OFFSET + usize::from(index) * size_of::<u64>()) as i32
}
