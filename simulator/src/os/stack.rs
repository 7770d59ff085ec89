// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Guest stack allocation and the argv/envp process image.

use rvsim_mem::{AccessFlags, MemoryError, PAGE_BYTESIZE, VirtAddr, page_offset};

use crate::hart::Hart;
use crate::instruction::reg;

/// 16 MiB of stack, growing down from [`DEFAULT_STACK_ADDRESS`].
pub const STACK_BYTESIZE: u64 = 1 << 24;
pub const DEFAULT_STACK_ADDRESS: VirtAddr = 0x3FFF_FC00;

/// Materialises the stack pages ending at `stack_addr` and points `sp` at
/// the top.
///
/// # Errors
///
/// Fails when guest physical memory runs out.
pub fn allocate_stack(
    hart: &mut Hart,
    stack_addr: VirtAddr,
    stack_bytesize: u64,
) -> Result<(), MemoryError> {
    hart.set_reg(reg::SP, stack_addr);

    let mut vaddr = stack_addr;
    for _ in 0..stack_bytesize / PAGE_BYTESIZE {
        hart.translate_allocating(
            vaddr,
            AccessFlags::READ | AccessFlags::WRITE | AccessFlags::EXECUTE,
        )?;
        vaddr -= PAGE_BYTESIZE;
    }
    Ok(())
}

/// Builds the process image the guest's C runtime expects, below the current
/// stack pointer:
///
/// 1. environment strings, last to first;
/// 2. argument strings, last to first;
/// 3. the argc word;
/// 4. the null-terminated argv pointer array;
/// 5. the null-terminated envp pointer array.
///
/// Finally `sp` is rounded down to a page boundary and `a0`/`a1`/`a2` are
/// seeded with argc, argv and envp.
///
/// # Errors
///
/// Fails when guest physical memory runs out.
pub fn setup_args(hart: &mut Hart, args: &[String], envp: &[String]) -> Result<(), MemoryError> {
    let mut sp = hart.reg(reg::SP);

    let mut env_ptrs = vec![0u64; envp.len()];
    for (i, env) in envp.iter().enumerate().rev() {
        sp = push_string(hart, sp, env)?;
        env_ptrs[i] = sp;
    }

    let mut arg_ptrs = vec![0u64; args.len()];
    for (i, arg) in args.iter().enumerate().rev() {
        sp = push_string(hart, sp, arg)?;
        arg_ptrs[i] = sp;
    }

    sp -= size_of::<u64>() as u64;
    write_word(hart, sp, args.len() as u64)?;

    // Pointer arrays, each preceded (in memory: followed) by a null
    // terminator slot that fresh pages already hold as zero.
    sp -= size_of::<u64>() as u64;
    for ptr in arg_ptrs.iter().rev() {
        sp -= size_of::<u64>() as u64;
        write_word(hart, sp, *ptr)?;
    }
    let argv_base = sp;

    sp -= size_of::<u64>() as u64;
    for ptr in env_ptrs.iter().rev() {
        sp -= size_of::<u64>() as u64;
        write_word(hart, sp, *ptr)?;
    }
    let envp_base = sp;

    sp &= !(PAGE_BYTESIZE - 1);
    hart.set_reg(reg::SP, sp);
    hart.set_reg(reg::A0, args.len() as u64);
    hart.set_reg(reg::A1, argv_base);
    hart.set_reg(reg::A2, envp_base);
    Ok(())
}

/// Pushes one NUL-terminated string, 8-byte aligned downward; returns the
/// string's address (the new stack top).
fn push_string(hart: &mut Hart, sp: VirtAddr, s: &str) -> Result<VirtAddr, MemoryError> {
    let mut bytes = Vec::with_capacity(s.len() + 1);
    bytes.extend_from_slice(s.as_bytes());
    bytes.push(0);

    let mut sp = sp - bytes.len() as u64;
    sp &= !7;

    // The string may straddle a page boundary; copy page-sized chunks.
    let mut offset = 0usize;
    while offset < bytes.len() {
        let vaddr = sp + offset as u64;
        let chunk = ((PAGE_BYTESIZE - page_offset(vaddr)) as usize).min(bytes.len() - offset);
        let paddr = hart.translate_allocating(
            vaddr,
            AccessFlags::READ | AccessFlags::WRITE | AccessFlags::EXECUTE,
        )?;
        hart.pmem_mut().write(paddr, &bytes[offset..offset + chunk])?;
        offset += chunk;
    }
    Ok(sp)
}

/// An aligned doubleword never straddles a page.
fn write_word(hart: &mut Hart, vaddr: VirtAddr, value: u64) -> Result<(), MemoryError> {
    debug_assert_eq!(vaddr % 8, 0);
    let paddr = hart.translate_allocating(
        vaddr,
        AccessFlags::READ | AccessFlags::WRITE | AccessFlags::EXECUTE,
    )?;
    hart.pmem_mut().write_u64(paddr, value)
}

#[cfg(test)]
mod tests {
    use rvsim_mem::{MemAccess, PhysicalMemory};

    use super::*;

    fn read_guest_word(hart: &mut Hart, vaddr: VirtAddr) -> u64 {
        let paddr = hart.phys_addr(MemAccess::Read, vaddr);
        hart.pmem().read_u64(paddr).unwrap()
    }

    fn read_guest_string(hart: &mut Hart, vaddr: VirtAddr) -> String {
        let mut bytes = Vec::new();
        let mut vaddr = vaddr;
        loop {
            let paddr = hart.phys_addr(MemAccess::Read, vaddr);
            let mut byte = [0u8];
            hart.pmem().read(paddr, &mut byte).unwrap();
            if byte[0] == 0 {
                break;
            }
            bytes.push(byte[0]);
            vaddr += 1;
        }
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn stack_allocation_points_sp_at_the_top() {
        let mut hart = Hart::new(PhysicalMemory::new());
        allocate_stack(&mut hart, DEFAULT_STACK_ADDRESS, STACK_BYTESIZE).unwrap();
        assert_eq!(hart.reg(reg::SP), DEFAULT_STACK_ADDRESS);
        // The top of the stack is mapped and writable.
        assert_ne!(hart.phys_addr(MemAccess::Write, DEFAULT_STACK_ADDRESS), 0);
    }

    #[test]
    fn process_image_layout() {
        let mut hart = Hart::new(PhysicalMemory::new());
        allocate_stack(&mut hart, DEFAULT_STACK_ADDRESS, STACK_BYTESIZE).unwrap();

        let args = vec!["guest".to_string(), "--flag".to_string()];
        let envp = vec!["HOME=/root".to_string(), "TERM=dumb".to_string()];
        setup_args(&mut hart, &args, &envp).unwrap();

        let sp = hart.reg(reg::SP);
        assert_eq!(sp % PAGE_BYTESIZE, 0);

        assert_eq!(hart.reg(reg::A0), 2);

        let argv = hart.reg(reg::A1);
        for (i, expected) in args.iter().enumerate() {
            let ptr = read_guest_word(&mut hart, argv + 8 * i as u64);
            assert_eq!(read_guest_string(&mut hart, ptr), *expected);
        }
        assert_eq!(read_guest_word(&mut hart, argv + 8 * args.len() as u64), 0);

        let envp_base = hart.reg(reg::A2);
        for (i, expected) in envp.iter().enumerate() {
            let ptr = read_guest_word(&mut hart, envp_base + 8 * i as u64);
            assert_eq!(read_guest_string(&mut hart, ptr), *expected);
        }
        assert_eq!(
            read_guest_word(&mut hart, envp_base + 8 * envp.len() as u64),
            0
        );

        // envp array sits right below argv's.
        assert!(envp_base < argv);
    }

    #[test]
    fn empty_args_still_terminate_the_arrays() {
        let mut hart = Hart::new(PhysicalMemory::new());
        allocate_stack(&mut hart, DEFAULT_STACK_ADDRESS, STACK_BYTESIZE).unwrap();
        setup_args(&mut hart, &[], &[]).unwrap();

        assert_eq!(hart.reg(reg::A0), 0);
        let argv = hart.reg(reg::A1);
        assert_eq!(read_guest_word(&mut hart, argv), 0);
        let envp_base = hart.reg(reg::A2);
        assert_eq!(read_guest_word(&mut hart, envp_base), 0);
    }
}
