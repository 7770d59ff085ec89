// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Linux-style syscall shims.
//!
//! The RISC-V convention: number in `a7`, arguments in `a0..a5`, result in
//! `a0`. Only `read`, `write` and `exit` have real implementations; every
//! other recognised number logs and falls through, unknown numbers likewise.

use rvsim_mem::{MemAccess, PAGE_BYTESIZE, page_offset};

use crate::hart::Hart;
use crate::instruction::reg;

pub const SYSCALL_READ: u64 = 63;
pub const SYSCALL_WRITE: u64 = 64;
pub const SYSCALL_EXIT: u64 = 93;

/// Host-side bounce buffer per read/write call.
const BOUNCE_BYTESIZE: usize = 1024;

/// Dispatches the environment call the hart just executed and leaves the
/// program counter on the next instruction (or 0 for `exit`).
pub fn execute(hart: &mut Hart) {
    let number = hart.reg(reg::A7);
    match number {
        SYSCALL_READ => sys_read(hart),
        SYSCALL_WRITE => sys_write(hart),
        SYSCALL_EXIT => {
            // The exit status stays in a0; pc 0 terminates the run loop.
            hart.set_pc(0);
            return;
        }
        _ => match syscall_name(number) {
            Some(name) => tracing::warn!("unimplemented syscall {name} ({number})"),
            None => tracing::warn!("unknown syscall {number}"),
        },
    }
    hart.advance_pc();
}

fn sys_read(hart: &mut Hart) {
    let fd = hart.reg(reg::A0) as i32;
    let vaddr = hart.reg(reg::A1);
    let bytesize = (hart.reg(reg::A2) as usize).min(BOUNCE_BYTESIZE);

    let mut buf = [0u8; BOUNCE_BYTESIZE];
    let result = host::read(fd, &mut buf[..bytesize]);
    hart.set_reg(reg::A0, result as u64);

    if result > 0 {
        copy_to_guest(hart, vaddr, &buf[..result as usize]);
    }
}

fn sys_write(hart: &mut Hart) {
    let fd = hart.reg(reg::A0) as i32;
    let vaddr = hart.reg(reg::A1);
    let bytesize = (hart.reg(reg::A2) as usize).min(BOUNCE_BYTESIZE);

    let mut buf = [0u8; BOUNCE_BYTESIZE];
    copy_from_guest(hart, vaddr, &mut buf[..bytesize]);

    let result = host::write(fd, &buf[..bytesize]);
    hart.set_reg(reg::A0, result as u64);
}

/// Raw fd passthrough: guest descriptors are host descriptors.
#[cfg(unix)]
mod host {
    pub(super) fn read(fd: i32, buf: &mut [u8]) -> isize {
        // Safety: the buffer outlives the call and its length bounds the
        // read.
        unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) }
    }

    pub(super) fn write(fd: i32, buf: &[u8]) -> isize {
        // Safety: the buffer outlives the call and its length bounds the
        // write.
        unsafe { libc::write(fd, buf.as_ptr().cast(), buf.len()) }
    }
}

/// Hosts without raw fds fail the guest's I/O the way a closed descriptor
/// would.
#[cfg(not(unix))]
mod host {
    pub(super) fn read(_fd: i32, _buf: &mut [u8]) -> isize {
        -1
    }

    pub(super) fn write(_fd: i32, _buf: &[u8]) -> isize {
        -1
    }
}

/// Copies host bytes into guest memory, translating each page separately:
/// virtually contiguous buffers need not be physically contiguous.
fn copy_to_guest(hart: &mut Hart, vaddr: u64, bytes: &[u8]) {
    let mut offset = 0usize;
    while offset < bytes.len() {
        let vcur = vaddr + offset as u64;
        let chunk = ((PAGE_BYTESIZE - page_offset(vcur)) as usize).min(bytes.len() - offset);
        let paddr = hart.phys_addr(MemAccess::Write, vcur);
        if let Err(err) = hart.pmem_mut().write(paddr, &bytes[offset..offset + chunk]) {
            tracing::error!("syscall buffer write failed: {err}");
            std::process::exit(1);
        }
        offset += chunk;
    }
}

fn copy_from_guest(hart: &mut Hart, vaddr: u64, bytes: &mut [u8]) {
    let mut offset = 0usize;
    while offset < bytes.len() {
        let vcur = vaddr + offset as u64;
        let chunk = ((PAGE_BYTESIZE - page_offset(vcur)) as usize).min(bytes.len() - offset);
        let paddr = hart.phys_addr(MemAccess::Read, vcur);
        let range = offset..offset + chunk;
        if let Err(err) = hart.pmem().read(paddr, &mut bytes[range]) {
            tracing::error!("syscall buffer read failed: {err}");
            std::process::exit(1);
        }
        offset += chunk;
    }
}

/// Names for the Linux riscv64 syscall numbers the shim recognises but does
/// not implement.
fn syscall_name(number: u64) -> Option<&'static str> {
    Some(match number {
        17 => "getcwd",
        23 => "dup",
        24 => "dup3",
        25 => "fcntl",
        29 => "ioctl",
        34 => "mkdirat",
        35 => "unlinkat",
        37 => "linkat",
        38 => "renameat",
        45 => "truncate",
        46 => "ftruncate",
        48 => "faccessat",
        49 => "chdir",
        56 => "openat",
        57 => "close",
        59 => "pipe2",
        61 => "getdents64",
        62 => "lseek",
        65 => "readv",
        66 => "writev",
        67 => "pread64",
        68 => "pwrite64",
        71 => "sendfile",
        78 => "readlinkat",
        79 => "fstatat",
        80 => "fstat",
        81 => "sync",
        82 => "fsync",
        93 => "exit",
        94 => "exit_group",
        95 => "waitid",
        96 => "set_tid_address",
        98 => "futex",
        99 => "set_robust_list",
        101 => "nanosleep",
        113 => "clock_gettime",
        115 => "clock_nanosleep",
        124 => "sched_yield",
        129 => "kill",
        130 => "tkill",
        131 => "tgkill",
        134 => "rt_sigaction",
        135 => "rt_sigprocmask",
        153 => "times",
        160 => "uname",
        163 => "getrlimit",
        164 => "setrlimit",
        165 => "getrusage",
        169 => "gettimeofday",
        172 => "getpid",
        173 => "getppid",
        174 => "getuid",
        175 => "geteuid",
        176 => "getgid",
        177 => "getegid",
        178 => "gettid",
        179 => "sysinfo",
        214 => "brk",
        215 => "munmap",
        216 => "mremap",
        220 => "clone",
        221 => "execve",
        222 => "mmap",
        226 => "mprotect",
        233 => "madvise",
        260 => "wait4",
        261 => "prlimit64",
        278 => "getrandom",
        291 => "statx",
        _ => return None,
    })
}
