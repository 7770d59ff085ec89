// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Loads a statically linked guest executable into the simulated address
//! space.

use std::path::Path;

use object::{Architecture, Object, ObjectSegment, SegmentFlags, elf};
use rvsim_mem::{AccessFlags, MemoryError, PAGE_BYTESIZE, page_offset};

use crate::hart::Hart;

#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
    #[error("failed to read file")]
    Io(#[from] std::io::Error),
    #[error("failed to parse ELF image")]
    Parse(#[from] object::Error),
    #[error("guest executable must be a 64-bit RISC-V ELF")]
    WrongArchitecture,
    #[error("failed to materialize guest pages")]
    Memory(#[from] MemoryError),
}

/// Maps every PT_LOAD segment of the ELF at `path` into guest memory with
/// the permissions its program header asks for, then points the hart at the
/// image's entrypoint.
///
/// Pages are created through the allocating translation path, so the
/// `memsz - filesz` tail of each segment is implicitly zero.
///
/// # Errors
///
/// Fails on I/O errors, malformed images, foreign architectures and guest
/// memory exhaustion. Loader errors are fatal to the simulation; there is no
/// partial-load recovery.
pub fn load_elf(hart: &mut Hart, path: &Path) -> Result<(), LoaderError> {
    let image = std::fs::read(path)?;
    let file = object::File::parse(&*image)?;

    if file.architecture() != Architecture::Riscv64 {
        return Err(LoaderError::WrongArchitecture);
    }

    for segment in file.segments() {
        let SegmentFlags::Elf { p_flags } = segment.flags() else {
            continue;
        };
        let mut request = AccessFlags::empty();
        if p_flags & elf::PF_R != 0 {
            request |= AccessFlags::READ;
        }
        if p_flags & elf::PF_W != 0 {
            request |= AccessFlags::WRITE;
        }
        if p_flags & elf::PF_X != 0 {
            request |= AccessFlags::EXECUTE;
        }

        let vaddr = segment.address();
        let memsz = segment.size();
        let file_bytes = segment.data()?;

        tracing::debug!(
            vaddr = %format_args!("{vaddr:#x}"),
            memsz,
            filesz = file_bytes.len(),
            ?request,
            "mapping segment"
        );

        // Walk the segment page by page; the copy honors the segment's
        // starting offset into its first page.
        let mut copied = 0usize;
        let mut vcur = vaddr;
        while vcur < vaddr + memsz {
            let chunk_capacity = (PAGE_BYTESIZE - page_offset(vcur)).min(vaddr + memsz - vcur);
            let paddr = hart.translate_allocating(vcur, request)?;

            let copy_bytesize = chunk_capacity.min((file_bytes.len() - copied) as u64) as usize;
            if copy_bytesize > 0 {
                hart.pmem_mut()
                    .write(paddr, &file_bytes[copied..copied + copy_bytesize])?;
                copied += copy_bytesize;
            }
            vcur += chunk_capacity;
        }
    }

    hart.set_pc(file.entry());
    Ok(())
}
