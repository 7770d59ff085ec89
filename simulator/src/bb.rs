// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Basic blocks and the direct-mapped block cache.
//!
//! A block is shared between the simulation thread and the JIT worker, so its
//! mutable state is atomic: the hotness counter (simulation thread only), the
//! compiled entry pointer and the compilation status. The status transitions
//! monotonically NOT_COMPILED -> COMPILING -> COMPILED, and the entry pointer
//! is always written before the release store of COMPILED.

use std::sync::atomic::{AtomicPtr, AtomicU8, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use rvsim_mem::VirtAddr;
use static_assertions::const_assert;

use crate::hart::Hart;
use crate::instruction::{DecodedInstruction, Opcode};

/// Maximum decoded instructions per block, sentinel excluded.
pub const MAX_BLOCK_SIZE: usize = 9;

/// Interpreter runs a block survives before it is handed to the JIT worker.
pub const START_HOTNESS_COUNTER: u32 = 10;

pub const BLOCK_CACHE_CAPACITY: usize = 1024;

const_assert!(BLOCK_CACHE_CAPACITY.is_power_of_two());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CompilationStatus {
    NotCompiled = 0,
    Compiling = 1,
    Compiled = 2,
}

impl CompilationStatus {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => CompilationStatus::NotCompiled,
            1 => CompilationStatus::Compiling,
            2 => CompilationStatus::Compiled,
            _ => unreachable!("invalid compilation status {raw}"),
        }
    }
}

/// A host function that performs the effect of one basic block. Generated
/// code receives the hart and the base of the decoded body it was compiled
/// from.
pub type CompiledEntry = extern "C" fn(*mut Hart, *const DecodedInstruction);

pub struct BasicBlock {
    entrypoint: VirtAddr,
    body: Arc<[DecodedInstruction]>,
    hotness_counter: AtomicU32,
    compiled_entry: AtomicPtr<()>,
    compilation_status: AtomicU8,
}

impl BasicBlock {
    /// `body` must be terminated by the [`Opcode::BasicBlockEnd`] sentinel.
    #[must_use]
    pub fn new(entrypoint: VirtAddr, body: Vec<DecodedInstruction>) -> Self {
        debug_assert!(matches!(
            body.last(),
            Some(DecodedInstruction {
                opcode: Opcode::BasicBlockEnd,
                ..
            })
        ));
        Self {
            entrypoint,
            body: body.into(),
            hotness_counter: AtomicU32::new(START_HOTNESS_COUNTER),
            compiled_entry: AtomicPtr::new(std::ptr::null_mut()),
            compilation_status: AtomicU8::new(CompilationStatus::NotCompiled as u8),
        }
    }

    #[must_use]
    pub fn entrypoint(&self) -> VirtAddr {
        self.entrypoint
    }

    #[must_use]
    pub fn body(&self) -> &[DecodedInstruction] {
        &self.body
    }

    /// A handle on the body that stays valid independently of this block,
    /// e.g. inside an in-flight compile task.
    #[must_use]
    pub fn body_arc(&self) -> Arc<[DecodedInstruction]> {
        Arc::clone(&self.body)
    }

    /// Body length including the sentinel.
    #[must_use]
    pub fn len(&self) -> usize {
        self.body.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    /// Executable instructions in this block, i.e. the body without the
    /// sentinel.
    #[must_use]
    pub fn instr_count(&self) -> usize {
        self.body.len() - 1
    }

    #[must_use]
    pub fn status(&self, order: Ordering) -> CompilationStatus {
        CompilationStatus::from_u8(self.compilation_status.load(order))
    }

    pub fn set_status(&self, status: CompilationStatus, order: Ordering) {
        self.compilation_status.store(status as u8, order);
    }

    /// Counts down towards compilation; returns the new value.
    pub fn decrement_hotness_counter(&self) -> u32 {
        self.hotness_counter.fetch_sub(1, Ordering::Relaxed) - 1
    }

    #[must_use]
    pub fn compiled_entry(&self) -> Option<CompiledEntry> {
        let raw = self.compiled_entry.load(Ordering::Relaxed);
        if raw.is_null() {
            return None;
        }
        // Safety: the only store to `compiled_entry` is `set_compiled_entry`,
        // which writes a valid `CompiledEntry` function pointer.
        Some(unsafe { std::mem::transmute::<*mut (), CompiledEntry>(raw) })
    }

    pub fn set_compiled_entry(&self, entry: CompiledEntry) {
        self.compiled_entry
            .store(entry as *mut (), Ordering::Relaxed);
    }

    /// Runs the published host code for this block.
    pub fn execute_compiled(&self, hart: &mut Hart) {
        let entry = self
            .compiled_entry()
            .expect("compiled entry must be published before the status turns COMPILED");
        entry(std::ptr::from_mut(hart), self.body.as_ptr());
    }
}

impl core::fmt::Debug for BasicBlock {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BasicBlock")
            .field("entrypoint", &format_args!("{:#x}", self.entrypoint))
            .field("instr_count", &self.instr_count())
            .field("status", &self.status(Ordering::Relaxed))
            .finish()
    }
}

struct CacheSlot {
    entrypoint: VirtAddr,
    block: Arc<BasicBlock>,
}

/// Bounded direct-mapped cache from block entrypoint to block. The mutex is
/// held for lookups, inserts and the worker's compiled-entry publication;
/// none of the critical sections block on anything.
pub struct BlockCache {
    slots: Mutex<Box<[Option<CacheSlot>]>>,
}

impl BlockCache {
    #[must_use]
    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(BLOCK_CACHE_CAPACITY);
        slots.resize_with(BLOCK_CACHE_CAPACITY, || None);
        Self {
            slots: Mutex::new(slots.into_boxed_slice()),
        }
    }

    #[inline]
    fn index(entrypoint: VirtAddr) -> usize {
        (entrypoint as usize) & (BLOCK_CACHE_CAPACITY - 1)
    }

    #[must_use]
    pub fn find(&self, entrypoint: VirtAddr) -> Option<Arc<BasicBlock>> {
        let slots = self.slots.lock().unwrap();
        let slot = slots[Self::index(entrypoint)].as_ref()?;
        (slot.entrypoint == entrypoint).then(|| Arc::clone(&slot.block))
    }

    /// Caches `block`, unconditionally evicting the slot's prior occupant.
    pub fn insert(&self, block: BasicBlock) -> Arc<BasicBlock> {
        let entrypoint = block.entrypoint();
        let block = Arc::new(block);
        let mut slots = self.slots.lock().unwrap();
        slots[Self::index(entrypoint)] = Some(CacheSlot {
            entrypoint,
            block: Arc::clone(&block),
        });
        block
    }

    /// Publishes freshly generated host code for the block at `entrypoint`.
    ///
    /// The block is re-located under the cache lock and the entry is dropped
    /// if it was evicted in the meantime (or already compiled by an earlier
    /// publication). Returns whether the entry was published.
    pub fn publish_compiled_entry(&self, entrypoint: VirtAddr, entry: CompiledEntry) -> bool {
        let slots = self.slots.lock().unwrap();
        let Some(slot) = slots[Self::index(entrypoint)].as_ref() else {
            return false;
        };
        if slot.entrypoint != entrypoint
            || slot.block.status(Ordering::Relaxed) == CompilationStatus::Compiled
        {
            return false;
        }
        slot.block.set_compiled_entry(entry);
        // The entry store above must be visible before the status flips.
        slot.block
            .set_status(CompilationStatus::Compiled, Ordering::Release);
        true
    }
}

impl Default for BlockCache {
    fn default() -> Self {
        Self::new()
    }
}
