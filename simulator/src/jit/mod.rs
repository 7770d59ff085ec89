// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The compiled tier: hotness accounting, the background compile worker and
//! the cranelift code generator.

mod codegen;
mod queue;
mod worker;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::JoinHandle;

use crate::bb::{BasicBlock, BlockCache, CompilationStatus};
use queue::{CompilerTask, CompilerTaskQueue};

/// Drives the tier decision per block execution and owns the worker thread.
pub struct Compiler {
    queue: Arc<CompilerTaskQueue>,
    worker: Option<JoinHandle<()>>,
}

impl Compiler {
    /// Spawns the JIT worker; compiled entries are published into `cache`.
    #[must_use]
    pub fn new(cache: Arc<BlockCache>) -> Self {
        let queue = Arc::new(CompilerTaskQueue::new());
        let worker = worker::spawn(Arc::clone(&queue), cache);
        Self {
            queue,
            worker: Some(worker),
        }
    }

    /// Burns one unit of the block's hotness and answers the tier question:
    /// `true` means "run the compiled entry", which is only the case once
    /// the status reads COMPILED (the acquire pairs with the publication's
    /// release store, making the entry pointer visible).
    ///
    /// A block that just hit zero hotness is snapshotted onto the compile
    /// queue, marked COMPILING and still interpreted this time around.
    pub fn decrement_hotness_counter(&self, block: &BasicBlock) -> bool {
        match block.status(Ordering::Acquire) {
            CompilationStatus::Compiled => true,
            CompilationStatus::Compiling => false,
            CompilationStatus::NotCompiled => {
                if block.decrement_hotness_counter() > 0 {
                    return false;
                }
                // Ordering is provided by the queue mutex; nobody reads the
                // status until the worker publishes.
                block.set_status(CompilationStatus::Compiling, Ordering::Relaxed);
                self.queue.add_task(CompilerTask {
                    entrypoint: block.entrypoint(),
                    body: block.body_arc(),
                });
                tracing::debug!(
                    entrypoint = %format_args!("{:#x}", block.entrypoint()),
                    "block queued for compilation"
                );
                false
            }
        }
    }
}

impl Drop for Compiler {
    fn drop(&mut self) {
        self.queue.close();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
