// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The background compile thread.
//!
//! A single worker owns the JIT module and its code memory, which keeps the
//! code arena free of contention and the block-to-code bookkeeping trivial.
//! It parks on the task queue, compiles one block at a time and publishes
//! the result under the block-cache lock; closing the queue makes it finish
//! the task in flight and exit.

use std::sync::Arc;
use std::thread::JoinHandle;

use crate::bb::BlockCache;
use crate::jit::codegen::JitBackend;
use crate::jit::queue::CompilerTaskQueue;

pub(crate) fn spawn(queue: Arc<CompilerTaskQueue>, cache: Arc<BlockCache>) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name("jit-worker".into())
        .spawn(move || worker_main(&queue, &cache))
        .expect("failed to spawn the jit worker thread")
}

fn worker_main(queue: &CompilerTaskQueue, cache: &BlockCache) {
    let mut backend = match JitBackend::new() {
        Ok(backend) => Some(backend),
        Err(err) => {
            tracing::warn!("jit backend unavailable, staying in the interpreter: {err}");
            None
        }
    };

    while let Some(task) = queue.get_task() {
        let Some(backend) = backend.as_mut() else {
            // Keep draining so enqueued blocks do not pile up.
            continue;
        };
        match backend.compile(&task.body) {
            Ok(entry) => {
                if cache.publish_compiled_entry(task.entrypoint, entry) {
                    tracing::debug!(
                        entrypoint = %format_args!("{:#x}", task.entrypoint),
                        "published compiled block"
                    );
                } else {
                    // Evicted while compiling; the generated code is dropped.
                    tracing::debug!(
                        entrypoint = %format_args!("{:#x}", task.entrypoint),
                        "block evicted before publication"
                    );
                }
            }
            Err(err) => {
                tracing::warn!(
                    entrypoint = %format_args!("{:#x}", task.entrypoint),
                    "block compilation failed: {err}"
                );
            }
        }
    }
}
