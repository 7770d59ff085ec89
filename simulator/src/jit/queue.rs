// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The compile-task queue between the simulation thread and the JIT worker.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use rvsim_mem::VirtAddr;

use crate::instruction::DecodedInstruction;

/// A snapshot of a block handed to the worker: the shared body plus the
/// entrypoint the result will be published under.
pub(crate) struct CompilerTask {
    pub entrypoint: VirtAddr,
    pub body: Arc<[DecodedInstruction]>,
}

/// Unbounded two-party queue. The simulation thread pushes and never blocks;
/// the worker parks on the condvar while the queue is empty and open.
pub(crate) struct CompilerTaskQueue {
    tasks: Mutex<VecDeque<CompilerTask>>,
    empty_or_closed: Condvar,
    closed: AtomicBool,
}

impl CompilerTaskQueue {
    pub(crate) fn new() -> Self {
        Self {
            tasks: Mutex::new(VecDeque::new()),
            empty_or_closed: Condvar::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn add_task(&self, task: CompilerTask) {
        let was_empty = {
            let mut tasks = self.tasks.lock().unwrap();
            let was_empty = tasks.is_empty();
            tasks.push_back(task);
            was_empty
        };
        // Only an empty->nonempty transition can have a parked waiter.
        if was_empty {
            self.empty_or_closed.notify_one();
        }
    }

    /// Blocks until a task is available or the queue is closed. Once closed,
    /// returns `None` and leaves any queued tasks to be dropped.
    pub(crate) fn get_task(&self) -> Option<CompilerTask> {
        let mut tasks = self.tasks.lock().unwrap();
        while tasks.is_empty() && !self.is_closed() {
            tasks = self.empty_or_closed.wait(tasks).unwrap();
        }
        if self.is_closed() {
            return None;
        }
        tasks.pop_front()
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.empty_or_closed.notify_one();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn task(entrypoint: VirtAddr) -> CompilerTask {
        CompilerTask {
            entrypoint,
            body: Arc::from(vec![DecodedInstruction::BLOCK_END]),
        }
    }

    #[test]
    fn tasks_come_out_in_order() {
        let queue = CompilerTaskQueue::new();
        queue.add_task(task(1));
        queue.add_task(task(2));
        assert_eq!(queue.get_task().unwrap().entrypoint, 1);
        assert_eq!(queue.get_task().unwrap().entrypoint, 2);
    }

    #[test]
    fn close_wakes_a_parked_worker() {
        let queue = Arc::new(CompilerTaskQueue::new());
        let waiter = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || queue.get_task().is_none())
        };
        // Give the waiter a moment to park.
        std::thread::sleep(Duration::from_millis(20));
        queue.close();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn queued_tasks_are_discarded_after_close() {
        let queue = CompilerTaskQueue::new();
        queue.add_task(task(1));
        queue.close();
        assert!(queue.get_task().is_none());
    }
}
