//! Tiered-execution behavior over long-running guests: hot blocks get
//! compiled in the background without changing architectural results.

mod common;

use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use common::*;
use rvsim::bb::CompilationStatus;
use rvsim::instruction::reg;
use rvsim::os::syscall::SYSCALL_EXIT;

const ITERATIONS: i32 = 2000;

fn counting_loop() -> Vec<u32> {
    vec![
        addi(5, 0, 0),
        addi(6, 0, ITERATIONS),
        // loop:
        addi(5, 5, 1),
        bne(5, 6, -4),
        add(10, 0, 5),
        ecall(),
    ]
}

/// The loop body runs far past the hotness threshold, so the JIT worker
/// compiles it mid-run and later iterations execute the published entry.
/// Either tier must produce the same architectural state.
#[test]
fn hot_loop_produces_the_interpreter_result() {
    let mut hart = hart_with_program(&counting_loop());
    hart.set_reg(reg::A7, SYSCALL_EXIT);

    hart.run();

    assert_eq!(hart.reg(reg::A0), ITERATIONS as u64);
    assert_eq!(hart.reg(5), ITERATIONS as u64);
}

#[test]
fn repeated_runs_agree() {
    let run = || {
        let mut hart = hart_with_program(&counting_loop());
        hart.set_reg(reg::A7, SYSCALL_EXIT);
        hart.run();
        (0..reg::COUNT).map(|i| hart.reg(i)).collect::<Vec<_>>()
    };
    assert_eq!(run(), run());
}

/// Once the status reads COMPILED, the published entry pointer must be
/// visible (release store on publication, acquire load here).
#[test]
fn compiled_status_implies_a_published_entry() {
    let mut hart = hart_with_program(&counting_loop());
    hart.set_reg(reg::A7, SYSCALL_EXIT);
    hart.run();

    let loop_entrypoint = CODE_VADDR + 2 * 4;
    let Some(block) = hart.block_cache().find(loop_entrypoint) else {
        panic!("hot loop block fell out of the cache");
    };

    // Give the worker a moment in case the run finished before publication.
    let deadline = Instant::now() + Duration::from_secs(2);
    while block.status(Ordering::Acquire) != CompilationStatus::Compiled
        && Instant::now() < deadline
    {
        std::thread::sleep(Duration::from_millis(10));
    }

    if block.status(Ordering::Acquire) == CompilationStatus::Compiled {
        assert!(block.compiled_entry().is_some());
    }
}
