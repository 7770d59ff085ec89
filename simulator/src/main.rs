// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use rvsim::instruction::reg;
use rvsim::os::stack::{DEFAULT_STACK_ADDRESS, STACK_BYTESIZE};
use rvsim::perf::{HardwareEvent, HostCounter};
use rvsim::{Hart, os};
use rvsim_mem::PhysicalMemory;

/// User-mode RV64IM simulator with a tiered JIT.
#[derive(Parser)]
#[command(name = "rvsim", version)]
struct Args {
    /// Statically linked RV64 guest executable.
    elf: PathBuf,

    /// Arguments forwarded to the guest program.
    #[arg(trailing_var_arg = true)]
    guest_args: Vec<String>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut hart = Hart::new(PhysicalMemory::new());

    os::loader::load_elf(&mut hart, &args.elf)
        .with_context(|| format!("could not load ELF file {}", args.elf.display()))?;
    tracing::info!("loaded ELF file {}", args.elf.display());

    os::stack::allocate_stack(&mut hart, DEFAULT_STACK_ADDRESS, STACK_BYTESIZE)
        .context("could not allocate the guest stack")?;

    let mut guest_args = vec![args.elf.display().to_string()];
    guest_args.extend(args.guest_args.iter().cloned());
    let guest_env: Vec<String> = std::env::vars()
        .map(|(key, value)| format!("{key}={value}"))
        .collect();
    os::stack::setup_args(&mut hart, &guest_args, &guest_env)
        .context("could not initialize guest command line arguments")?;

    println!("{:=<79}", "");

    let instr_counter = HostCounter::start(HardwareEvent::Instructions);
    let cycle_counter = HostCounter::start(HardwareEvent::CpuCycles);
    let started = Instant::now();

    let simulated = hart.run();

    let elapsed = started.elapsed();
    let host_instructions = instr_counter.and_then(HostCounter::finish);
    let host_cycles = cycle_counter.and_then(HostCounter::finish);

    println!("{:=<79}", "");
    println!("guest program finished, return value (a0): {}", hart.reg(reg::A0));
    println!();
    println!("simulated instruction count: {simulated}");
    println!(
        "average simulated MIPS:      {:.2}",
        simulated as f64 / elapsed.as_micros().max(1) as f64
    );

    match (host_instructions, host_cycles) {
        (Some(instructions), Some(cycles)) => {
            println!("executed host instructions:  {instructions}");
            println!(
                "average host per simulated:  {:.2}",
                instructions as f64 / simulated.max(1) as f64
            );
            println!(
                "average simulated CPI:       {:.2}",
                cycles as f64 / simulated.max(1) as f64
            );
        }
        _ => {
            tracing::warn!("unable to count host instructions and cpu cycles");
        }
    }

    Ok(())
}
