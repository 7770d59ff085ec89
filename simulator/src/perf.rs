// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Host hardware performance counters around the simulation loop.
//!
//! Backed by `perf_event_open(2)` on Linux; on other hosts (or when the
//! kernel denies the event, e.g. under restrictive
//! `perf_event_paranoid`) counters simply report as unavailable and the CLI
//! prints a warning instead of host statistics.

/// The two events the CLI reports: retired host instructions and host CPU
/// cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareEvent {
    Instructions,
    CpuCycles,
}

pub use imp::HostCounter;

#[cfg(target_os = "linux")]
mod imp {
    use super::HardwareEvent;

    const PERF_TYPE_HARDWARE: u32 = 0;
    const PERF_COUNT_HW_CPU_CYCLES: u64 = 0;
    const PERF_COUNT_HW_INSTRUCTIONS: u64 = 1;

    // Flag bits in `perf_event_attr`: disabled, exclude_kernel, exclude_hv.
    const ATTR_FLAGS: u64 = (1 << 0) | (1 << 5) | (1 << 6);

    const PERF_EVENT_IOC_ENABLE: libc::c_ulong = 0x2400;
    const PERF_EVENT_IOC_DISABLE: libc::c_ulong = 0x2401;
    const PERF_EVENT_IOC_RESET: libc::c_ulong = 0x2403;

    /// `perf_event_attr`, version 0 (64 bytes). Later kernel revisions only
    /// append fields, and `size` tells the kernel which revision we speak.
    #[repr(C)]
    #[derive(Default)]
    struct PerfEventAttr {
        r#type: u32,
        size: u32,
        config: u64,
        sample_period: u64,
        sample_type: u64,
        read_format: u64,
        flags: u64,
        wakeup_events: u32,
        bp_type: u32,
        bp_addr: u64,
    }

    /// One armed hardware counter for the calling process.
    pub struct HostCounter {
        fd: libc::c_int,
    }

    impl HostCounter {
        /// Arms a counter; `None` when the host will not provide one.
        #[must_use]
        pub fn start(event: HardwareEvent) -> Option<Self> {
            let attr = PerfEventAttr {
                r#type: PERF_TYPE_HARDWARE,
                size: size_of::<PerfEventAttr>() as u32,
                config: match event {
                    HardwareEvent::Instructions => PERF_COUNT_HW_INSTRUCTIONS,
                    HardwareEvent::CpuCycles => PERF_COUNT_HW_CPU_CYCLES,
                },
                flags: ATTR_FLAGS,
                ..Default::default()
            };

            // Safety: the attr struct is fully initialized and outlives the
            // syscall; pid=0/cpu=-1 counts this process on any cpu.
            let fd = unsafe {
                libc::syscall(
                    libc::SYS_perf_event_open,
                    std::ptr::from_ref(&attr),
                    0,
                    -1,
                    -1,
                    0,
                )
            } as libc::c_int;
            if fd == -1 {
                return None;
            }

            // Safety: fd is a live perf event descriptor we own.
            unsafe {
                libc::ioctl(fd, PERF_EVENT_IOC_RESET, 0);
                libc::ioctl(fd, PERF_EVENT_IOC_ENABLE, 0);
            }
            Some(Self { fd })
        }

        /// Disarms the counter and reads its value.
        #[must_use]
        pub fn finish(self) -> Option<u64> {
            let mut value = 0u64;
            // Safety: fd is a live perf event descriptor we own; the read
            // target is 8 valid bytes.
            let read = unsafe {
                libc::ioctl(self.fd, PERF_EVENT_IOC_DISABLE, 0);
                libc::read(
                    self.fd,
                    std::ptr::from_mut(&mut value).cast(),
                    size_of::<u64>(),
                )
            };
            (read == size_of::<u64>() as isize).then_some(value)
        }
    }

    impl Drop for HostCounter {
        fn drop(&mut self) {
            // Safety: fd is owned by this counter and closed exactly once.
            unsafe {
                libc::close(self.fd);
            }
        }
    }
}

#[cfg(not(target_os = "linux"))]
mod imp {
    use super::HardwareEvent;

    /// Hardware counters are a Linux-only affair.
    pub struct HostCounter {}

    impl HostCounter {
        #[must_use]
        pub fn start(_event: HardwareEvent) -> Option<Self> {
            None
        }

        #[must_use]
        pub fn finish(self) -> Option<u64> {
            None
        }
    }
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;

    #[test]
    fn counter_measures_or_reports_unavailable() {
        // CI kernels frequently forbid perf events, so only assert on the
        // available case.
        let Some(counter) = HostCounter::start(HardwareEvent::Instructions) else {
            return;
        };
        let mut acc = 0u64;
        for i in 0..10_000u64 {
            acc = acc.wrapping_add(i);
        }
        std::hint::black_box(acc);
        let value = counter.finish();
        assert!(value.is_some_and(|v| v > 0));
    }
}
