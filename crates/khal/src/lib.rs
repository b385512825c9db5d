//! Hardware Abstraction Layer.
//!
//! The bring-up core only needs a handful of things from the machine:
//! the interrupt-enable bit of the current CPU, whether we are inside an
//! interrupt handler, which CPU we are running on, a way to stop the CPU,
//! and a byte sink for diagnostics.
//!
//! On bare metal (`target_os = "none"`, x86_64) these map onto RFLAGS.IF,
//! a per-CPU nesting counter, the GS-based CPU-local block and COM1.
//! On a hosted target every OS thread plays the part of one CPU, which
//! lets the locking and boot code run under the normal test harness.
#![cfg_attr(target_os = "none", no_std)]

#[cfg(all(target_os = "none", not(target_arch = "x86_64")))]
compile_error!("khal: bare-metal builds are only supported on x86_64");

pub mod cpu;
pub mod irq;
pub mod serial;

pub use irq::IrqState;
