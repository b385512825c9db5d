// =============================================================================
// Kestrel: Kernel Core
// =============================================================================
//
// This crate is what the architecture entry code jumps into, and what
// every other subsystem locks with.
//
// BOOT, IN ORDER:
//   1. Arch assembly sets up a stack and calls `BootOrchestrator::boot()`
//      with four raw machine words from the loader.
//   2. The boot CPU walks the init levels from EARLIEST up to THREADING,
//      calling the arch/platform/target/heap/kernel collaborators at their
//      fixed points in between.
//   3. It spawns the "bootstrap2" thread, pinned to itself, and turns into
//      the idle thread. From here on the scheduler is in charge.
//   4. bootstrap2 finishes THREADING..LAST and pre-stages one pinned
//      thread per secondary CPU.
//   5. Each secondary CPU, once its own arch state is live, releases its
//      staged thread, which runs the secondary-CPU hooks THREADING..LAST.
//
// LOCKING:
//   SpinLock: interrupt context and short sections, never sleeps.
//   Mutex:    thread context only, sleeps on a wait queue.
//
// =============================================================================

#![cfg_attr(not(test), no_std)]

extern crate alloc;

/// Compile-time knobs: CPU limits, default thread parameters, log level.
pub mod config;

/// Status codes for recoverable failures.
pub mod error;

/// Fatal-assert macros and the bare-metal panic handler.
#[macro_use]
pub mod util;

/// Init levels, hook scopes and the hook registry.
pub mod init;

/// Boot orchestrator and the platform collaborator contract.
pub mod boot;

/// Secondary CPU launcher.
#[cfg(feature = "smp")]
pub mod smp;

/// SpinLock and Mutex.
pub mod sync;

/// Thread identity, scheduler contract, timeouts.
pub mod thread;

pub use boot::{BootArgs, BootOrchestrator, BootStage, Platform};
pub use error::{KResult, KernelError};
pub use init::{InitFlags, InitHook, InitLevel, InitRegistry};
#[cfg(feature = "smp")]
pub use smp::{CpuBootState, SecondaryCpuLauncher};
pub use sync::{Mutex, MutexGuard, RawMutex, RawSpinLock, SpinLock, SpinLockGuard, WaitQueue, WaitResult};
pub use thread::{CpuId, Priority, Scheduler, ThreadEntry, ThreadId, Timeout};
