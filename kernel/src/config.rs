//! Kernel-wide compile-time configuration.

use crate::thread::{CpuId, Priority};

/// Most CPUs the kernel will bring up, boot CPU included.
pub const SMP_MAX_CPUS: usize = khal::cpu::MAX_CPUS;

/// The CPU that runs the primary boot path.
pub const BOOT_CPU_ID: CpuId = 0;

/// Priority of the bootstrap threads.
pub const DEFAULT_PRIORITY: Priority = Priority::DEFAULT;

/// Kernel stack size for the bootstrap threads.
pub const DEFAULT_STACK_SIZE: usize = 8192;

/// Initial klog filter. Debug builds also show every init hook as it runs.
pub const BOOT_LOG_LEVEL: klog::Level = if cfg!(debug_assertions) {
    klog::Level::Debug
} else {
    klog::Level::Info
};
