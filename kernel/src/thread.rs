//! Thread identity and the scheduler contract.
//!
//! The core never schedules anything itself. It asks a [`Scheduler`] to
//! make, pin and start threads, and to turn the boot CPU into its idle
//! thread once bring-up is far enough along.

use alloc::boxed::Box;
use core::fmt;
use core::time::Duration;

/// Index of a CPU, `0..SMP_MAX_CPUS`.
pub type CpuId = usize;

/// Opaque, copyable identity of a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub u64);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tid:{}", self.0)
    }
}

/// Scheduling priority. Interpreted only by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Priority(pub u8);

impl Priority {
    pub const LOWEST: Priority = Priority(0);
    pub const DEFAULT: Priority = Priority(16);
    pub const HIGHEST: Priority = Priority(31);
}

/// What a new thread runs. The return value is its exit code.
pub type ThreadEntry = Box<dyn FnOnce() -> i32 + Send + 'static>;

/// How long a blocking call may wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Wait until the condition holds, however long that takes.
    Infinite,
    /// Give up after this long. A zero duration never waits at all.
    After(Duration),
}

impl Timeout {
    pub const ZERO: Timeout = Timeout::After(Duration::ZERO);

    pub const fn from_millis(ms: u64) -> Timeout {
        Timeout::After(Duration::from_millis(ms))
    }

    pub fn is_zero(&self) -> bool {
        matches!(self, Timeout::After(d) if d.is_zero())
    }
}

/// The scheduler as seen from bring-up.
///
/// A `Thread` handle owns a thread that has been created but not yet
/// started. [`Scheduler::resume`] consumes it: once a thread runs, the
/// scheduler owns it and callers keep only its [`ThreadId`].
pub trait Scheduler: Sync + 'static {
    type Thread: Send + 'static;

    /// Create a suspended thread.
    fn create_thread(
        &self,
        name: &'static str,
        entry: ThreadEntry,
        priority: Priority,
        stack_size: usize,
    ) -> Self::Thread;

    fn thread_id(&self, thread: &Self::Thread) -> ThreadId;

    /// Restrict the thread to one CPU.
    fn pin(&self, thread: &mut Self::Thread, cpu: CpuId);

    /// Let the scheduler reclaim the thread when it exits; nobody joins it.
    fn detach(&self, thread: &mut Self::Thread);

    /// Make the thread runnable.
    fn resume(&self, thread: Self::Thread);

    /// Turn the calling context into this CPU's idle thread. Enables
    /// interrupts and starts scheduling.
    fn become_idle(&self) -> !;

    /// Per-CPU scheduler setup a secondary CPU needs before it can run
    /// threads. Called on that CPU with interrupts disabled.
    fn secondary_cpu_init_early(&self, _cpu: CpuId) {}

    /// Enter the scheduler on a secondary CPU.
    fn secondary_cpu_entry(&self, cpu: CpuId) -> !;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_timeout() {
        assert!(Timeout::ZERO.is_zero());
        assert!(!Timeout::Infinite.is_zero());
        assert!(!Timeout::from_millis(5).is_zero());
    }
}
