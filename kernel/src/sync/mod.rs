// =============================================================================
// Kestrel: Synchronization Primitives
// =============================================================================
//
// Two kinds of lock, for two kinds of context:
//
//   SpinLock  Never sleeps. Works in interrupt handlers and before the
//             scheduler is running. Keep critical sections short.
//   Mutex     Sleeps on a wait queue while contended. Thread context only.
//
// Lock ordering:
//   A Mutex may be acquired while holding other mutexes. A SpinLock may be
//   taken while holding a Mutex. NEVER acquire a Mutex while holding a
//   SpinLock: the sleep would leave the spinlock held with the CPU gone.
// =============================================================================

pub mod mutex;
pub mod spinlock;
pub mod wait_queue;

pub use mutex::{Mutex, MutexGuard, RawMutex};
pub use spinlock::{RawSpinLock, SpinLock, SpinLockGuard};
pub use wait_queue::{WaitQueue, WaitResult};
