// =============================================================================
// Kestrel: Mutex
// =============================================================================
//
// A sleeping lock for thread context. A thread that finds the mutex held
// is put on the mutex's wait queue and gives up its CPU; it does not spin.
//
// STATE:
//   holder   thread that owns the mutex, if any
//   waiters  threads queued (or about to be) on `queue`
//
//   Both live under an internal spinlock taken with interrupts masked.
//   The spinlock is held only across bookkeeping, never across a sleep.
//
// ACQUIRE:
//   1. Free? Take it and return.
//   2. Zero timeout? Fail with TimedOut, nothing changed.
//   3. Otherwise count ourselves as a waiter and block on the queue. The
//      queue drops the spinlock only after we are enqueued, so a release
//      racing with us cannot miss us.
//
// RELEASE:
//   If a waiter exists, ownership passes straight to it: the holder field
//   is set to the woken thread before anybody else can look. A thread
//   arriving in between sees the mutex held and queues behind it.
//   No waiter: the mutex becomes free.
//
// RULES:
//   - Thread context only. Acquiring from an interrupt handler is fatal.
//   - Non-recursive. Re-acquiring a mutex you hold deadlocks.
//   - Only the holder may release.
//
// =============================================================================

use core::cell::UnsafeCell;
use core::fmt;
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};

use super::spinlock::SpinLock;
use super::wait_queue::{WaitQueue, WaitResult};
use crate::error::{KResult, KernelError};
use crate::thread::{ThreadId, Timeout};

#[derive(Debug)]
struct MutexState {
    holder: Option<ThreadId>,
    waiters: usize,
}

/// A sleeping mutex without attached data. Callers pair `acquire` and
/// `release` themselves.
pub struct RawMutex<Q: WaitQueue> {
    state: SpinLock<MutexState>,
    queue: Q,
}

impl<Q: WaitQueue> RawMutex<Q> {
    /// An unlocked mutex sleeping on `queue`.
    pub const fn new(queue: Q) -> Self {
        Self {
            state: SpinLock::new(MutexState {
                holder: None,
                waiters: 0,
            }),
            queue,
        }
    }

    /// An unlocked mutex with a fresh queue.
    pub fn init() -> Self
    where
        Q: Default,
    {
        Self::new(Q::default())
    }

    /// Take the mutex, sleeping up to `timeout` for it.
    ///
    /// `Timeout::Infinite` never fails. `Timeout::ZERO` never sleeps. On
    /// `Err(TimedOut)` the mutex is exactly as if this call never happened.
    pub fn acquire(&self, timeout: Timeout) -> KResult<()> {
        kassert!(
            !khal::irq::in_interrupt(),
            "mutex acquire from interrupt context"
        );

        let me = self.queue.current_thread();
        let mut state = self.state.lock_irqsave();

        if state.holder.is_none() {
            state.holder = Some(me);
            return Ok(());
        }

        if timeout.is_zero() {
            return Err(KernelError::TimedOut);
        }

        state.waiters += 1;
        match self.queue.block(timeout, move || drop(state)) {
            WaitResult::Woken => {
                // The releaser already made us the holder.
                let state = self.state.lock_irqsave();
                kassert!(
                    state.holder == Some(me),
                    "woken waiter {} is not the mutex holder ({:?})",
                    me,
                    state.holder
                );
                Ok(())
            }
            WaitResult::TimedOut => {
                let mut state = self.state.lock_irqsave();
                state.waiters -= 1;
                Err(KernelError::TimedOut)
            }
        }
    }

    /// Give the mutex up. Fatal unless the caller holds it.
    pub fn release(&self) {
        let me = self.queue.current_thread();
        let mut state = self.state.lock_irqsave();

        kassert!(
            state.holder == Some(me),
            "mutex release by {} which does not hold it (holder {:?})",
            me,
            state.holder
        );

        if state.waiters > 0 {
            if let Some(next) = self.queue.wake_one() {
                state.holder = Some(next);
                state.waiters -= 1;
                return;
            }
        }
        state.holder = None;
    }

    /// Whether the calling thread is the holder.
    pub fn is_held_by_caller(&self) -> bool {
        let me = self.queue.current_thread();
        self.state.lock_irqsave().holder == Some(me)
    }

    /// Current holder. Diagnostic only.
    pub fn holder(&self) -> Option<ThreadId> {
        self.state.lock_irqsave().holder
    }

    pub fn queue(&self) -> &Q {
        &self.queue
    }
}

impl<Q: WaitQueue> Drop for RawMutex<Q> {
    fn drop(&mut self) {
        if !cfg!(debug_assertions) {
            return;
        }
        let me = self.queue.current_thread();
        let state = self.state.get_mut();
        kassert!(
            state.holder.is_none() || state.holder == Some(me),
            "mutex destroyed while held by {:?}",
            state.holder
        );
        kassert!(
            state.waiters == 0,
            "mutex destroyed with {} waiters",
            state.waiters
        );
    }
}

impl<Q: WaitQueue + Default> Default for RawMutex<Q> {
    fn default() -> Self {
        Self::init()
    }
}

impl<Q: WaitQueue> fmt::Debug for RawMutex<Q> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock_irqsave();
        f.debug_struct("RawMutex")
            .field("holder", &state.holder)
            .field("waiters", &state.waiters)
            .finish()
    }
}

/// A sleeping mutex protecting a `T`.
pub struct Mutex<T: ?Sized, Q: WaitQueue> {
    raw: RawMutex<Q>,
    data: UnsafeCell<T>,
}

// SAFETY: `data` is only reachable through a guard, and the raw mutex
// admits one guard at a time.
unsafe impl<T: ?Sized + Send, Q: WaitQueue> Send for Mutex<T, Q> {}
unsafe impl<T: ?Sized + Send, Q: WaitQueue> Sync for Mutex<T, Q> {}

impl<T, Q: WaitQueue> Mutex<T, Q> {
    pub const fn new(value: T, queue: Q) -> Self {
        Self {
            raw: RawMutex::new(queue),
            data: UnsafeCell::new(value),
        }
    }
}

impl<T: ?Sized, Q: WaitQueue> Mutex<T, Q> {
    /// Sleep until the mutex is ours.
    pub fn lock(&self) -> MutexGuard<'_, T, Q> {
        let acquired = self.raw.acquire(Timeout::Infinite);
        kassert!(acquired.is_ok(), "infinite mutex wait returned {:?}", acquired);
        self.guard()
    }

    /// Take the mutex only if nobody holds it.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T, Q>> {
        self.raw.acquire(Timeout::ZERO).ok().map(|()| self.guard())
    }

    pub fn lock_timeout(&self, timeout: Timeout) -> KResult<MutexGuard<'_, T, Q>> {
        self.raw.acquire(timeout)?;
        Ok(self.guard())
    }

    pub fn is_held_by_caller(&self) -> bool {
        self.raw.is_held_by_caller()
    }

    pub fn raw(&self) -> &RawMutex<Q> {
        &self.raw
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    fn guard(&self) -> MutexGuard<'_, T, Q> {
        MutexGuard {
            mutex: self,
            _not_send: PhantomData,
        }
    }
}

impl<T: ?Sized, Q: WaitQueue> fmt::Debug for Mutex<T, Q> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutex")
            .field("raw", &self.raw)
            .finish_non_exhaustive()
    }
}

/// A held [`Mutex`]. Releases on drop.
///
/// Not `Send`: the release must come from the thread that acquired.
#[must_use = "dropping the guard releases the mutex immediately"]
pub struct MutexGuard<'a, T: ?Sized, Q: WaitQueue> {
    mutex: &'a Mutex<T, Q>,
    _not_send: PhantomData<*const ()>,
}

impl<T: ?Sized, Q: WaitQueue> MutexGuard<'_, T, Q> {
    /// Release before the end of scope.
    pub fn release(self) {
        drop(self);
    }
}

impl<T: ?Sized, Q: WaitQueue> Deref for MutexGuard<'_, T, Q> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: we hold the mutex.
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T: ?Sized, Q: WaitQueue> DerefMut for MutexGuard<'_, T, Q> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: we hold the mutex, and `&mut self` is the only path to it.
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T: ?Sized, Q: WaitQueue> Drop for MutexGuard<'_, T, Q> {
    fn drop(&mut self) {
        self.mutex.raw.release();
    }
}
