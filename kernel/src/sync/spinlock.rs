// =============================================================================
// Kestrel: Spinlock
// =============================================================================
//
// Mutual exclusion that never sleeps. Usable from interrupt handlers and
// from code running before the scheduler exists.
//
// HOW IT WORKS:
//   - One atomic flag. `lock()` swaps it from false to true with Acquire
//     ordering, spinning (with a PAUSE hint) while somebody else has it.
//   - `unlock()` stores false with Release ordering, publishing every
//     write made inside the critical section to the next holder.
//   - Debug builds also record which CPU holds the lock, so a lock that is
//     dropped or unlocked in the wrong state can be reported.
//
// IRQ SAFETY:
//   A lock that an interrupt handler also takes must be held with
//   interrupts masked on the local CPU. Otherwise:
//     1. Thread A holds lock L with interrupts enabled
//     2. Interrupt fires on the same CPU
//     3. The handler tries to take L and spins forever, because A cannot
//        run again until the handler returns
//
//   `lock_irqsave()` snapshots the interrupt-enable bit, masks, then
//   locks. `unlock_irqrestore()` unlocks, then puts the bit back. Each
//   call carries its own snapshot, so nested sections restore correctly.
//
// TWO LAYERS:
//   RawSpinLock   bare lock word, explicit lock/unlock. What the mutex
//                 and other primitives build on.
//   SpinLock<T>   RAII wrapper owning the data it protects.
//
// =============================================================================

use core::cell::UnsafeCell;
use core::fmt;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};
#[cfg(debug_assertions)]
use core::sync::atomic::AtomicUsize;

use khal::IrqState;

use crate::thread::CpuId;

/// A bare spinlock word.
///
/// The caller decides what it protects and is responsible for masking
/// interrupts (or using the `_irqsave` variants) when the lock is shared
/// with interrupt context.
pub struct RawSpinLock {
    locked: AtomicBool,
    /// Holding CPU id + 1, zero when free.
    #[cfg(debug_assertions)]
    holder: AtomicUsize,
}

impl RawSpinLock {
    pub const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
            #[cfg(debug_assertions)]
            holder: AtomicUsize::new(0),
        }
    }

    /// Spin until the lock is ours.
    ///
    /// Stalls the calling context without ever yielding the CPU. The
    /// caller should have interrupts disabled if an interrupt handler on
    /// this CPU may take the same lock.
    #[inline]
    pub fn lock(&self) {
        loop {
            if self.try_acquire() {
                return;
            }
            // Wait on a plain load so the cache line stays shared until
            // the holder lets go.
            while self.locked.load(Ordering::Relaxed) {
                khal::cpu::relax();
            }
        }
    }

    /// Take the lock if it is free. Returns `false`, with nothing changed,
    /// if somebody else holds it.
    #[inline]
    pub fn try_lock(&self) -> bool {
        self.try_acquire()
    }

    /// Release the lock. Unlocking a free lock, or one another CPU holds,
    /// is fatal in debug builds.
    #[inline]
    pub fn unlock(&self) {
        kdebug_assert!(self.is_held(), "unlock of a spinlock nobody holds");
        kdebug_assert!(
            self.holder_cpu() == Some(khal::cpu::current_id()),
            "unlock on cpu {} of a spinlock held by cpu {:?}",
            khal::cpu::current_id(),
            self.holder_cpu()
        );
        #[cfg(debug_assertions)]
        self.holder.store(0, Ordering::Relaxed);
        self.locked.store(false, Ordering::Release);
    }

    /// Mask interrupts on this CPU, then lock.
    ///
    /// The returned snapshot must go back to [`unlock_irqrestore`].
    ///
    /// [`unlock_irqrestore`]: RawSpinLock::unlock_irqrestore
    #[inline]
    pub fn lock_irqsave(&self) -> IrqState {
        let state = khal::irq::save_and_disable();
        self.lock();
        state
    }

    /// Unlock, then restore the interrupt state `lock_irqsave` captured.
    #[inline]
    pub fn unlock_irqrestore(&self, state: IrqState) {
        self.unlock();
        khal::irq::restore(state);
    }

    /// Whether anybody holds the lock right now. Diagnostic only: the
    /// answer may be stale by the time the caller looks at it.
    #[inline]
    pub fn is_held(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }

    /// CPU holding the lock. Only tracked in debug builds.
    pub fn holder_cpu(&self) -> Option<CpuId> {
        #[cfg(debug_assertions)]
        {
            self.holder.load(Ordering::Relaxed).checked_sub(1)
        }
        #[cfg(not(debug_assertions))]
        {
            None
        }
    }

    #[inline]
    fn try_acquire(&self) -> bool {
        let won = self
            .locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok();
        #[cfg(debug_assertions)]
        if won {
            self.holder
                .store(khal::cpu::current_id() + 1, Ordering::Relaxed);
        }
        won
    }
}

impl Default for RawSpinLock {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RawSpinLock {
    fn drop(&mut self) {
        kdebug_assert!(
            !self.is_held(),
            "spinlock destroyed while held by cpu {:?}",
            self.holder_cpu()
        );
    }
}

impl fmt::Debug for RawSpinLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawSpinLock")
            .field("held", &self.is_held())
            .field("holder_cpu", &self.holder_cpu())
            .finish()
    }
}

/// A spinlock that owns the data it protects.
///
/// ```ignore
/// static COUNTER: SpinLock<u64> = SpinLock::new(0);
///
/// {
///     let mut guard = COUNTER.lock_irqsave();
///     *guard += 1;
/// } // unlocked, interrupts back to what they were
/// ```
pub struct SpinLock<T: ?Sized> {
    raw: RawSpinLock,
    data: UnsafeCell<T>,
}

// SAFETY: the lock hands out at most one reference to `data` at a time,
// so sharing the lock across CPUs only moves `T` between them.
unsafe impl<T: ?Sized + Send> Send for SpinLock<T> {}
unsafe impl<T: ?Sized + Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            raw: RawSpinLock::new(),
            data: UnsafeCell::new(value),
        }
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> SpinLock<T> {
    /// Lock without touching the interrupt state.
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        self.raw.lock();
        SpinLockGuard { lock: self, irq: None }
    }

    /// Mask interrupts, then lock. The guard restores them on release.
    pub fn lock_irqsave(&self) -> SpinLockGuard<'_, T> {
        let state = self.raw.lock_irqsave();
        SpinLockGuard {
            lock: self,
            irq: Some(state),
        }
    }

    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        if self.raw.try_lock() {
            Some(SpinLockGuard { lock: self, irq: None })
        } else {
            None
        }
    }

    /// Like [`try_lock`](SpinLock::try_lock), masking interrupts on
    /// success. On failure the interrupt state is left as it was.
    pub fn try_lock_irqsave(&self) -> Option<SpinLockGuard<'_, T>> {
        let state = khal::irq::save_and_disable();
        if self.raw.try_lock() {
            Some(SpinLockGuard {
                lock: self,
                irq: Some(state),
            })
        } else {
            khal::irq::restore(state);
            None
        }
    }

    pub fn is_locked(&self) -> bool {
        self.raw.is_held()
    }

    /// Exclusive access through `&mut self`; no locking needed.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

impl<T: Default> Default for SpinLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: ?Sized> fmt::Debug for SpinLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpinLock")
            .field("locked", &self.is_locked())
            .finish_non_exhaustive()
    }
}

/// A held [`SpinLock`]. Unlocks (and restores interrupts, if it masked
/// them) when dropped.
#[must_use = "dropping the guard releases the lock immediately"]
pub struct SpinLockGuard<'a, T: ?Sized> {
    lock: &'a SpinLock<T>,
    irq: Option<IrqState>,
}

impl<T: ?Sized> SpinLockGuard<'_, T> {
    /// Release now. Same as dropping the guard, but reads better at the
    /// end of a critical section.
    pub fn release(self) {
        drop(self);
    }
}

impl<T: ?Sized> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard exists only while the lock is held.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the guard exists only while the lock is held, and
        // `&mut self` makes this the only live reference through it.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        match self.irq.take() {
            Some(state) => self.lock.raw.unlock_irqrestore(state),
            None => self.lock.raw.unlock(),
        }
    }
}
