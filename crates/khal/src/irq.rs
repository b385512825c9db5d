//! Interrupt-enable state and interrupt-context tracking.
//!
//! `save_and_disable` / `restore` are the building blocks for
//! `lock_irqsave`-style critical sections: each caller keeps its own
//! [`IrqState`] snapshot, so two nested sections restore correctly no matter
//! how they interleave with each other.
//!
//! Interrupt handlers bracket their body with [`InterruptScope`] so that
//! thread-only primitives (the sleeping mutex) can refuse to run there.

/// Snapshot of the current CPU's interrupt-enable bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "an IrqState must be handed back to `restore`"]
pub struct IrqState {
    enabled: bool,
}

impl IrqState {
    /// Whether interrupts were enabled when the snapshot was taken.
    pub const fn was_enabled(self) -> bool {
        self.enabled
    }
}

/// Record the interrupt-enable bit, then mask interrupts.
#[inline]
pub fn save_and_disable() -> IrqState {
    let enabled = imp::are_enabled();
    if enabled {
        imp::disable();
    }
    IrqState { enabled }
}

/// Put the interrupt-enable bit back to what `state` recorded.
#[inline]
pub fn restore(state: IrqState) {
    if state.enabled {
        imp::enable();
    } else {
        imp::disable();
    }
}

pub use imp::{are_enabled, disable, enable, in_interrupt};

/// Marks the current CPU as executing an interrupt handler until dropped.
///
/// Nesting is allowed (an exception taken inside an IRQ handler).
pub struct InterruptScope {
    _private: (),
}

impl InterruptScope {
    pub fn enter() -> Self {
        imp::enter_interrupt();
        Self { _private: () }
    }
}

impl Drop for InterruptScope {
    fn drop(&mut self) {
        imp::exit_interrupt();
    }
}

// ── Bare metal (x86_64) ─────────────────────────────────────────

#[cfg(all(target_os = "none", target_arch = "x86_64"))]
mod imp {
    use core::sync::atomic::{AtomicU32, Ordering};

    use x86_64::instructions::interrupts;

    use crate::cpu::{self, MAX_CPUS};

    /// Per-CPU interrupt nesting depth. Only ever touched by its own CPU
    /// with interrupts masked, so Relaxed is enough.
    static IRQ_DEPTH: [AtomicU32; MAX_CPUS] = [const { AtomicU32::new(0) }; MAX_CPUS];

    #[inline(always)]
    pub fn are_enabled() -> bool {
        interrupts::are_enabled()
    }

    #[inline(always)]
    pub fn enable() {
        interrupts::enable();
    }

    #[inline(always)]
    pub fn disable() {
        interrupts::disable();
    }

    pub fn in_interrupt() -> bool {
        IRQ_DEPTH[cpu::current_id()].load(Ordering::Relaxed) != 0
    }

    pub(super) fn enter_interrupt() {
        IRQ_DEPTH[cpu::current_id()].fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn exit_interrupt() {
        IRQ_DEPTH[cpu::current_id()].fetch_sub(1, Ordering::Relaxed);
    }
}

// ── Hosted emulation ────────────────────────────────────────────

#[cfg(not(target_os = "none"))]
mod imp {
    use std::cell::Cell;

    std::thread_local! {
        // CPUs come out of reset with interrupts masked.
        static ENABLED: Cell<bool> = const { Cell::new(false) };
        static DEPTH: Cell<u32> = const { Cell::new(0) };
    }

    pub fn are_enabled() -> bool {
        ENABLED.with(|e| e.get())
    }

    pub fn enable() {
        ENABLED.with(|e| e.set(true));
    }

    pub fn disable() {
        ENABLED.with(|e| e.set(false));
    }

    pub fn in_interrupt() -> bool {
        DEPTH.with(|d| d.get() != 0)
    }

    pub(super) fn enter_interrupt() {
        DEPTH.with(|d| d.set(d.get() + 1));
    }

    pub(super) fn exit_interrupt() {
        DEPTH.with(|d| d.set(d.get() - 1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_and_restore_round_trips_both_states() {
        enable();
        let s = save_and_disable();
        assert!(s.was_enabled());
        assert!(!are_enabled());
        restore(s);
        assert!(are_enabled());

        disable();
        let s = save_and_disable();
        assert!(!s.was_enabled());
        restore(s);
        assert!(!are_enabled());
    }

    #[test]
    fn interrupt_scope_nests() {
        assert!(!in_interrupt());
        {
            let _outer = InterruptScope::enter();
            {
                let _inner = InterruptScope::enter();
                assert!(in_interrupt());
            }
            assert!(in_interrupt());
        }
        assert!(!in_interrupt());
    }
}
