//! CPU identity and halting.
//!
//! Every CPU is numbered `0..MAX_CPUS`, with 0 being the boot CPU. Arch
//! bring-up code calls [`init_current`] once per CPU before anything asks
//! for [`current_id`]; until the boot CPU has done so, every caller is
//! assumed to be the boot CPU (there is nobody else running yet).

/// Upper bound on the number of CPUs the kernel will ever bring up.
pub const MAX_CPUS: usize = 16;

/// Spin-wait hint for busy loops.
#[inline(always)]
pub fn relax() {
    core::hint::spin_loop();
}

pub use imp::{current_id, halt, halt_forever, init_current};

#[cfg(not(target_os = "none"))]
pub use imp::set_current_id;

// ── Bare metal (x86_64) ─────────────────────────────────────────

#[cfg(all(target_os = "none", target_arch = "x86_64"))]
mod imp {
    use core::arch::asm;
    use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    use x86_64::VirtAddr;
    use x86_64::registers::model_specific::{GsBase, KernelGsBase};

    use super::MAX_CPUS;

    /// CPU-local block addressed through GS. `id` must stay at offset 0:
    /// [`current_id`] reads it with a single `gs:[0]` load.
    #[repr(C)]
    struct CpuLocal {
        id: AtomicU32,
    }

    static CPU_LOCALS: [CpuLocal; MAX_CPUS] = [const { CpuLocal { id: AtomicU32::new(0) } }; MAX_CPUS];

    /// Set once the boot CPU has loaded its GS base.
    static LOCALS_READY: AtomicBool = AtomicBool::new(false);

    /// Point this CPU's GS base at its CPU-local block.
    ///
    /// # Safety
    /// Must be called exactly once per CPU, on that CPU, before it calls
    /// [`current_id`], and `id` must be unique and below `MAX_CPUS`.
    pub unsafe fn init_current(id: usize) {
        assert!(id < MAX_CPUS, "cpu id {} out of range", id);
        let local = &CPU_LOCALS[id];
        local.id.store(id as u32, Ordering::Relaxed);

        let base = VirtAddr::new(local as *const CpuLocal as u64);
        // Kernel GS mirrors GS so a later swapgs on syscall entry lands on
        // the same block.
        GsBase::write(base);
        KernelGsBase::write(base);

        LOCALS_READY.store(true, Ordering::Release);
    }

    /// The id of the CPU executing this code.
    #[inline]
    pub fn current_id() -> usize {
        if !LOCALS_READY.load(Ordering::Acquire) {
            return 0;
        }
        let id: u32;
        // SAFETY: GS points at a live CpuLocal once LOCALS_READY is set
        // (secondary CPUs call init_current before anything else).
        unsafe {
            asm!(
                "mov {:e}, gs:[0]",
                out(reg) id,
                options(nostack, preserves_flags, readonly)
            );
        }
        id as usize
    }

    /// Halt until the next interrupt.
    #[inline(always)]
    pub fn halt() {
        x86_64::instructions::hlt();
    }

    /// Stop this CPU for good: interrupts off, then HLT in a loop so an
    /// NMI cannot resume execution.
    pub fn halt_forever() -> ! {
        loop {
            x86_64::instructions::interrupts::disable();
            x86_64::instructions::hlt();
        }
    }
}

// ── Hosted emulation ────────────────────────────────────────────

#[cfg(not(target_os = "none"))]
mod imp {
    use std::cell::Cell;

    use super::MAX_CPUS;

    std::thread_local! {
        static CURRENT_CPU: Cell<usize> = const { Cell::new(0) };
    }

    /// Declare which emulated CPU the calling OS thread is.
    pub fn set_current_id(id: usize) {
        assert!(id < MAX_CPUS, "cpu id {} out of range", id);
        CURRENT_CPU.with(|c| c.set(id));
    }

    /// Same as [`set_current_id`]; kept `unsafe` to match the bare-metal
    /// signature.
    ///
    /// # Safety
    /// None on a hosted target.
    pub unsafe fn init_current(id: usize) {
        set_current_id(id);
    }

    pub fn current_id() -> usize {
        CURRENT_CPU.with(|c| c.get())
    }

    pub fn halt() {
        std::thread::yield_now();
    }

    pub fn halt_forever() -> ! {
        loop {
            std::thread::park();
        }
    }
}
