// =============================================================================
// Kestrel: Fatal Path
// =============================================================================
//
// Every broken invariant in the bring-up core ends here. There is no
// recovery: a half-initialized kernel has no state to go back to, and a
// lock with a corrupted owner cannot be trusted by anyone.
//
// WHAT WE DO:
//   1. Build a message: where (file:line), which expression, and any
//      formatted context the caller supplied.
//   2. panic!() with it.
//   3. On bare metal, the panic handler below prints the message over
//      serial and halts the CPU with interrupts masked.
//
// On a hosted target the panic unwinds like any Rust panic, which is what
// lets the test suite check that a violation really is fatal.
//
// =============================================================================

use core::fmt;

/// Report a failed kernel assertion. Never returns.
#[cold]
#[inline(never)]
#[track_caller]
pub fn assert_failed(expr: &'static str, context: Option<fmt::Arguments<'_>>) -> ! {
    let location = core::panic::Location::caller();
    match context {
        Some(args) => panic!(
            "ASSERT FAILED at ({}:{}): {}\n{}",
            location.file(),
            location.line(),
            expr,
            args
        ),
        None => panic!(
            "ASSERT FAILED at ({}:{}): {}",
            location.file(),
            location.line(),
            expr
        ),
    }
}

/// Assert a kernel invariant in every build. On failure the system halts.
///
/// ```ignore
/// kassert!(cpu_id < SMP_MAX_CPUS, "cpu {} out of range", cpu_id);
/// ```
#[macro_export]
macro_rules! kassert {
    ($cond:expr $(,)?) => {
        if !$cond {
            $crate::util::panic::assert_failed(stringify!($cond), None)
        }
    };
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            $crate::util::panic::assert_failed(stringify!($cond), Some(format_args!($($arg)+)))
        }
    };
}

/// Like [`kassert!`], but compiled out of release builds.
#[macro_export]
macro_rules! kdebug_assert {
    ($($arg:tt)+) => {
        if cfg!(debug_assertions) {
            $crate::kassert!($($arg)+)
        }
    };
}

/// The kernel panic handler.
///
/// Called for every panic on bare metal: explicit `panic!()`, failed
/// `kassert!`, arithmetic overflow in debug builds.
///
/// # Never Returns
/// The CPU is halted with interrupts disabled. Other CPUs keep running
/// until they trip over whatever state this one left behind; a future
/// improvement is to stop them with an IPI first.
#[cfg(all(target_os = "none", not(test)))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    // Mask interrupts first: an IRQ handler that panics again while we
    // hold the serial lock would never get the lock back.
    khal::irq::disable();

    klog::println!();
    klog::println!("==========================================================");
    klog::println!("  KERNEL PANIC on cpu {}", khal::cpu::current_id());
    klog::println!("==========================================================");

    if let Some(location) = info.location() {
        klog::println!("  Location: {}:{}", location.file(), location.line());
    } else {
        klog::println!("  Location: <unknown>");
    }

    klog::println!("  Message: {}", info.message());

    klog::println!("==========================================================");
    klog::println!("  System halted. Reboot required.");
    klog::println!("==========================================================");

    khal::cpu::halt_forever()
}
