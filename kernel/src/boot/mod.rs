// =============================================================================
// Kestrel: Boot Orchestrator
// =============================================================================
//
// Takes the boot CPU from the arch entry point to a running scheduler,
// then finishes system bring-up from a thread.
//
// WHAT HAPPENED BEFORE WE GOT HERE:
//   Arch assembly set up a stack, cleared BSS, and called `boot()` with
//   the four words the loader left in registers. Interrupts are masked.
//   Only the boot CPU is running.
//
// WHAT WE DO HERE:
//   Stage ColdBoot:                boot args saved, constructors run,
//                                  then the logger is brought up
//   Stage EarlyArchPlatform:       arch/platform/target early init done,
//                                  console works, banner printed
//   Stage HeapReady:               heap up, allocation legal
//   Stage KernelReady:             every level below THREADING has run
//   Stage ThreadingReady:          bootstrap2 created, pinned to CPU 0
//   Stage BootstrapThreadRunning:  bootstrap2 handed to the scheduler
//   Stage IdleForever:             this context is now CPU 0's idle thread
//
//   bootstrap2 then runs THREADING..LAST on the boot CPU, stages the
//   secondary CPU threads, and exits.
//
// LEVEL CURSOR:
//   The primary path runs init levels as a chain of intervals. Each one
//   must start exactly one level past where the previous one stopped,
//   so every level is run exactly once and none is skipped. The cursor
//   is shared by the boot context and bootstrap2; they never run at the
//   same time.
//
// =============================================================================

mod args;
mod platform;

pub use args::BootArgs;
pub use platform::Platform;

use alloc::boxed::Box;
use core::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering};

use spin::Once;

use crate::config::{BOOT_CPU_ID, BOOT_LOG_LEVEL, DEFAULT_PRIORITY, DEFAULT_STACK_SIZE};
use crate::init::{InitFlags, InitLevel, InitRegistry};
#[cfg(feature = "smp")]
use crate::smp::SecondaryCpuLauncher;
use crate::thread::Scheduler;

/// How far the boot CPU has come. Stages are only ever entered in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum BootStage {
    Start = 0,
    ColdBoot = 1,
    EarlyArchPlatform = 2,
    HeapReady = 3,
    KernelReady = 4,
    ThreadingReady = 5,
    BootstrapThreadRunning = 6,
    IdleForever = 7,
}

impl BootStage {
    const fn from_u8(raw: u8) -> BootStage {
        match raw {
            0 => BootStage::Start,
            1 => BootStage::ColdBoot,
            2 => BootStage::EarlyArchPlatform,
            3 => BootStage::HeapReady,
            4 => BootStage::KernelReady,
            5 => BootStage::ThreadingReady,
            6 => BootStage::BootstrapThreadRunning,
            _ => BootStage::IdleForever,
        }
    }

    /// The stage that must come right before this one.
    const fn previous(self) -> Option<BootStage> {
        match self {
            BootStage::Start => None,
            other => Some(BootStage::from_u8(other as u8 - 1)),
        }
    }
}

/// Drives boot on the primary CPU and owns the secondary CPU launcher.
///
/// Lives in a `static` (or is leaked) because the threads it creates keep
/// pointing back into it for the rest of boot.
pub struct BootOrchestrator<P: Platform, S: Scheduler> {
    registry: &'static InitRegistry,
    platform: &'static P,
    scheduler: &'static S,
    #[cfg(feature = "smp")]
    launcher: SecondaryCpuLauncher<S>,

    args: Once<BootArgs>,
    ctors_called: AtomicBool,
    stage: AtomicU8,
    /// Highest init level the primary path has run; 0 before the first.
    level: AtomicU32,
    complete: AtomicBool,
}

impl<P: Platform, S: Scheduler> BootOrchestrator<P, S> {
    pub const fn new(
        registry: &'static InitRegistry,
        platform: &'static P,
        scheduler: &'static S,
    ) -> Self {
        Self {
            registry,
            platform,
            scheduler,
            #[cfg(feature = "smp")]
            launcher: SecondaryCpuLauncher::new(scheduler, registry),
            args: Once::new(),
            ctors_called: AtomicBool::new(false),
            stage: AtomicU8::new(BootStage::Start as u8),
            level: AtomicU32::new(0),
            complete: AtomicBool::new(false),
        }
    }

    /// Kernel entry on the boot CPU. Ends as this CPU's idle thread.
    pub fn boot(&'static self, args: [usize; 4]) -> ! {
        self.store_boot_args(args);
        self.enter(BootStage::ColdBoot);

        self.platform.call_constructors();
        self.ctors_called.store(true, Ordering::Release);
        klog::init(BOOT_LOG_LEVEL);

        self.run_primary(InitLevel::EARLIEST, InitLevel::ARCH_EARLY.prev());
        self.platform.arch_early_init();

        self.run_primary(InitLevel::ARCH_EARLY, InitLevel::PLATFORM_EARLY.prev());
        self.platform.platform_early_init();

        self.run_primary(InitLevel::PLATFORM_EARLY, InitLevel::ARCH_PREVM.prev());
        self.platform.target_early_init();
        self.enter(BootStage::EarlyArchPlatform);

        // Console and command line are up from here.
        klog::println!();
        klog::println!("==========================================================");
        klog::println!("  Kestrel v{}", env!("CARGO_PKG_VERSION"));
        klog::println!("==========================================================");
        klog::info!("boot args {}", BootArgs(args));

        klog::debug!("initializing arch pre-vm");
        self.platform.arch_prevm_init();
        self.run_primary(InitLevel::ARCH_PREVM, InitLevel::PLATFORM_PREVM.prev());

        klog::debug!("initializing platform pre-vm");
        self.platform.platform_prevm_init();
        self.run_primary(InitLevel::PLATFORM_PREVM, InitLevel::VM_PREHEAP.prev());

        klog::debug!("initializing vm pre-heap");
        self.platform.vm_init_preheap();
        self.run_primary(InitLevel::VM_PREHEAP, InitLevel::HEAP.prev());

        klog::debug!("initializing heap");
        self.platform.heap_init();
        self.enter(BootStage::HeapReady);
        self.run_primary(InitLevel::HEAP, InitLevel::VM.prev());

        klog::debug!("initializing vm");
        self.platform.vm_init();
        self.run_primary(InitLevel::VM, InitLevel::TOPOLOGY.prev());

        klog::debug!("initializing topology");
        self.platform.topology_init();
        self.run_primary(InitLevel::TOPOLOGY, InitLevel::KERNEL.prev());

        klog::debug!("initializing kernel");
        self.platform.kernel_init();
        self.run_primary(InitLevel::KERNEL, InitLevel::THREADING.prev());
        self.enter(BootStage::KernelReady);

        klog::debug!("creating bootstrap completion thread");
        let mut thread = self.scheduler.create_thread(
            "bootstrap2",
            Box::new(move || self.bootstrap2()),
            DEFAULT_PRIORITY,
            DEFAULT_STACK_SIZE,
        );
        self.scheduler.pin(&mut thread, BOOT_CPU_ID);
        self.scheduler.detach(&mut thread);
        self.enter(BootStage::ThreadingReady);

        self.scheduler.resume(thread);
        self.enter(BootStage::BootstrapThreadRunning);

        // Become the idle thread and enable interrupts to start the scheduler.
        self.enter(BootStage::IdleForever);
        self.scheduler.become_idle()
    }

    /// Second half of boot, on a thread pinned to the boot CPU.
    fn bootstrap2(&'static self) -> i32 {
        kdebug_assert!(
            khal::cpu::current_id() == BOOT_CPU_ID,
            "bootstrap2 running on cpu {}",
            khal::cpu::current_id()
        );
        klog::debug!("top of bootstrap2()");

        self.run_primary(InitLevel::THREADING, InitLevel::ARCH.prev());

        #[cfg(feature = "smp")]
        self.launcher
            .prepare(self.platform.secondary_cpu_count(), self.current_level());

        self.platform.arch_init();
        self.run_primary(InitLevel::ARCH, InitLevel::PLATFORM.prev());

        klog::debug!("initializing platform");
        self.platform.platform_init();
        self.run_primary(InitLevel::PLATFORM, InitLevel::ARCH_LATE.prev());

        klog::debug!("initializing target");
        self.platform.target_init();
        self.run_primary(InitLevel::ARCH_LATE, InitLevel::USER.prev());

        self.platform.kernel_shell_init();

        klog::debug!("initializing apps");
        self.platform.apps_init();

        klog::debug!("moving to last init level");
        self.run_primary(InitLevel::USER, InitLevel::LAST);

        self.complete.store(true, Ordering::Release);
        klog::info!("boot complete");
        0
    }

    /// Run `[start, stop]` for the boot CPU, continuing the level cursor.
    fn run_primary(&self, start: InitLevel, stop: InitLevel) {
        let last = self.level.load(Ordering::Acquire);
        kassert!(
            last.checked_add(1) == Some(start.raw()),
            "init interval {}..{} does not continue from {}",
            start,
            stop,
            InitLevel(last)
        );
        self.registry.run(InitFlags::PRIMARY_CPU, start, stop);
        self.level.store(stop.raw(), Ordering::Release);
    }

    fn store_boot_args(&self, args: [usize; 4]) {
        let mut stored = false;
        self.args.call_once(|| {
            stored = true;
            BootArgs(args)
        });
        kassert!(stored, "boot args stored twice");
    }

    fn enter(&self, next: BootStage) {
        let prev = next.previous().map_or(u8::MAX, |s| s as u8);
        let result =
            self.stage
                .compare_exchange(prev, next as u8, Ordering::AcqRel, Ordering::Acquire);
        kassert!(
            result.is_ok(),
            "boot stage {:?} entered from {:?}",
            next,
            self.stage()
        );
        klog::trace!("boot stage {:?}", next);
    }

    /// The loader's boot words, once `boot()` has stored them.
    pub fn boot_args(&self) -> Option<&BootArgs> {
        self.args.get()
    }

    pub fn global_constructors_called(&self) -> bool {
        self.ctors_called.load(Ordering::Acquire)
    }

    pub fn stage(&self) -> BootStage {
        BootStage::from_u8(self.stage.load(Ordering::Acquire))
    }

    /// Highest init level the primary path has completed.
    pub fn current_level(&self) -> InitLevel {
        InitLevel(self.level.load(Ordering::Acquire))
    }

    /// Whether bootstrap2 has run every level up to LAST.
    pub fn is_complete(&self) -> bool {
        self.complete.load(Ordering::Acquire)
    }

    pub fn registry(&self) -> &'static InitRegistry {
        self.registry
    }

    #[cfg(feature = "smp")]
    pub fn launcher(&self) -> &SecondaryCpuLauncher<S> {
        &self.launcher
    }
}
