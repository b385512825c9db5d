// =============================================================================
// Kestrel: Secondary CPU Launcher
// =============================================================================
//
// Runs the SECONDARY_CPUS init hooks on every CPU other than the boot CPU,
// each from a thread pinned to that CPU.
//
// BRING-UP SEQUENCE:
//   1. bootstrap2 (boot CPU, THREADING reached) calls `prepare(n)`.
//      For each secondary CPU 1..=n we create a suspended, pinned,
//      detached "secondary-bootstrap" thread and park it in that CPU's
//      slot. State: Created.
//   2. Arch code starts the secondary CPUs. Each one sets up its own
//      GDT/IDT/local APIC, then calls `secondary_cpu_entry(id)`.
//   3. `notify_early_init_done(id)` moves the slot to EarlySignaled,
//      takes the thread out of the slot and resumes it. From then on the
//      scheduler owns it; the slot keeps only its ThreadId.
//   4. The thread marks its slot Running and runs
//      SECONDARY_CPUS hooks THREADING..LAST, then exits.
//
// Secondary CPUs never run PRIMARY_CPU hooks, and never run anything at
// THREADING or above before the boot CPU has got there: the threads do
// not exist until then.
//
// =============================================================================

use alloc::boxed::Box;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::config::{DEFAULT_PRIORITY, DEFAULT_STACK_SIZE, SMP_MAX_CPUS};
use crate::init::{InitFlags, InitLevel, InitRegistry};
use crate::sync::SpinLock;
use crate::thread::{CpuId, Scheduler, ThreadId};
use crate::util::panic::assert_failed;

/// Where a secondary CPU's bootstrap thread is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuBootState {
    /// Thread created and parked, CPU not yet up.
    Created,
    /// The CPU finished its early init and released the thread.
    EarlySignaled,
    /// The thread is running the secondary init hooks.
    Running,
}

struct PerCpuBootState<T> {
    cpu_id: CpuId,
    /// Owned until resumed, then handed to the scheduler.
    thread: Option<T>,
    thread_id: ThreadId,
    state: CpuBootState,
}

/// Stages and releases one bootstrap thread per secondary CPU.
pub struct SecondaryCpuLauncher<S: Scheduler> {
    scheduler: &'static S,
    registry: &'static InitRegistry,
    /// Indexed by CPU id. Slot 0 (the boot CPU) stays empty.
    slots: SpinLock<[Option<PerCpuBootState<S::Thread>>; SMP_MAX_CPUS]>,
    prepared: AtomicBool,
    count: AtomicUsize,
}

impl<S: Scheduler> SecondaryCpuLauncher<S> {
    pub const fn new(scheduler: &'static S, registry: &'static InitRegistry) -> Self {
        Self {
            scheduler,
            registry,
            slots: SpinLock::new([const { None }; SMP_MAX_CPUS]),
            prepared: AtomicBool::new(false),
            count: AtomicUsize::new(0),
        }
    }

    /// Create the parked bootstrap threads for CPUs `1..=count`.
    ///
    /// `reached` is the highest init level the boot CPU has completed; it
    /// must be at least THREADING. A `count` the kernel cannot hold is
    /// clamped to `SMP_MAX_CPUS - 1`. Returns the count actually used.
    /// Fatal if called twice.
    pub fn prepare(&'static self, count: usize, reached: InitLevel) -> usize {
        kassert!(
            reached >= InitLevel::THREADING,
            "secondary cpus prepared at level {}, before THREADING",
            reached
        );
        kassert!(
            self.prepared
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok(),
            "secondary cpus prepared twice"
        );

        let count = if count >= SMP_MAX_CPUS {
            klog::error!(
                "invalid secondary cpu count {}, SMP_MAX_CPUS {}",
                count,
                SMP_MAX_CPUS
            );
            SMP_MAX_CPUS - 1
        } else {
            count
        };

        for cpu in 1..=count {
            klog::debug!("creating bootstrap completion thread for cpu {}", cpu);
            let mut thread = self.scheduler.create_thread(
                "secondary-bootstrap",
                Box::new(move || self.secondary_bootstrap(cpu)),
                DEFAULT_PRIORITY,
                DEFAULT_STACK_SIZE,
            );
            self.scheduler.pin(&mut thread, cpu);
            self.scheduler.detach(&mut thread);
            let thread_id = self.scheduler.thread_id(&thread);

            self.slots.lock_irqsave()[cpu] = Some(PerCpuBootState {
                cpu_id: cpu,
                thread: Some(thread),
                thread_id,
                state: CpuBootState::Created,
            });
        }

        self.count.store(count, Ordering::Release);
        count
    }

    /// Secondary CPU `cpu` finished its early init: release its thread.
    ///
    /// Fatal if `cpu` was not prepared, or if it already signaled.
    pub fn notify_early_init_done(&self, cpu: CpuId) {
        let count = self.prepared_count();
        kassert!(
            cpu > 0 && cpu <= count,
            "invalid secondary cpu num {}, SMP_MAX_CPUS {}, prepared {}",
            cpu,
            SMP_MAX_CPUS,
            count
        );

        let thread = {
            let mut slots = self.slots.lock_irqsave();
            let Some(slot) = slots[cpu].as_mut() else {
                assert_failed("slots[cpu].is_some()", Some(format_args!("cpu {} has no slot", cpu)));
            };
            kassert!(
                slot.state == CpuBootState::Created,
                "cpu {} signaled early init twice (state {:?})",
                slot.cpu_id,
                slot.state
            );
            slot.state = CpuBootState::EarlySignaled;
            slot.thread.take()
        };

        // Resume outside the lock: the thread takes it again first thing.
        match thread {
            Some(thread) => self.scheduler.resume(thread),
            None => assert_failed(
                "thread.is_some()",
                Some(format_args!("cpu {} bootstrap thread already resumed", cpu)),
            ),
        }
    }

    /// Where a physical secondary CPU lands once its arch state is live.
    /// Interrupts are masked on entry.
    pub fn secondary_cpu_entry(&self, cpu: CpuId) -> ! {
        kdebug_assert!(
            khal::cpu::current_id() == cpu,
            "cpu {} entered as cpu {}",
            khal::cpu::current_id(),
            cpu
        );

        self.scheduler.secondary_cpu_init_early(cpu);
        self.notify_early_init_done(cpu);

        klog::debug!("entering scheduler on cpu {}", cpu);
        self.scheduler.secondary_cpu_entry(cpu)
    }

    fn secondary_bootstrap(&self, cpu: CpuId) -> i32 {
        {
            let mut slots = self.slots.lock_irqsave();
            let Some(slot) = slots[cpu].as_mut() else {
                assert_failed("slots[cpu].is_some()", Some(format_args!("cpu {} has no slot", cpu)));
            };
            kassert!(
                slot.state == CpuBootState::EarlySignaled,
                "cpu {} bootstrap thread started in state {:?}",
                cpu,
                slot.state
            );
            slot.state = CpuBootState::Running;
        }

        // Levels below THREADING were handled by the arch bring-up code.
        self.registry
            .run(InitFlags::SECONDARY_CPUS, InitLevel::THREADING, InitLevel::LAST);
        0
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared.load(Ordering::Acquire)
    }

    /// Number of secondary CPUs staged by `prepare`, 0 before it.
    pub fn prepared_count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    pub fn state(&self, cpu: CpuId) -> Option<CpuBootState> {
        let slots = self.slots.lock_irqsave();
        slots.get(cpu)?.as_ref().map(|slot| slot.state)
    }

    pub fn thread_id(&self, cpu: CpuId) -> Option<ThreadId> {
        let slots = self.slots.lock_irqsave();
        slots.get(cpu)?.as_ref().map(|slot| slot.thread_id)
    }
}
