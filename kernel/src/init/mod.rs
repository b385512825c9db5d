// =============================================================================
// Kestrel: Init Levels
// =============================================================================
//
// Code anywhere in the kernel can ask to be called at a point during boot
// by registering an InitHook: a level, a CPU scope and an action.
//
// LEVELS:
//   A level is a u32. The named checkpoints below are spaced 0x10000
//   apart so a subsystem can slot itself between two of them
//   (e.g. `InitLevel::HEAP.offset(0x10)` runs after the heap checkpoint's
//   own hooks but before anything at VM).
//
// SCOPES:
//   PRIMARY_CPU    hooks run once, on the boot CPU.
//   SECONDARY_CPUS hooks run on every secondary CPU as it comes up.
//
// RUNNING:
//   The boot path calls `run(flags, from, to)` over consecutive level
//   intervals. Hooks execute one at a time in non-decreasing level order,
//   so everything at a lower level has returned before anything at a
//   higher level starts. Hooks registered at the same level run in
//   registration order, but callers must not depend on that.
//
// =============================================================================

use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};

use bitflags::bitflags;

/// A point in the boot sequence. Lower runs first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct InitLevel(pub u32);

impl InitLevel {
    pub const EARLIEST: InitLevel = InitLevel(0x1);

    pub const ARCH_EARLY: InitLevel = InitLevel(0x10000);
    pub const PLATFORM_EARLY: InitLevel = InitLevel(0x20000);
    pub const ARCH_PREVM: InitLevel = InitLevel(0x30000);
    pub const PLATFORM_PREVM: InitLevel = InitLevel(0x40000);
    pub const VM_PREHEAP: InitLevel = InitLevel(0x50000);
    pub const HEAP: InitLevel = InitLevel(0x60000);
    pub const VM: InitLevel = InitLevel(0x70000);
    pub const TOPOLOGY: InitLevel = InitLevel(0x80000);
    pub const KERNEL: InitLevel = InitLevel(0x90000);
    pub const THREADING: InitLevel = InitLevel(0xa0000);
    pub const ARCH: InitLevel = InitLevel(0xb0000);
    pub const PLATFORM: InitLevel = InitLevel(0xc0000);
    pub const ARCH_LATE: InitLevel = InitLevel(0xd0000);
    pub const USER: InitLevel = InitLevel(0xe0000);

    pub const LAST: InitLevel = InitLevel(u32::MAX);

    /// Named checkpoints, ascending.
    pub const CHECKPOINTS: [(InitLevel, &'static str); 16] = [
        (InitLevel::EARLIEST, "EARLIEST"),
        (InitLevel::ARCH_EARLY, "ARCH_EARLY"),
        (InitLevel::PLATFORM_EARLY, "PLATFORM_EARLY"),
        (InitLevel::ARCH_PREVM, "ARCH_PREVM"),
        (InitLevel::PLATFORM_PREVM, "PLATFORM_PREVM"),
        (InitLevel::VM_PREHEAP, "VM_PREHEAP"),
        (InitLevel::HEAP, "HEAP"),
        (InitLevel::VM, "VM"),
        (InitLevel::TOPOLOGY, "TOPOLOGY"),
        (InitLevel::KERNEL, "KERNEL"),
        (InitLevel::THREADING, "THREADING"),
        (InitLevel::ARCH, "ARCH"),
        (InitLevel::PLATFORM, "PLATFORM"),
        (InitLevel::ARCH_LATE, "ARCH_LATE"),
        (InitLevel::USER, "USER"),
        (InitLevel::LAST, "LAST"),
    ];

    pub const fn raw(self) -> u32 {
        self.0
    }

    /// The level `delta` above this one, saturating at LAST.
    pub const fn offset(self, delta: u32) -> InitLevel {
        InitLevel(self.0.saturating_add(delta))
    }

    /// The level just below this one. Used to close an interval right
    /// before a checkpoint.
    pub const fn prev(self) -> InitLevel {
        InitLevel(self.0.saturating_sub(1))
    }

    /// The level just above this one.
    pub const fn next(self) -> InitLevel {
        InitLevel(self.0.saturating_add(1))
    }
}

impl fmt::Display for InitLevel {
    /// `HEAP`, `HEAP+0x10`, or the raw hex value for levels below EARLIEST.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let base = InitLevel::CHECKPOINTS
            .iter()
            .rev()
            .find(|(level, _)| level.0 <= self.0);
        match base {
            Some((level, name)) if level.0 == self.0 => f.write_str(name),
            Some((level, name)) => write!(f, "{}+{:#x}", name, self.0 - level.0),
            None => write!(f, "{:#x}", self.0),
        }
    }
}

bitflags! {
    /// Which CPUs a hook runs on.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct InitFlags: u32 {
        const PRIMARY_CPU    = 0x1;
        const SECONDARY_CPUS = 0x2;
        const ALL_CPUS       = Self::PRIMARY_CPU.bits() | Self::SECONDARY_CPUS.bits();
        const CPU_SUSPEND    = 0x4;
        const CPU_RESUME     = 0x8;
    }
}

/// Action run by a hook.
pub type InitAction = &'static (dyn Fn() + Sync);

/// One registered init callback.
#[derive(Clone, Copy)]
pub struct InitHook {
    pub level: InitLevel,
    pub flags: InitFlags,
    pub name: &'static str,
    pub action: InitAction,
}

impl InitHook {
    pub const fn new(
        name: &'static str,
        level: InitLevel,
        flags: InitFlags,
        action: InitAction,
    ) -> Self {
        Self { level, flags, name, action }
    }

    /// Whether this hook belongs to a run for `flags`.
    #[inline]
    pub fn matches(&self, flags: InitFlags) -> bool {
        self.flags.intersects(flags)
    }
}

impl fmt::Debug for InitHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InitHook")
            .field("name", &self.name)
            .field("level", &format_args!("{}", self.level))
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}

/// Declare an [`InitHook`] from a function.
///
/// ```ignore
/// fn heap_stats() { /* ... */ }
///
/// static HOOKS: [InitHook; 2] = [
///     init_hook!(heap_stats, InitLevel::HEAP.next()),
///     init_hook!(percpu_timer, InitLevel::THREADING, InitFlags::ALL_CPUS),
/// ];
/// ```
///
/// Without explicit flags the hook runs on the boot CPU only.
#[macro_export]
macro_rules! init_hook {
    ($func:ident, $level:expr, $flags:expr $(,)?) => {
        $crate::init::InitHook::new(stringify!($func), $level, $flags, &$func)
    };
    ($func:ident, $level:expr $(,)?) => {
        $crate::init::InitHook::new(
            stringify!($func),
            $level,
            $crate::init::InitFlags::PRIMARY_CPU,
            &$func,
        )
    };
}

/// The system's init hook table.
///
/// Filled during single-threaded setup, then frozen: the first `run`
/// closes it to registration.
pub struct InitRegistry {
    /// Sorted by level; stable within a level.
    hooks: Vec<InitHook>,
    started: AtomicBool,
}

impl InitRegistry {
    pub const fn new() -> Self {
        Self {
            hooks: Vec::new(),
            started: AtomicBool::new(false),
        }
    }

    /// Add a hook. Fatal once any `run` has begun, or for a level below
    /// EARLIEST.
    pub fn register(&mut self, hook: InitHook) {
        kassert!(
            hook.level >= InitLevel::EARLIEST,
            "init hook '{}' registered at level 0",
            hook.name
        );
        kassert!(
            !self.started.load(Ordering::Acquire),
            "init hook '{}' registered after init began",
            hook.name
        );

        // Insert after every hook at the same or lower level.
        let pos = self.hooks.partition_point(|h| h.level <= hook.level);
        self.hooks.insert(pos, hook);
    }

    pub fn extend(&mut self, hooks: &[InitHook]) {
        for hook in hooks {
            self.register(*hook);
        }
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Hooks in execution order.
    pub fn iter(&self) -> impl Iterator<Item = &InitHook> {
        self.hooks.iter()
    }

    /// Whether any `run` has begun.
    pub fn has_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Run every hook scoped to `flags` with a level in `[start, stop]`.
    ///
    /// Returns once the last of them has returned. An empty interval
    /// (`stop < start`) runs nothing and leaves registration open.
    /// `start` below EARLIEST is fatal.
    pub fn run(&self, flags: InitFlags, start: InitLevel, stop: InitLevel) {
        kassert!(start >= InitLevel::EARLIEST, "init run from level 0");
        if stop < start {
            return;
        }

        self.started.store(true, Ordering::Release);

        let first = self.hooks.partition_point(|h| h.level < start);
        for hook in self.hooks[first..].iter().take_while(|h| h.level <= stop) {
            if !hook.matches(flags) {
                continue;
            }
            klog::debug!(
                "INIT: cpu {}, calling hook {} at level {}, flags {:#x}",
                khal::cpu::current_id(),
                hook.name,
                hook.level,
                hook.flags.bits()
            );
            (hook.action)();
        }
    }

    /// Run every hook scoped to `flags`, EARLIEST through LAST.
    pub fn run_all(&self, flags: InitFlags) {
        self.run(flags, InitLevel::EARLIEST, InitLevel::LAST);
    }
}

impl Default for InitRegistry {
    fn default() -> Self {
        Self::new()
    }
}
