//! Host stand-ins for the collaborators the kernel core talks to.
//!
//! Every emulated thread is a std thread; every emulated CPU is whatever
//! `khal::cpu::set_current_id` says for the calling std thread.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Instant;

use kestrel::{
    CpuId, InitFlags, InitHook, InitLevel, Platform, Priority, Scheduler, ThreadEntry, ThreadId,
    Timeout, WaitQueue, WaitResult,
};

pub fn leak<T>(value: T) -> &'static T {
    Box::leak(Box::new(value))
}

// ── Shared event log ────────────────────────────────────────────

/// Ordered log of everything the collaborators and hooks saw.
#[derive(Clone, Default)]
pub struct Trace(Arc<Mutex<Vec<String>>>);

impl Trace {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    /// Index of the first event equal to `event`.
    pub fn position(&self, event: &str) -> usize {
        self.events()
            .iter()
            .position(|e| e == event)
            .unwrap_or_else(|| panic!("event {event:?} never happened: {:#?}", self.events()))
    }

    pub fn count(&self, event: &str) -> usize {
        self.events().iter().filter(|e| *e == event).count()
    }

    pub fn clear(&self) {
        self.0.lock().unwrap().clear();
    }
}

/// A hook that logs `hook:<name>@cpu<N>` when it runs.
pub fn traced_hook(trace: &Trace, name: &'static str, level: InitLevel, flags: InitFlags) -> InitHook {
    let trace = trace.clone();
    let action: &'static (dyn Fn() + Sync) = leak(move || {
        trace.push(format!("hook:{name}@cpu{}", khal::cpu::current_id()));
    });
    InitHook::new(name, level, flags, action)
}

// ── Scheduler ───────────────────────────────────────────────────

/// Payload `become_idle` unwinds with, so the boot thread can end.
#[derive(Debug)]
pub struct BecameIdle;

/// Payload `secondary_cpu_entry` unwinds with.
#[derive(Debug)]
pub struct EnteredScheduler(pub CpuId);

pub struct HostThread {
    id: ThreadId,
    name: &'static str,
    entry: ThreadEntry,
    pinned: Option<CpuId>,
    detached: bool,
}

/// Runs every resumed thread on its own std thread, on the CPU it was
/// pinned to.
///
/// A deferred scheduler parks resumed threads until [`start_pending`],
/// so a test can look at the world between `resume` and the thread's
/// first instruction.
///
/// [`start_pending`]: HostScheduler::start_pending
pub struct HostScheduler {
    trace: Trace,
    next_id: AtomicU64,
    deferred: AtomicBool,
    pending: Mutex<Vec<HostThread>>,
    running: Mutex<Vec<JoinHandle<()>>>,
}

impl HostScheduler {
    pub fn new(trace: Trace) -> Self {
        Self {
            trace,
            next_id: AtomicU64::new(100),
            deferred: AtomicBool::new(false),
            pending: Mutex::new(Vec::new()),
            running: Mutex::new(Vec::new()),
        }
    }

    pub fn deferred(trace: Trace) -> Self {
        let scheduler = Self::new(trace);
        scheduler.deferred.store(true, Ordering::SeqCst);
        scheduler
    }

    /// Names of resumed threads that have not started yet.
    pub fn pending(&self) -> Vec<&'static str> {
        self.pending.lock().unwrap().iter().map(|t| t.name).collect()
    }

    /// Start every parked thread.
    pub fn start_pending(&self) {
        let parked = std::mem::take(&mut *self.pending.lock().unwrap());
        for thread in parked {
            self.spawn(thread);
        }
    }

    fn spawn(&self, thread: HostThread) {
        let HostThread {
            name,
            entry,
            pinned,
            ..
        } = thread;
        let trace = self.trace.clone();
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                khal::cpu::set_current_id(pinned.unwrap_or(0));
                let code = entry();
                trace.push(format!("sched:exit:{name}:{code}"));
            })
            .unwrap();
        self.running.lock().unwrap().push(handle);
    }

    /// Wait for every resumed thread, including ones resumed while
    /// waiting. Re-raises the first thread panic.
    pub fn join_all(&self) {
        loop {
            let next = self.running.lock().unwrap().pop();
            let Some(handle) = next else { break };
            if let Err(payload) = handle.join() {
                std::panic::resume_unwind(payload);
            }
        }
    }
}

impl Scheduler for HostScheduler {
    type Thread = HostThread;

    fn create_thread(
        &self,
        name: &'static str,
        entry: ThreadEntry,
        _priority: Priority,
        _stack_size: usize,
    ) -> HostThread {
        let id = ThreadId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.trace.push(format!("sched:create:{name}"));
        HostThread {
            id,
            name,
            entry,
            pinned: None,
            detached: false,
        }
    }

    fn thread_id(&self, thread: &HostThread) -> ThreadId {
        thread.id
    }

    fn pin(&self, thread: &mut HostThread, cpu: CpuId) {
        self.trace.push(format!("sched:pin:{}:{cpu}", thread.name));
        thread.pinned = Some(cpu);
    }

    fn detach(&self, thread: &mut HostThread) {
        self.trace.push(format!("sched:detach:{}", thread.name));
        thread.detached = true;
    }

    fn resume(&self, thread: HostThread) {
        self.trace
            .push(format!("sched:resume:{}@cpu{}", thread.name, thread.pinned.unwrap_or(0)));
        assert!(thread.detached, "{} resumed without being detached", thread.name);

        if self.deferred.load(Ordering::SeqCst) {
            self.pending.lock().unwrap().push(thread);
        } else {
            self.spawn(thread);
        }
    }

    fn become_idle(&self) -> ! {
        self.trace
            .push(format!("sched:become_idle@cpu{}", khal::cpu::current_id()));
        std::panic::resume_unwind(Box::new(BecameIdle))
    }

    fn secondary_cpu_init_early(&self, cpu: CpuId) {
        self.trace.push(format!("sched:init_early@cpu{cpu}"));
    }

    fn secondary_cpu_entry(&self, cpu: CpuId) -> ! {
        self.trace.push(format!("sched:enter@cpu{cpu}"));
        std::panic::resume_unwind(Box::new(EnteredScheduler(cpu)))
    }
}

/// Run `f` on a fresh std thread acting as `cpu`, and return how it
/// ended.
pub fn on_cpu<F, R>(cpu: CpuId, f: F) -> std::thread::Result<R>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    std::thread::spawn(move || {
        khal::cpu::set_current_id(cpu);
        f()
    })
    .join()
}

// ── Platform ────────────────────────────────────────────────────

/// Logs `platform:<call>` for every collaborator call.
pub struct RecordingPlatform {
    trace: Trace,
    secondary_cpus: usize,
    ctor_log_level: Mutex<Option<klog::Level>>,
}

impl RecordingPlatform {
    pub fn new(trace: Trace, secondary_cpus: usize) -> Self {
        Self {
            trace,
            secondary_cpus,
            ctor_log_level: Mutex::new(None),
        }
    }

    /// The klog filter as the constructors saw it.
    pub fn log_level_at_constructors(&self) -> Option<klog::Level> {
        *self.ctor_log_level.lock().unwrap()
    }

    fn record(&self, call: &str) {
        self.trace.push(format!("platform:{call}"));
    }
}

impl Platform for RecordingPlatform {
    fn call_constructors(&self) {
        *self.ctor_log_level.lock().unwrap() = Some(klog::max_level());
        self.record("call_constructors");
    }
    fn arch_early_init(&self) {
        self.record("arch_early_init");
    }
    fn platform_early_init(&self) {
        self.record("platform_early_init");
    }
    fn target_early_init(&self) {
        self.record("target_early_init");
    }
    fn arch_prevm_init(&self) {
        self.record("arch_prevm_init");
    }
    fn platform_prevm_init(&self) {
        self.record("platform_prevm_init");
    }
    fn vm_init_preheap(&self) {
        self.record("vm_init_preheap");
    }
    fn heap_init(&self) {
        self.record("heap_init");
    }
    fn vm_init(&self) {
        self.record("vm_init");
    }
    fn topology_init(&self) {
        self.record("topology_init");
    }
    fn kernel_init(&self) {
        self.record("kernel_init");
    }
    fn arch_init(&self) {
        self.record("arch_init");
    }
    fn platform_init(&self) {
        self.record("platform_init");
    }
    fn target_init(&self) {
        self.record("target_init");
    }
    fn kernel_shell_init(&self) {
        self.record("kernel_shell_init");
    }
    fn apps_init(&self) {
        self.record("apps_init");
    }
    fn secondary_cpu_count(&self) -> usize {
        self.secondary_cpus
    }
}

// ── Wait queue ──────────────────────────────────────────────────

static NEXT_THREAD: AtomicU64 = AtomicU64::new(1);

std::thread_local! {
    static CURRENT: ThreadId = ThreadId(NEXT_THREAD.fetch_add(1, Ordering::Relaxed));
}

pub fn current_thread() -> ThreadId {
    CURRENT.with(|id| *id)
}

struct Waiter {
    id: ThreadId,
    /// Set by a waker while it holds the queue lock.
    result: Mutex<Option<WaitResult>>,
    cv: Condvar,
}

/// FIFO wait queue parking std threads on a condvar.
#[derive(Default)]
pub struct HostWaitQueue {
    waiters: Mutex<VecDeque<Arc<Waiter>>>,
    blocked_total: AtomicUsize,
}

impl HostWaitQueue {
    /// How many times any thread has blocked here.
    pub fn blocked_total(&self) -> usize {
        self.blocked_total.load(Ordering::SeqCst)
    }

    fn wake(&self, waiter: &Waiter) {
        *waiter.result.lock().unwrap() = Some(WaitResult::Woken);
        waiter.cv.notify_one();
    }
}

impl WaitQueue for HostWaitQueue {
    fn current_thread(&self) -> ThreadId {
        current_thread()
    }

    fn block<F: FnOnce()>(&self, timeout: Timeout, release: F) -> WaitResult {
        let me = Arc::new(Waiter {
            id: current_thread(),
            result: Mutex::new(None),
            cv: Condvar::new(),
        });
        self.waiters.lock().unwrap().push_back(me.clone());
        self.blocked_total.fetch_add(1, Ordering::SeqCst);
        release();

        let deadline = match timeout {
            Timeout::Infinite => None,
            Timeout::After(d) => Some(Instant::now() + d),
        };

        let mut result = me.result.lock().unwrap();
        loop {
            if let Some(r) = *result {
                return r;
            }
            match deadline {
                None => result = me.cv.wait(result).unwrap(),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    result = me.cv.wait_timeout(result, deadline - now).unwrap().0;
                }
            }
        }
        drop(result);

        // Timed out, unless a waker dequeued us in the meantime; wakers
        // set the result before releasing the queue lock.
        let mut queue = self.waiters.lock().unwrap();
        if let Some(pos) = queue.iter().position(|w| Arc::ptr_eq(w, &me)) {
            queue.remove(pos);
            return WaitResult::TimedOut;
        }
        drop(queue);
        me.result.lock().unwrap().unwrap_or(WaitResult::Woken)
    }

    fn wake_one(&self) -> Option<ThreadId> {
        let mut queue = self.waiters.lock().unwrap();
        let waiter = queue.pop_front()?;
        self.wake(&waiter);
        Some(waiter.id)
    }

    fn wake_all(&self) -> usize {
        let mut queue = self.waiters.lock().unwrap();
        let n = queue.len();
        for waiter in queue.drain(..) {
            self.wake(&waiter);
        }
        n
    }

    fn len(&self) -> usize {
        self.waiters.lock().unwrap().len()
    }
}

/// Spin until `cond` holds, failing the test after a few seconds.
pub fn wait_until(what: &str, cond: impl Fn() -> bool) {
    let start = Instant::now();
    while !cond() {
        assert!(
            start.elapsed().as_secs() < 5,
            "timed out waiting for {what}"
        );
        std::thread::sleep(std::time::Duration::from_millis(1));
    }
}
