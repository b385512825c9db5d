// =============================================================================
// Kestrel: Platform Collaborator
// =============================================================================
//
// Everything the boot path calls that is not part of this crate: arch
// setup, the board, the heap, the rest of the kernel. The orchestrator
// calls these at fixed points between init level intervals:
//
//   boot CPU, single threaded
//     call_constructors
//     [EARLIEST .. ARCH_EARLY)        arch_early_init
//     [ARCH_EARLY .. PLATFORM_EARLY)  platform_early_init
//     [PLATFORM_EARLY .. ARCH_PREVM)  target_early_init
//     arch_prevm_init     [ARCH_PREVM .. PLATFORM_PREVM)
//     platform_prevm_init [PLATFORM_PREVM .. VM_PREHEAP)
//     vm_init_preheap     [VM_PREHEAP .. HEAP)
//     heap_init           [HEAP .. VM)
//     vm_init             [VM .. TOPOLOGY)
//     topology_init       [TOPOLOGY .. KERNEL)
//     kernel_init         [KERNEL .. THREADING)
//
//   bootstrap2 thread, scheduler running
//     [THREADING .. ARCH)             arch_init
//     [ARCH .. PLATFORM)              platform_init
//     [PLATFORM .. ARCH_LATE)         target_init
//     [ARCH_LATE .. USER)             kernel_shell_init, apps_init
//     [USER .. LAST]
//
// None of these can fail in a way the boot path could handle. An
// implementation that hits an error panics.
//
// =============================================================================

/// Arch, platform and subsystem bring-up hooks called by the boot path.
pub trait Platform: Sync + 'static {
    /// Run static constructors before anything else touches global state.
    fn call_constructors(&self);

    /// Put the boot CPU into a known state.
    fn arch_early_init(&self);

    fn platform_early_init(&self);

    /// Board setup that must precede the banner (console, command line).
    fn target_early_init(&self);

    fn arch_prevm_init(&self) {}

    fn platform_prevm_init(&self) {}

    /// Basic virtual memory setup the heap depends on.
    fn vm_init_preheap(&self) {}

    /// Bring up the kernel heap. Allocation is legal from here on.
    fn heap_init(&self);

    fn vm_init(&self) {}

    /// Discover CPU topology.
    fn topology_init(&self) {}

    /// Everything else the kernel needs before threads can exist.
    fn kernel_init(&self);

    /// Arch setup that needs threads. Secondary CPUs are usually started
    /// from here.
    fn arch_init(&self);

    fn platform_init(&self);

    fn target_init(&self);

    /// Give a kernel shell a chance to run. Boot continues when it returns.
    fn kernel_shell_init(&self) {}

    /// Start built-in applications.
    fn apps_init(&self);

    /// How many CPUs besides the boot CPU should be brought up.
    fn secondary_cpu_count(&self) -> usize;
}
