// =============================================================================
// Kestrel: Kernel Utilities
// =============================================================================
//
//   panic.rs: the fatal path. `kassert!` / `kdebug_assert!` and, on bare
//             metal, the panic handler that prints and halts.
// =============================================================================

#[macro_use]
pub mod panic;
