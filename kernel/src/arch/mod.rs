// =============================================================================
// Ferrite OS — Architecture Abstraction
// =============================================================================
//
// The substrate needs exactly one thing from the CPU: the ability to mask
// and unmask interrupt delivery on the current core. Everything else
// (trap stubs, GDT/IDT, paging) belongs to the kernel proper, so this
// module is much smaller than a full HAL.
//
// To add a new architecture:
//   1. Implement the `imp` backend in `intr.rs` for the new target
//   2. Everything else just works — callers only see `arch::intr::*`
// =============================================================================

pub mod intr;
