// =============================================================================
// Ferrite OS — Kernel Synchronization Primitives
// =============================================================================
//
// This module provides mutual exclusion for the kernel. In a kernel we
// can't use std::sync (there is no std on the metal). We need primitives
// that work bare-metal, under interrupts, with nothing but atomics:
//
//   mutex.rs     — the dual-mode mutex: sleep (parks on the turnstile) and
//                  spin (masks interrupts, never blocks)
//   intr_cell.rs — data shared with an interrupt handler, guarded by the
//                  masking discipline instead of a lock
//   turnstile.rs — contract of the external wait-queue that parks blocked
//                  threads (its queueing lives in the kernel proper)
//   lockdep.rs   — contract of the optional lock-order validator
//                  (compiled in with the `lockdep` feature)
//
// RULES OF USE:
//   - Spin mutexes may be taken at interrupt level; keep the critical
//     section short — interrupts stay masked until unlock.
//   - Sleep mutexes may ONLY be taken in thread context, never while
//     interrupts are masked, never while a spin mutex is held.
//   - Violations are kernel panics, not error returns.
// =============================================================================

pub mod intr_cell;
#[cfg(feature = "lockdep")]
pub mod lockdep;
pub mod mutex;
pub mod turnstile;

pub use intr_cell::IntrCell;
pub use mutex::{Mtx, MtxGuard, MtxKind};
