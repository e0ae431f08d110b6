// =============================================================================
// Ferrite OS — Kernel Substrate
// =============================================================================
//
// This crate is the bottom of the kernel's abstraction stack: monotonic
// timekeeping backed by the i8254 programmable interval timer, and the
// mutual-exclusion primitives the rest of the kernel builds on.
//
// WHAT LIVES HERE:
//   arch::intr — the masking discipline: counted, scoped interrupt disable
//   thread     — thread identity and the interrupt execution level
//   time       — BinTime, binary fixed-point timestamps
//   timer      — the timer descriptor handed to the clock framework
//   bus        — device/resource/interrupt contracts (traits only)
//   sync       — sleep/spin mutexes, turnstile and lockdep contracts
//   drivers    — the i8254 PIT driver
//
// WHAT DOES NOT LIVE HERE:
//   The clock framework's timer-selection logic, the interrupt controller's
//   internals, the turnstile's queueing, the scheduler, and all boot glue.
//   Those are collaborators behind traits, injected at kernel init. This
//   crate only produces and consumes their contracts.
//
// HOSTED BUILDS:
//   On a bare-metal target (`target_os = "none"`) this crate is `no_std`
//   and drives real hardware. On the dev machine it builds against `std`
//   with emulated backends for interrupt masking and thread identity, so
//   the timekeeping and locking cores run under plain `cargo test`.
// =============================================================================

#![cfg_attr(target_os = "none", no_std)]
// Foundation APIs — some entry points are only called by the kernel proper,
// which lives in a separate crate.
#![allow(dead_code)]

// Heap-allocated types (Arc) for sharing driver state between the interrupt
// path and thread-context callers. The kernel proper provides the
// #[global_allocator]; hosted builds get it from std.
extern crate alloc;

/// Architecture-specific code (x86_64 HAL).
/// Contains: the interrupt-masking discipline.
pub mod arch;

/// Device, bus, resource and interrupt-controller contracts.
pub mod bus;

/// Kernel drivers. Only the timekeeping hardware lives in kernel space.
pub mod drivers;

/// Synchronization primitives.
/// Contains: sleep/spin mutex, interrupt-masked cell, turnstile and
/// lock-dependency collaborator contracts.
pub mod sync;

/// Thread identity and execution-level tracking.
pub mod thread;

/// Binary fixed-point timestamps.
pub mod time;

/// Timer descriptors and the clock-framework boundary.
pub mod timer;
