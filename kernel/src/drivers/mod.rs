// =============================================================================
// Ferrite OS — Kernel Drivers
// =============================================================================
//
// IMPORTANT DESIGN NOTE:
//   Only timekeeping hardware is driven from kernel space — the scheduler
//   tick must run before any other subsystem exists, so its timer cannot
//   live anywhere else.
//
//   pit.rs — the i8254 programmable interval timer: periodic interrupts
//            for the scheduler tick and a monotonic clock for gettime
//
//   Every other device is a job for drivers outside this crate; they reach
//   the hardware through the same `bus` contracts this one uses.
// =============================================================================

pub mod pit;
