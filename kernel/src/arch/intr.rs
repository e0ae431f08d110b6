// =============================================================================
// Ferrite OS — Interrupt Masking Discipline
// =============================================================================
//
// Counted, scoped control over interrupt delivery on the current core.
// This is the one primitive both halves of the substrate stand on: the PIT
// driver masks interrupts around every read-modify-write of its shared
// state, and spin mutexes mask interrupts for their whole critical section.
//
// HOW IT WORKS:
//   - `disable()` / `enable()` nest. The outermost `disable()` records
//     whether interrupts were enabled beforehand; the matching outermost
//     `enable()` restores exactly that state. Nested pairs are no-ops on
//     the hardware flag.
//   - `IntrGuard` / `with_disabled()` wrap the pair in a scope so the
//     restore cannot be skipped by an early `return` or `?`.
//
// IRQ SAFETY:
//   An interrupt handler runs with interrupts already masked. It may call
//   `disable()`/`enable()` freely — the nesting counter makes the pairs
//   balance without ever re-enabling delivery inside the handler.
//
// BACKENDS:
//   - Bare metal (x86_64): RFLAGS.IF via CLI/STI. The depth counter is a
//     single per-core static; the substrate currently runs the boot core
//     only, matching the rest of the kernel.
//   - Hosted: a per-thread emulated interrupt flag. Each test thread models
//     one core, so the discipline's semantics (nesting, restore, the
//     `disabled()` predicate) are exercised by ordinary `cargo test`.
// =============================================================================

use core::marker::PhantomData;

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
mod imp {
    use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use x86_64::instructions::interrupts;

    /// Nesting depth of `disable()` calls on the boot core.
    static DEPTH: AtomicU32 = AtomicU32::new(0);

    /// Whether RFLAGS.IF was set before the outermost `disable()`.
    static SAVED_IF: AtomicBool = AtomicBool::new(false);

    pub fn disable() {
        let was_enabled = interrupts::are_enabled();
        interrupts::disable();
        // The flag is already clear, so no interrupt can race the counter
        // update on this core.
        if DEPTH.fetch_add(1, Ordering::Relaxed) == 0 {
            SAVED_IF.store(was_enabled, Ordering::Relaxed);
        }
    }

    pub fn enable() {
        let prev = DEPTH.fetch_sub(1, Ordering::Relaxed);
        assert!(prev > 0, "interrupt enable without matching disable");
        if prev == 1 && SAVED_IF.load(Ordering::Relaxed) {
            interrupts::enable();
        }
    }

    pub fn disabled() -> bool {
        !interrupts::are_enabled()
    }
}

#[cfg(not(all(target_arch = "x86_64", target_os = "none")))]
mod imp {
    use std::cell::Cell;

    std::thread_local! {
        /// Emulated per-core masking depth. Depth zero means "interrupts
        /// enabled"; hosted threads start with delivery enabled, like a
        /// core entering thread context.
        static DEPTH: Cell<u32> = const { Cell::new(0) };
    }

    pub fn disable() {
        DEPTH.with(|d| d.set(d.get() + 1));
    }

    pub fn enable() {
        DEPTH.with(|d| {
            let depth = d.get();
            assert!(depth > 0, "interrupt enable without matching disable");
            d.set(depth - 1);
        });
    }

    pub fn disabled() -> bool {
        DEPTH.with(|d| d.get() > 0)
    }
}

/// Masks interrupt delivery on the current core.
///
/// Calls nest: delivery is re-enabled only when every `disable()` has been
/// matched by an [`enable()`]. Prefer [`with_disabled`] or [`IntrGuard`] —
/// the raw pair exists for the spin-mutex implementation, where the mask
/// must outlive the `lock()` call frame.
#[inline]
pub fn disable() {
    imp::disable();
}

/// Unmasks interrupt delivery once the nesting count drops to zero,
/// restoring the state captured by the outermost [`disable()`].
///
/// Panics if called without a matching `disable()` — an unbalanced pair is
/// a kernel bug, never a recoverable condition.
#[inline]
pub fn enable() {
    imp::enable();
}

/// Whether interrupt delivery is currently masked on this core.
///
/// Used by assertions (e.g. "sleep mutexes must not be taken with
/// interrupts disabled") and by code that must already be inside a masking
/// scope.
#[inline]
pub fn disabled() -> bool {
    imp::disabled()
}

/// A masking scope: interrupts are disabled while this guard lives.
///
/// The guard is `!Send` — a masking scope belongs to the core (and on
/// hosted builds, the thread) that opened it.
pub struct IntrGuard {
    _not_send: PhantomData<*const ()>,
}

impl IntrGuard {
    /// Opens a masking scope on the current core.
    pub fn enter() -> Self {
        disable();
        IntrGuard {
            _not_send: PhantomData,
        }
    }
}

impl Drop for IntrGuard {
    fn drop(&mut self) {
        enable();
    }
}

/// Runs `f` with interrupts masked on the current core, restoring the
/// previous state afterwards on every exit path.
#[inline]
pub fn with_disabled<R>(f: impl FnOnce() -> R) -> R {
    let _scope = IntrGuard::enter();
    f()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masking_nests_and_restores() {
        assert!(!disabled());
        with_disabled(|| {
            assert!(disabled());
            with_disabled(|| assert!(disabled()));
            // Inner scope closed; still masked by the outer one.
            assert!(disabled());
        });
        assert!(!disabled());
    }

    #[test]
    fn guard_restores_on_early_exit() {
        fn bail_early() -> u32 {
            let _scope = IntrGuard::enter();
            if disabled() {
                return 7;
            }
            0
        }
        assert_eq!(bail_early(), 7);
        assert!(!disabled());
    }

    #[test]
    fn raw_pair_balances() {
        disable();
        disable();
        assert!(disabled());
        enable();
        assert!(disabled());
        enable();
        assert!(!disabled());
    }

    #[test]
    #[should_panic(expected = "without matching disable")]
    fn unbalanced_enable_is_fatal() {
        enable();
    }
}
