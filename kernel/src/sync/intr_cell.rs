// =============================================================================
// Ferrite OS — Interrupt-Masked Cell
// =============================================================================
//
// State shared between one interrupt handler and thread-context callers on
// the same core cannot be protected by a mutex — the handler itself must
// be able to run while a thread is mid-update. The only workable exclusion
// is the masking discipline: every access happens with interrupts disabled,
// so the handler cannot preempt the thread and the thread cannot observe a
// half-finished handler update.
//
// `IntrCell<T>` packages that rule so it cannot be forgotten at a call
// site: the only way to reach the data is `with()`, which opens a masking
// scope for the duration of the closure.
//
// SINGLE-CORE INVARIANT:
//   Masking only stops the LOCAL core. An IntrCell must be touched by one
//   core only (for the PIT: the boot core that takes its interrupt and
//   services gettime). Cross-core sharing needs a spin mutex instead.
// =============================================================================

use crate::arch::intr;
use core::cell::{Cell, UnsafeCell};

/// Mutable state guarded by the masking discipline rather than a lock.
pub struct IntrCell<T> {
    inner: UnsafeCell<T>,
    /// Re-entrancy detector: `with()` inside `with()` on the same cell
    /// would hand out two `&mut T` and is always a bug.
    busy: Cell<bool>,
}

// SAFETY: all access goes through `with()`, which masks interrupts on the
// local core first. Under the single-core invariant above that serializes
// the interrupt handler against thread-context callers.
unsafe impl<T: Send> Sync for IntrCell<T> {}

impl<T> IntrCell<T> {
    pub const fn new(value: T) -> IntrCell<T> {
        IntrCell {
            inner: UnsafeCell::new(value),
            busy: Cell::new(false),
        }
    }

    /// Runs `f` on the protected data inside a masking scope.
    ///
    /// Panics on re-entry from the same cell — that would alias the
    /// exclusive borrow.
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        intr::with_disabled(|| {
            assert!(!self.busy.get(), "IntrCell accessed re-entrantly");
            self.busy.set(true);
            // SAFETY: interrupts are masked and the busy flag rules out
            // re-entry, so this is the only live reference.
            let result = f(unsafe { &mut *self.inner.get() });
            self.busy.set(false);
            result
        })
    }

    /// Direct access when the caller already has exclusive ownership
    /// (initialization, before the cell is shared).
    pub fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_masks_interrupts_and_mutates() {
        let cell = IntrCell::new(41u32);
        let seen = cell.with(|v| {
            assert!(intr::disabled());
            *v += 1;
            *v
        });
        assert_eq!(seen, 42);
        assert!(!intr::disabled());
    }

    #[test]
    #[should_panic(expected = "re-entrantly")]
    fn reentry_is_fatal() {
        let cell = IntrCell::new(0u32);
        cell.with(|_| {
            cell.with(|_| {});
        });
    }
}
