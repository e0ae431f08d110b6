// =============================================================================
// Ferrite OS — Lock-Dependency Validator Contract
// =============================================================================
//
// Optional debugging aid: every successful mutex lock and every unlock is
// reported, keyed by the mutex's lock class, to a validator that checks
// for inconsistent global lock orderings. The cycle-detection algorithm
// itself lives outside this crate; here we only define the contract and
// the per-mutex mapping.
//
// This whole module is compiled in only with the `lockdep` feature. The
// reporting calls in the mutex are cfg'd out with it, so production locking
// fast paths carry no validator code at all — the choice is made at build
// time, not with runtime branches.
//
// Reporting never changes a locking outcome: the validator observes and
// complains, it does not arbitrate.
// =============================================================================

use core::sync::atomic::{AtomicUsize, Ordering};
use spin::Once;

/// Identifier the validator assigns to a lock class. Non-zero; zero means
/// "not registered yet".
pub type ClassId = usize;

/// Per-mutex link to its lock class.
///
/// The class is resolved lazily on the first reported lock, so mutexes can
/// be constructed in `const` context before the validator exists.
pub struct LockClassMapping {
    /// Class name — by convention the mutex's name.
    pub name: &'static str,
    class: AtomicUsize,
}

impl LockClassMapping {
    pub const fn new(name: &'static str) -> LockClassMapping {
        LockClassMapping {
            name,
            class: AtomicUsize::new(0),
        }
    }

    /// The resolved class, if any lock was reported yet.
    pub fn class(&self) -> Option<ClassId> {
        match self.class.load(Ordering::Relaxed) {
            0 => None,
            id => Some(id),
        }
    }
}

/// The external lock-order validator.
pub trait LockValidator: Send + Sync {
    /// Maps a class name to a class id. Must be idempotent per name and
    /// must never return zero.
    fn register_class(&self, name: &'static str) -> ClassId;

    /// A thread successfully acquired a mutex of this class.
    fn on_lock(&self, mapping: &LockClassMapping);

    /// A thread released a mutex of this class.
    fn on_unlock(&self, mapping: &LockClassMapping);
}

static VALIDATOR: Once<&'static dyn LockValidator> = Once::new();

/// Installs the validator. One-shot; later calls are ignored. Locks taken
/// before installation are simply not reported.
pub fn install(validator: &'static dyn LockValidator) {
    VALIDATOR.call_once(|| validator);
}

pub(crate) fn report_lock(mapping: &LockClassMapping) {
    if let Some(validator) = VALIDATOR.get() {
        if mapping.class().is_none() {
            let id = validator.register_class(mapping.name);
            assert!(id != 0, "lock validator returned the reserved class id");
            mapping.class.store(id, Ordering::Relaxed);
        }
        validator.on_lock(mapping);
    }
}

pub(crate) fn report_unlock(mapping: &LockClassMapping) {
    if let Some(validator) = VALIDATOR.get() {
        validator.on_unlock(mapping);
    }
}

// =============================================================================
// Counting validator double
// =============================================================================
//
// One validator per test process (installation is one-shot), counting
// events per class name so concurrent tests don't see each other's locks.
// =============================================================================


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classes_resolve_lazily_and_idempotently() {
        let v = testing::install_for_tests();
        let mapping = LockClassMapping::new("lockdep_lazy_class");
        assert_eq!(mapping.class(), None);

        report_lock(&mapping);
        let first = mapping.class().expect("class must resolve on first lock");
        report_unlock(&mapping);
        report_lock(&mapping);
        assert_eq!(mapping.class(), Some(first));

        let counts = v.counts("lockdep_lazy_class");
        assert_eq!(counts.locks, 2);
        assert_eq!(counts.unlocks, 1);
    }
}
