// =============================================================================
// Ferrite OS — Turnstile Contract
// =============================================================================
//
// When a sleep mutex is contended, the loser must be suspended — not spun —
// until the holder releases. The queueing machinery that does this (the
// turnstile) belongs to the scheduler half of the kernel; the locking core
// only needs two operations from it, captured by the `Turnstile` trait.
//
// PROTOCOL:
//   - `wait(key, still_blocked)` parks the calling thread on `key`. The
//     predicate is evaluated under the turnstile's internal lock before
//     the thread is queued; if it already returns false the call returns
//     without sleeping. Spurious returns are allowed — callers retry.
//   - `wake_one(key)` releases at most one thread parked on `key`.
//
// The predicate closes the classic lost-wakeup window: an unlocker that
// clears ownership between the waiter's failed acquire and its park is
// observed by the predicate, and the waiter never goes to sleep.
//
// The scheduler installs its implementation once at init. Parking before
// that is a boot-ordering bug and panics.
// =============================================================================

use spin::Once;

/// The external wait-queue collaborator of sleep mutexes.
pub trait Turnstile: Send + Sync {
    /// Parks the calling thread on `key` until a matching `wake_one`.
    ///
    /// `still_blocked` is checked under the turnstile's internal lock;
    /// when it returns false the thread is not queued. May return
    /// spuriously.
    fn wait(&self, key: usize, still_blocked: &dyn Fn() -> bool);

    /// Wakes at most one thread parked on `key`.
    fn wake_one(&self, key: usize);
}

static TURNSTILE: Once<&'static dyn Turnstile> = Once::new();

/// Installs the kernel's turnstile implementation. One-shot; later calls
/// are ignored.
pub fn install(ts: &'static dyn Turnstile) {
    TURNSTILE.call_once(|| ts);
}

fn installed() -> &'static dyn Turnstile {
    match TURNSTILE.get() {
        Some(ts) => *ts,
        None => panic!("sleep mutex contended before a turnstile was installed"),
    }
}

pub(crate) fn wait(key: usize, still_blocked: &dyn Fn() -> bool) {
    installed().wait(key, still_blocked);
}

pub(crate) fn wake_one(key: usize) {
    installed().wake_one(key);
}

// =============================================================================
// Hosted turnstile double
// =============================================================================
//
// A real-suspension implementation for the test build: threads block on a
// condvar and are released one permit per wake. It also counts parks per
// key so tests can assert "spin mutexes never touch the turnstile" and
// "the contender really slept".
// =============================================================================


#[cfg(test)]
mod tests {
    use super::hosted;
    use super::Turnstile;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn predicate_false_means_no_sleep() {
        let ts = hosted::install_for_tests();
        let key = 0xdead_0001;
        ts.wait(key, &|| false);
        assert_eq!(ts.parks(key), 0);
    }

    #[test]
    fn wake_one_releases_exactly_one_parked_thread() {
        let ts = hosted::install_for_tests();
        let key = 0xdead_0002;
        let blocked = Arc::new(AtomicBool::new(true));

        let workers: Vec<_> = (0..2)
            .map(|_| {
                let blocked = blocked.clone();
                std::thread::spawn(move || {
                    hosted::install_for_tests().wait(key, &|| blocked.load(Ordering::SeqCst));
                })
            })
            .collect();

        while ts.parks(key) < 2 {
            std::thread::yield_now();
        }

        blocked.store(false, Ordering::SeqCst);
        ts.wake_one(key);
        ts.wake_one(key);
        for worker in workers {
            worker.join().unwrap();
        }
    }
}
