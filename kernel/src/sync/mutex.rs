// =============================================================================
// Ferrite OS — Dual-Mode Mutex
// =============================================================================
//
// The kernel's basic mutual-exclusion primitive. One atomic word encodes
// everything:
//
//   bit 0  SPIN       — operating mode, fixed at construction
//   bit 1  NODEBUG    — exempt from lock-order validation
//   bit 2  CONTESTED  — at least one thread parked on the turnstile
//   rest   owner      — `ThreadId` word of the holder, 0 when unlocked
//
// `ThreadId`s are 8-aligned, so the three flag bits and the owner identity
// pack into a single word and every state transition is one CAS.
//
// SLEEP MODE (the default):
//   Contenders park on the external turnstile until the holder releases.
//   Thread context only — parking at interrupt level, or with interrupts
//   masked (which includes holding any spin mutex), is a kernel panic.
//
// SPIN MODE:
//   `lock()` masks interrupts on the local core first, then spins on the
//   CAS. Safe at interrupt level; never touches the turnstile. Interrupts
//   stay masked until `unlock()`, so critical sections must be short.
//
// FATAL MISUSE (panics, never error returns):
//   recursive acquisition; unlock by a non-owner; sleep-mode rules above.
//
// HANDOFF:
//   `unlock()` swaps the word back to its base flags and, if CONTESTED was
//   set, wakes exactly one parked thread. A thread that was parked re-sets
//   CONTESTED when it finally claims the lock — it cannot know whether it
//   was the last waiter, so the next unlock conservatively wakes again.
//   A wake with nobody parked is harmless; a stranded waiter would not be.
// =============================================================================

#[cfg(feature = "lockdep")]
use super::lockdep::{self, LockClassMapping};
use super::turnstile;
use crate::arch::intr;
use crate::thread::{self, ThreadId};
use core::marker::PhantomData;
use core::sync::atomic::{AtomicUsize, Ordering};

const SPIN: usize = 1;
const NODEBUG: usize = 2;
const CONTESTED: usize = 4;
const FLAG_MASK: usize = 7;

/// Operating mode, chosen once at construction.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum MtxKind {
    /// Contenders are parked on the turnstile. Thread context only.
    Sleep,
    /// Contenders busy-wait with interrupts masked. Any context.
    Spin,
}

/// Basic kernel mutual-exclusion primitive. See the module header.
///
/// `const`-constructible so mutexes can live in statics:
///
/// ```ignore
/// static PROC_LOCK: Mtx = Mtx::named(MtxKind::Sleep, "proc_lock");
/// ```
pub struct Mtx {
    /// Owner identity plus flag bits; the only mutable state.
    owner: AtomicUsize,
    name: &'static str,
    #[cfg(feature = "lockdep")]
    lockmap: LockClassMapping,
}

impl Mtx {
    pub const fn new(kind: MtxKind) -> Mtx {
        Mtx::init(kind, "mtx", 0)
    }

    /// A mutex with a name for panic messages and lock-class mapping.
    pub const fn named(kind: MtxKind, name: &'static str) -> Mtx {
        Mtx::init(kind, name, 0)
    }

    /// A named mutex exempt from lock-order validation (for locks taken
    /// inside the validator's own reporting path).
    pub const fn nodebug(kind: MtxKind, name: &'static str) -> Mtx {
        Mtx::init(kind, name, NODEBUG)
    }

    const fn init(kind: MtxKind, name: &'static str, extra: usize) -> Mtx {
        let base = match kind {
            MtxKind::Sleep => 0,
            MtxKind::Spin => SPIN,
        };
        Mtx {
            owner: AtomicUsize::new(base | extra),
            name,
            #[cfg(feature = "lockdep")]
            lockmap: LockClassMapping::new(name),
        }
    }

    pub fn kind(&self) -> MtxKind {
        if self.is_spin() {
            MtxKind::Spin
        } else {
            MtxKind::Sleep
        }
    }

    fn is_spin(&self) -> bool {
        // SPIN and NODEBUG never change after construction.
        self.owner.load(Ordering::Relaxed) & SPIN != 0
    }

    /// Turnstile key: the mutex's address.
    fn key(&self) -> usize {
        self as *const Mtx as usize
    }

    /// The holder's identity, with the flag bits masked out.
    pub fn owner(&self) -> Option<ThreadId> {
        match self.owner.load(Ordering::Relaxed) & !FLAG_MASK {
            0 => None,
            word => Some(ThreadId::from_word(word)),
        }
    }

    /// Whether the calling thread holds this mutex. For assertions, not
    /// as a substitute for locking.
    pub fn owned(&self) -> bool {
        self.owner() == Some(thread::current())
    }

    /// Acquires the mutex, in the mode fixed at construction.
    ///
    /// Unconditional: there is no timeout and no cancellation; the call
    /// returns only once the mutex is owned by the caller.
    pub fn lock(&self) {
        let me = thread::current().as_word();

        if self.is_spin() {
            // Mask first so the critical section cannot be interrupted on
            // this core; stays masked until unlock().
            intr::disable();
        } else {
            assert!(
                !thread::in_interrupt(),
                "sleep mutex '{}' locked at interrupt level",
                self.name
            );
            // Also rules out "while holding any spin mutex" — spin locks
            // keep interrupts masked for their whole critical section.
            assert!(
                !intr::disabled(),
                "sleep mutex '{}' locked with interrupts masked",
                self.name
            );
        }

        assert!(
            self.owner.load(Ordering::Relaxed) & !FLAG_MASK != me,
            "mutex '{}' locked recursively",
            self.name
        );

        let spin = self.is_spin();
        // Set once this thread has parked: it must re-mark the mutex
        // contested on claim, because other threads may still be parked.
        let mut parked = false;

        loop {
            let cur = self.owner.load(Ordering::Relaxed);

            if cur & !FLAG_MASK == 0 {
                // Unlocked. Claim it, preserving the flag bits and
                // re-asserting CONTESTED if we ever parked.
                let contested = if parked { CONTESTED } else { 0 };
                let claimed = me | (cur & FLAG_MASK) | contested;
                if self
                    .owner
                    .compare_exchange_weak(cur, claimed, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
                {
                    break;
                }
                continue;
            }

            if spin {
                core::hint::spin_loop();
                continue;
            }

            // Sleep path: publish the contention, then park. The turnstile
            // re-checks the predicate under its own lock, so an unlock that
            // slips in between cannot strand us.
            if cur & CONTESTED == 0
                && self
                    .owner
                    .compare_exchange(cur, cur | CONTESTED, Ordering::Relaxed, Ordering::Relaxed)
                    .is_err()
            {
                continue;
            }
            turnstile::wait(self.key(), &|| {
                self.owner.load(Ordering::Relaxed) & !FLAG_MASK != 0
            });
            parked = true;
        }

        self.report_lock();
    }

    /// Releases the mutex.
    ///
    /// Fatal if the caller is not the recorded owner — that is always a
    /// programming error, never a transient condition.
    pub fn unlock(&self) {
        let cur = self.owner.load(Ordering::Relaxed);
        assert!(
            cur & !FLAG_MASK == thread::current().as_word(),
            "mutex '{}' unlocked by a non-owner",
            self.name
        );

        self.report_unlock();

        // Swap, not store: a contender may set CONTESTED between our load
        // above and the release, and that bit must not be lost.
        let prev = self.owner.swap(cur & (SPIN | NODEBUG), Ordering::Release);

        if prev & SPIN != 0 {
            // Drop the mask taken by the matching lock(); the counted
            // discipline restores the pre-lock interrupt state.
            intr::enable();
        } else if prev & CONTESTED != 0 {
            turnstile::wake_one(self.key());
        }
    }

    /// Locks for the duration of a scope: the returned guard unlocks on
    /// every normal exit path (fall-through, early `return`, `break`).
    ///
    /// No unlock happens if the scope is abandoned by thread termination
    /// rather than normal control flow.
    pub fn scoped_lock(&self) -> MtxGuard<'_> {
        self.lock();
        MtxGuard {
            mtx: self,
            _not_send: PhantomData,
        }
    }

    #[cfg(feature = "lockdep")]
    fn report_lock(&self) {
        if self.owner.load(Ordering::Relaxed) & NODEBUG == 0 {
            lockdep::report_lock(&self.lockmap);
        }
    }

    #[cfg(feature = "lockdep")]
    fn report_unlock(&self) {
        if self.owner.load(Ordering::Relaxed) & NODEBUG == 0 {
            lockdep::report_unlock(&self.lockmap);
        }
    }

    #[cfg(not(feature = "lockdep"))]
    #[inline(always)]
    fn report_lock(&self) {}

    #[cfg(not(feature = "lockdep"))]
    #[inline(always)]
    fn report_unlock(&self) {}
}

/// RAII scope for a held mutex; unlocks on drop.
///
/// `!Send`: ownership is recorded per thread, so the guard must be dropped
/// by the thread that locked.
pub struct MtxGuard<'a> {
    mtx: &'a Mtx,
    _not_send: PhantomData<*const ()>,
}

impl Drop for MtxGuard<'_> {
    fn drop(&mut self) {
        self.mtx.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::turnstile::hosted;
    use crate::thread::InterruptEntry;
    use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
    use std::sync::Arc;
    use std::thread as host_thread;
    use std::time::Duration;

    fn key_of(m: &Mtx) -> usize {
        m as *const Mtx as usize
    }

    #[test]
    fn owner_tracks_the_locking_thread() {
        let m = Arc::new(Mtx::named(MtxKind::Sleep, "owner_test"));
        m.lock();
        assert!(m.owned());
        assert_eq!(m.owner(), Some(thread::current()));

        // Ownership is per thread: another thread sees the mutex as held,
        // but not by itself.
        let m2 = m.clone();
        host_thread::spawn(move || {
            assert!(m2.owner().is_some());
            assert!(!m2.owned());
        })
        .join()
        .unwrap();

        m.unlock();
        assert_eq!(m.owner(), None);
        assert!(!m.owned());
    }

    #[test]
    fn unlock_by_non_owner_is_fatal() {
        let m = Arc::new(Mtx::named(MtxKind::Sleep, "stolen"));
        m.lock();
        let m2 = m.clone();
        let outcome = host_thread::spawn(move || m2.unlock()).join();
        assert!(outcome.is_err(), "non-owner unlock must panic");
        // Still ours.
        assert!(m.owned());
        m.unlock();
    }

    #[test]
    #[should_panic(expected = "locked recursively")]
    fn recursive_lock_is_fatal() {
        let m = Mtx::named(MtxKind::Sleep, "recursive");
        m.lock();
        m.lock();
    }

    #[test]
    #[should_panic(expected = "interrupt level")]
    fn sleep_lock_at_interrupt_level_is_fatal() {
        let m = Mtx::named(MtxKind::Sleep, "from_intr");
        let _level = InterruptEntry::enter();
        m.lock();
    }

    #[test]
    #[should_panic(expected = "interrupts masked")]
    fn sleep_lock_with_interrupts_masked_is_fatal() {
        let m = Mtx::named(MtxKind::Sleep, "masked");
        intr::with_disabled(|| m.lock());
    }

    #[test]
    fn spin_lock_masks_interrupts_and_skips_the_turnstile() {
        let ts = hosted::install_for_tests();
        let m = Mtx::named(MtxKind::Spin, "spin");

        assert!(!intr::disabled());
        m.lock();
        assert!(intr::disabled(), "interrupts must stay masked while held");
        assert!(m.owned());
        m.unlock();
        assert!(!intr::disabled(), "unlock must restore the interrupt state");
        assert_eq!(ts.parks(key_of(&m)), 0);
    }

    #[test]
    fn spin_lock_is_legal_at_interrupt_level() {
        let m = Mtx::named(MtxKind::Spin, "spin_intr");
        let _level = InterruptEntry::enter();
        m.lock();
        assert!(m.owned());
        m.unlock();
    }

    #[test]
    fn contender_parks_until_the_holder_unlocks() {
        let ts = hosted::install_for_tests();
        let m = Arc::new(Mtx::named(MtxKind::Sleep, "contended"));
        let acquired = Arc::new(AtomicBool::new(false));

        m.lock();

        let contender = {
            let m = m.clone();
            let acquired = acquired.clone();
            host_thread::spawn(move || {
                m.lock();
                acquired.store(true, AtomicOrdering::SeqCst);
                assert!(m.owned());
                m.unlock();
            })
        };

        // The contender must end up suspended on the turnstile, not
        // spinning past the lock.
        while ts.parks(key_of(&m)) == 0 {
            host_thread::yield_now();
        }
        host_thread::sleep(Duration::from_millis(20));
        assert!(
            !acquired.load(AtomicOrdering::SeqCst),
            "contender acquired a held mutex"
        );

        m.unlock();
        contender.join().unwrap();
        assert!(acquired.load(AtomicOrdering::SeqCst));
        assert_eq!(m.owner(), None);
    }

    #[test]
    fn every_parked_waiter_is_eventually_woken() {
        hosted::install_for_tests();
        let m = Arc::new(Mtx::named(MtxKind::Sleep, "handoff_chain"));
        m.lock();

        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let m = m.clone();
                host_thread::spawn(move || {
                    m.lock();
                    assert!(m.owned());
                    host_thread::sleep(Duration::from_millis(1));
                    m.unlock();
                })
            })
            .collect();

        // Give the waiters a chance to pile up, then release the chain.
        host_thread::sleep(Duration::from_millis(20));
        m.unlock();

        for waiter in waiters {
            waiter.join().unwrap();
        }
        assert_eq!(m.owner(), None);
    }

    #[test]
    fn scoped_lock_releases_on_every_exit_path() {
        let m = Mtx::named(MtxKind::Sleep, "scoped");

        {
            let _guard = m.scoped_lock();
            assert!(m.owned());
        }
        assert_eq!(m.owner(), None);

        fn early_return(m: &Mtx) -> u32 {
            let _guard = m.scoped_lock();
            if m.owned() {
                return 1;
            }
            0
        }
        assert_eq!(early_return(&m), 1);
        assert_eq!(m.owner(), None);
    }

    #[test]
    fn static_mutexes_are_constructible() {
        static M: Mtx = Mtx::named(MtxKind::Spin, "static_spin");
        M.lock();
        assert!(M.owned());
        M.unlock();
    }

    #[cfg(feature = "lockdep")]
    #[test]
    fn lock_events_reach_the_validator() {
        use crate::sync::lockdep::testing;

        let validator = testing::install_for_tests();

        let tracked = Mtx::named(MtxKind::Sleep, "mutex_lockdep_tracked");
        tracked.lock();
        tracked.unlock();
        let counts = validator.counts("mutex_lockdep_tracked");
        assert_eq!(counts.locks, 1);
        assert_eq!(counts.unlocks, 1);

        // NODEBUG mutexes stay silent.
        let silent = Mtx::nodebug(MtxKind::Sleep, "mutex_lockdep_silent");
        silent.lock();
        silent.unlock();
        let counts = validator.counts("mutex_lockdep_silent");
        assert_eq!(counts.locks, 0);
        assert_eq!(counts.unlocks, 0);
    }
}
