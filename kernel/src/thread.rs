// =============================================================================
// Ferrite OS — Thread Identity & Execution Level
// =============================================================================
//
// The locking core needs two facts about its caller:
//   1. WHO is running — a compact identity word for the owner field of a
//      mutex. The scheduler owns the real thread structures; this module
//      only exposes an opaque, non-zero, 8-aligned identity.
//   2. AT WHICH LEVEL — thread context or interrupt context. Sleep mutexes
//      are forbidden at interrupt level; the trap dispatcher brackets every
//      handler invocation with `InterruptEntry`.
//
// The identity's alignment matters: mutexes pack three flag bits into the
// low bits of the owner word, so every `ThreadId` must have its low three
// bits clear. Both backends hand out addresses of 8-aligned objects.
//
// BACKENDS:
//   - Bare metal: the scheduler installs a current-thread hook at init
//     (one-shot, via `spin::Once`). Until then a static bootstrap identity
//     stands in for thread0, so early-boot locking works.
//   - Hosted: each OS thread gets the address of its own thread-local slot.
// =============================================================================

use core::fmt;

/// Number of low bits a `ThreadId` leaves clear for mutex flag bits.
pub const THREAD_ID_ALIGN_BITS: u32 = 3;

/// Opaque identity of a kernel thread.
///
/// Non-zero (zero is the "no owner" sentinel in the mutex word) and
/// 8-aligned (the low three bits carry mutex flags).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadId(usize);

impl ThreadId {
    /// Wraps a raw identity word.
    ///
    /// Panics if the word is zero or has any of the flag bits set — such a
    /// value could never round-trip through a mutex owner word.
    pub fn from_word(word: usize) -> ThreadId {
        assert!(word != 0, "thread identity must be non-zero");
        assert!(
            word & ((1 << THREAD_ID_ALIGN_BITS) - 1) == 0,
            "thread identity must be 8-aligned"
        );
        ThreadId(word)
    }

    /// The raw identity word (low three bits clear).
    #[inline]
    pub fn as_word(self) -> usize {
        self.0
    }
}

impl fmt::Debug for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ThreadId({:#x})", self.0)
    }
}

#[cfg(target_os = "none")]
mod imp {
    use super::ThreadId;
    use core::sync::atomic::{AtomicU32, Ordering};
    use spin::Once;

    /// Installed by the scheduler once thread structures exist.
    static CURRENT_HOOK: Once<fn() -> ThreadId> = Once::new();

    /// Identity of the bootstrap "thread0" before the scheduler is up.
    /// Only the address is used; 8-alignment gives the clear low bits.
    static BOOT_THREAD: u64 = 0;

    /// Interrupt nesting depth on the boot core.
    static INTR_NEST: AtomicU32 = AtomicU32::new(0);

    pub fn set_current_hook(hook: fn() -> ThreadId) {
        CURRENT_HOOK.call_once(|| hook);
    }

    pub fn current() -> ThreadId {
        match CURRENT_HOOK.get() {
            Some(hook) => hook(),
            None => ThreadId(&BOOT_THREAD as *const u64 as usize),
        }
    }

    pub fn in_interrupt() -> bool {
        INTR_NEST.load(Ordering::Relaxed) > 0
    }

    pub fn interrupt_enter() {
        INTR_NEST.fetch_add(1, Ordering::Relaxed);
    }

    pub fn interrupt_leave() {
        let prev = INTR_NEST.fetch_sub(1, Ordering::Relaxed);
        assert!(prev > 0, "interrupt leave without matching enter");
    }
}

#[cfg(not(target_os = "none"))]
mod imp {
    use super::ThreadId;
    use std::cell::Cell;

    std::thread_local! {
        /// One slot per OS thread; its address is the thread's identity.
        static IDENT_SLOT: u64 = const { 0 };

        /// Emulated interrupt nesting depth for this "core".
        static INTR_NEST: Cell<u32> = const { Cell::new(0) };
    }

    pub fn set_current_hook(_hook: fn() -> ThreadId) {
        // Hosted identity comes from the thread-local slot; the scheduler
        // hook is a bare-metal concern.
    }

    pub fn current() -> ThreadId {
        IDENT_SLOT.with(|slot| ThreadId(slot as *const u64 as usize))
    }

    pub fn in_interrupt() -> bool {
        INTR_NEST.with(|n| n.get() > 0)
    }

    pub fn interrupt_enter() {
        INTR_NEST.with(|n| n.set(n.get() + 1));
    }

    pub fn interrupt_leave() {
        INTR_NEST.with(|n| {
            let depth = n.get();
            assert!(depth > 0, "interrupt leave without matching enter");
            n.set(depth - 1);
        });
    }
}

/// Lets the scheduler replace the bootstrap identity with real per-thread
/// identities. May be called at most once; later calls are ignored.
pub fn set_current_hook(hook: fn() -> ThreadId) {
    imp::set_current_hook(hook);
}

/// Identity of the currently running thread.
#[inline]
pub fn current() -> ThreadId {
    imp::current()
}

/// Whether the current core is executing at interrupt level.
#[inline]
pub fn in_interrupt() -> bool {
    imp::in_interrupt()
}

/// Marks the current core as executing at interrupt level while alive.
///
/// The trap dispatcher creates one of these around every handler
/// invocation; the scoped form keeps the level count balanced on every
/// exit path out of the handler.
pub struct InterruptEntry {
    _not_send: core::marker::PhantomData<*const ()>,
}

impl InterruptEntry {
    pub fn enter() -> Self {
        imp::interrupt_enter();
        InterruptEntry {
            _not_send: core::marker::PhantomData,
        }
    }
}

impl Drop for InterruptEntry {
    fn drop(&mut self) {
        imp::interrupt_leave();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_is_stable_and_aligned() {
        let a = current();
        let b = current();
        assert_eq!(a, b);
        assert_ne!(a.as_word(), 0);
        assert_eq!(a.as_word() & 0b111, 0);
    }

    #[test]
    fn identities_differ_across_threads() {
        let here = current();
        let there = std::thread::spawn(current).join().unwrap();
        assert_ne!(here, there);
    }

    #[test]
    fn interrupt_level_nests() {
        assert!(!in_interrupt());
        {
            let _outer = InterruptEntry::enter();
            assert!(in_interrupt());
            {
                let _inner = InterruptEntry::enter();
                assert!(in_interrupt());
            }
            assert!(in_interrupt());
        }
        assert!(!in_interrupt());
    }

    #[test]
    #[should_panic(expected = "must be 8-aligned")]
    fn misaligned_identity_is_rejected() {
        let _ = ThreadId::from_word(0x1001);
    }
}
