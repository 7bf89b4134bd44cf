//! Ticket lock for the runtime's short critical sections
//!
//! Guards the circuit breaker's state transitions, the adaptive queue's
//! migration, token-bucket refills and the reclamation lists. Every one
//! of those sections is a handful of loads and stores, so waiters spin
//! briefly and then yield. Tickets hand the lock over in arrival order:
//! when several workers report breaker outcomes at once, none of them
//! can be starved into missing a transition.
//!
//! There is no guard type to hold across calls. Access goes through
//! [`TicketLock::with`], which bounds the critical section to a closure
//! and releases on unwind.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicU32, Ordering};

/// FIFO lock with closure-scoped critical sections
pub struct TicketLock<T> {
    /// Ticket handed to the next arrival
    next_ticket: AtomicU32,

    /// Ticket currently allowed in
    now_serving: AtomicU32,

    data: UnsafeCell<T>,
}

// Safety: TicketLock serialises all access to T
unsafe impl<T: Send> Send for TicketLock<T> {}
unsafe impl<T: Send> Sync for TicketLock<T> {}

/// Spins before a waiter starts yielding its timeslice
const SPINS_BEFORE_YIELD: u32 = 128;

impl<T> TicketLock<T> {
    /// Create a new lock containing the given value
    #[inline]
    pub const fn new(value: T) -> Self {
        TicketLock {
            next_ticket: AtomicU32::new(0),
            now_serving: AtomicU32::new(0),
            data: UnsafeCell::new(value),
        }
    }

    /// Run `f` with exclusive access, waiting behind earlier tickets
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let mut spins = 0u32;
        while self.now_serving.load(Ordering::Acquire) != ticket {
            spins = spins.wrapping_add(1);
            if spins < SPINS_BEFORE_YIELD {
                core::hint::spin_loop();
            } else {
                // A long wait means the holder was descheduled; stop
                // burning the core and let it finish.
                std::thread::yield_now();
            }
        }

        let _serve_next = ServeNext {
            now_serving: &self.now_serving,
            ticket,
        };
        // Safety: our ticket is being served; no other closure runs.
        f(unsafe { &mut *self.data.get() })
    }

    /// Run `f` only if the lock is free and nobody is queued
    ///
    /// Used where losing the race means the work is already being done
    /// (adaptive-queue migration): the loser skips instead of waiting.
    pub fn try_with<R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let serving = self.now_serving.load(Ordering::Acquire);
        if self
            .next_ticket
            .compare_exchange(
                serving,
                serving.wrapping_add(1),
                Ordering::Acquire,
                Ordering::Relaxed,
            )
            .is_err()
        {
            return None;
        }

        let _serve_next = ServeNext {
            now_serving: &self.now_serving,
            ticket: serving,
        };
        // Safety: the CAS took the ticket currently being served.
        Some(f(unsafe { &mut *self.data.get() }))
    }

    /// True while some closure holds the lock or waiters are queued
    #[inline]
    pub fn is_contended(&self) -> bool {
        self.next_ticket.load(Ordering::Relaxed) != self.now_serving.load(Ordering::Relaxed)
    }
}

impl<T: Default> Default for TicketLock<T> {
    fn default() -> Self {
        TicketLock::new(T::default())
    }
}

/// Hands the lock to the next ticket when the closure ends, panic or not
struct ServeNext<'a> {
    now_serving: &'a AtomicU32,
    ticket: u32,
}

impl Drop for ServeNext<'_> {
    #[inline]
    fn drop(&mut self) {
        self.now_serving
            .store(self.ticket.wrapping_add(1), Ordering::Release);
    }
}
