//! Bounded ticket holders for concurrent read/write transactions, per §5.
//!
//! The teacher's ticket-style limiters (e.g. `common::sync`'s semaphores)
//! are `tokio::sync::Semaphore`-based; this engine assumes OS threads
//! rather than a cooperative scheduler (§5), so tickets block the calling
//! thread via a `parking_lot::Condvar` instead of yielding to an executor.

use parking_lot::{
    Condvar,
    Mutex,
};

pub struct TicketHolder {
    available: Mutex<usize>,
    condvar: Condvar,
}

impl TicketHolder {
    pub fn new(capacity: usize) -> Self {
        TicketHolder {
            available: Mutex::new(capacity),
            condvar: Condvar::new(),
        }
    }

    /// Blocks the calling thread until a ticket is available, then returns
    /// a guard that releases it on drop.
    pub fn acquire(&self) -> TicketGuard<'_> {
        let mut available = self.available.lock();
        while *available == 0 {
            self.condvar.wait(&mut available);
        }
        *available -= 1;
        TicketGuard { holder: self }
    }

    /// Non-blocking variant used by callers that hold a "strong" table lock
    /// and must bypass tickets to avoid deadlock (§5).
    pub fn try_acquire(&self) -> Option<TicketGuard<'_>> {
        let mut available = self.available.lock();
        if *available == 0 {
            return None;
        }
        *available -= 1;
        Some(TicketGuard { holder: self })
    }

    pub fn available(&self) -> usize {
        *self.available.lock()
    }
}

pub struct TicketGuard<'a> {
    holder: &'a TicketHolder,
}

impl Drop for TicketGuard<'_> {
    fn drop(&mut self) {
        let mut available = self.holder.available.lock();
        *available += 1;
        self.holder.condvar.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::Arc,
        thread,
        time::Duration,
    };

    use super::*;

    #[test]
    fn try_acquire_respects_capacity() {
        let holder = TicketHolder::new(1);
        let first = holder.try_acquire();
        assert!(first.is_some());
        assert!(holder.try_acquire().is_none());
        drop(first);
        assert!(holder.try_acquire().is_some());
    }

    #[test]
    fn acquire_blocks_until_a_ticket_is_released() {
        let holder = Arc::new(TicketHolder::new(1));
        let _held = holder.try_acquire().unwrap();

        let waiter_holder = Arc::clone(&holder);
        let waiter = thread::spawn(move || {
            let _guard = waiter_holder.acquire();
        });

        thread::sleep(Duration::from_millis(20));
        assert!(!waiter.is_finished());

        drop(_held);
        waiter.join().unwrap();
    }
}
