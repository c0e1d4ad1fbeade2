//! # Exclusion Tickets
//!
//! A global scheduling gate over the store. A single counter issues
//! monotone ticket numbers; tickets wait in a non-decreasing queue.
//! Shared tickets take the *current* counter value without bumping it,
//! so any number of them coexist on one number and run together.
//! An exclusive ticket bumps the counter, takes the bumped value, and
//! bumps again, so its number belongs to it alone.
//!
//! A ticket is *running* when its number is at most the head's number.
//! Deleting a ticket that advances the head wakes the now-runnable
//! holders through their callbacks. `reissue` atomically re-queues a
//! ticket under a possibly different type: a shared reader upgrading
//! to an exclusive writer goes to the back of the line, never blocks
//! the queue in place.
//!
//! Writes take an exclusive ticket before the annotate phases; reads
//! take shared tickets; background checkpoints take exclusive ones.

use parking_lot::Mutex;
use std::sync::Arc;

/// Shared or exclusive access request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketKind {
    Shared,
    Exclusive,
}

/// Callback invoked when a waiting ticket becomes runnable.
pub type WakeCallback = Box<dyn FnMut() + Send>;

struct Entry {
    handle: u64,
    number: u64,
    kind: TicketKind,
    wake: Option<WakeCallback>,
}

#[derive(Default)]
struct Inner {
    counter: u64,
    next_handle: u64,
    /// Non-decreasing by number.
    queue: Vec<Entry>,
}

impl Inner {
    fn head_number(&self) -> Option<u64> {
        self.queue.first().map(|e| e.number)
    }

    fn enqueue(&mut self, kind: TicketKind, wake: Option<WakeCallback>) -> Ticket {
        let number = match kind {
            TicketKind::Shared => self.counter,
            TicketKind::Exclusive => {
                self.counter += 1;
                let taken = self.counter;
                self.counter += 1;
                taken
            }
        };
        let handle = self.next_handle;
        self.next_handle += 1;
        // The queue stays sorted because numbers are monotone; shared
        // cohorts of the same number sit adjacent.
        self.queue.push(Entry {
            handle,
            number,
            kind,
            wake,
        });
        Ticket { handle, number }
    }

    /// Wake every entry whose number equals the (new) head number.
    fn wake_runnable(&mut self) {
        let Some(head) = self.head_number() else {
            return;
        };
        for entry in &mut self.queue {
            if entry.number > head {
                break;
            }
            if let Some(wake) = &mut entry.wake {
                wake();
            }
        }
    }
}

/// Handle to a queued ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    handle: u64,
    number: u64,
}

impl Ticket {
    pub fn number(&self) -> u64 {
        self.number
    }
}

/// The global ticket printer.
#[derive(Clone, Default)]
pub struct TicketPrinter {
    inner: Arc<Mutex<Inner>>,
}

impl TicketPrinter {
    pub fn new() -> TicketPrinter {
        TicketPrinter::default()
    }

    /// Take a shared ticket on the current number.
    pub fn get_shared(&self, wake: Option<WakeCallback>) -> Ticket {
        self.inner.lock().enqueue(TicketKind::Shared, wake)
    }

    /// Take an exclusive ticket on a freshly bumped number.
    pub fn get_exclusive(&self, wake: Option<WakeCallback>) -> Ticket {
        self.inner.lock().enqueue(TicketKind::Exclusive, wake)
    }

    /// A ticket runs when its number is at most the head's.
    pub fn is_running(&self, ticket: Ticket) -> bool {
        let inner = self.inner.lock();
        match inner.head_number() {
            Some(head) => {
                inner.queue.iter().any(|e| e.handle == ticket.handle)
                    && ticket.number <= head
            }
            None => false,
        }
    }

    /// Remove a ticket; wake the cohort the head advanced onto.
    pub fn delete(&self, ticket: Ticket) {
        let mut inner = self.inner.lock();
        let before = inner.head_number();
        inner.queue.retain(|e| e.handle != ticket.handle);
        if inner.head_number() != before {
            inner.wake_runnable();
        }
    }

    /// Atomically re-queue under `kind`; returns the replacement
    /// ticket. The old number is released exactly as by `delete`.
    pub fn reissue(&self, ticket: Ticket, kind: TicketKind) -> Ticket {
        let mut inner = self.inner.lock();
        let before = inner.head_number();
        let wake = inner
            .queue
            .iter()
            .position(|e| e.handle == ticket.handle)
            .map(|at| inner.queue.remove(at))
            .and_then(|e| e.wake);
        let replacement = inner.enqueue(kind, wake);
        if inner.head_number() != before {
            inner.wake_runnable();
        }
        replacement
    }

    /// Number the next shared ticket would receive.
    pub fn current_number(&self) -> u64 {
        self.inner.lock().counter
    }

    pub fn queue_len(&self) -> usize {
        self.inner.lock().queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_shared_tickets_share_a_number() {
        let printer = TicketPrinter::new();
        let a = printer.get_shared(None);
        let b = printer.get_shared(None);
        assert_eq!(a.number(), b.number());
        assert!(printer.is_running(a));
        assert!(printer.is_running(b));
    }

    #[test]
    fn test_exclusive_owns_its_number() {
        let printer = TicketPrinter::new();
        let x = printer.get_exclusive(None);
        let s = printer.get_shared(None);
        assert_ne!(x.number(), s.number());
        assert!(printer.is_running(x));
        assert!(!printer.is_running(s));
    }

    #[test]
    fn test_shared_exclusive_shared_ordering() {
        let printer = TicketPrinter::new();
        let s1 = printer.get_shared(None);
        let x1 = printer.get_exclusive(None);
        let s2 = printer.get_shared(None);

        assert!(printer.is_running(s1));
        assert!(!printer.is_running(x1));
        assert!(!printer.is_running(s2));

        printer.delete(s1);
        assert!(printer.is_running(x1));
        assert!(!printer.is_running(s2));

        printer.delete(x1);
        assert!(printer.is_running(s2));
    }

    #[test]
    fn test_wakeups_fire_on_head_advance() {
        static WOKEN: AtomicU32 = AtomicU32::new(0);
        let printer = TicketPrinter::new();
        let s1 = printer.get_shared(None);
        let _x1 = printer.get_exclusive(Some(Box::new(|| {
            WOKEN.fetch_add(1, Ordering::SeqCst);
        })));
        assert_eq!(WOKEN.load(Ordering::SeqCst), 0);
        printer.delete(s1);
        assert_eq!(WOKEN.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_shared_cohort_wakes_together() {
        static WOKEN: AtomicU32 = AtomicU32::new(0);
        let printer = TicketPrinter::new();
        let x = printer.get_exclusive(None);
        let wake = || {
            Box::new(|| {
                WOKEN.fetch_add(1, Ordering::SeqCst);
            }) as WakeCallback
        };
        let _a = printer.get_shared(Some(wake()));
        let _b = printer.get_shared(Some(wake()));
        printer.delete(x);
        assert_eq!(WOKEN.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_reissue_requeues_behind() {
        let printer = TicketPrinter::new();
        let s1 = printer.get_shared(None);
        let x1 = printer.get_exclusive(None);
        // Upgrading s1 sends it behind x1 with a bumped number.
        let s1 = printer.reissue(s1, TicketKind::Exclusive);
        assert!(printer.is_running(x1));
        assert!(!printer.is_running(s1));
        assert!(s1.number() > x1.number());

        printer.delete(x1);
        assert!(printer.is_running(s1));
    }

    #[test]
    fn test_delete_unknown_is_harmless() {
        let printer = TicketPrinter::new();
        let s = printer.get_shared(None);
        printer.delete(s);
        printer.delete(s);
        assert_eq!(printer.queue_len(), 0);
        assert!(!printer.is_running(s));
    }
}
