//! # Delivery Tracking
//!
//! Every `send` returns a [`DeliveryHandle`]. The network thread settles it
//! once per target connection: reliable envelopes settle when acknowledged,
//! unreliable ones when written to the transport. Any target that is lost
//! before settling marks the whole delivery failed.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use parking_lot::{Condvar, Mutex};

/// Outcome of a send.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryStatus {
    /// At least one target has not settled yet.
    Pending,
    /// Every target settled successfully.
    Delivered,
    /// At least one target was lost (disconnect, resend exhaustion, shutdown).
    Failed,
}

/// Shared completion state.
struct DeliverySignal {
    pending: AtomicUsize,
    failed: AtomicBool,
    condvar: Condvar,
    mutex: Mutex<()>,
}

impl DeliverySignal {
    fn status(&self) -> DeliveryStatus {
        if self.failed.load(Ordering::Acquire) {
            DeliveryStatus::Failed
        } else if self.pending.load(Ordering::Acquire) == 0 {
            DeliveryStatus::Delivered
        } else {
            DeliveryStatus::Pending
        }
    }

    fn notify(&self) {
        let _guard = self.mutex.lock();
        self.condvar.notify_all();
    }
}

/// Handle returned to the caller of `send`.
#[derive(Clone)]
pub struct DeliveryHandle {
    signal: Arc<DeliverySignal>,
}

impl DeliveryHandle {
    /// Creates a pending handle and the ticket the network thread settles.
    ///
    /// The ticket is [split](DeliveryTicket::split) once the targets are known.
    pub(crate) fn new() -> (Self, DeliveryTicket) {
        let signal = Arc::new(DeliverySignal {
            pending: AtomicUsize::new(1),
            failed: AtomicBool::new(false),
            condvar: Condvar::new(),
            mutex: Mutex::new(()),
        });
        let ticket = DeliveryTicket {
            signal: Some(Arc::clone(&signal)),
        };
        (Self { signal }, ticket)
    }

    /// Returns the current status.
    #[must_use]
    pub fn status(&self) -> DeliveryStatus {
        self.signal.status()
    }

    /// Returns true once every target settled successfully.
    #[must_use]
    pub fn is_delivered(&self) -> bool {
        self.status() == DeliveryStatus::Delivered
    }

    /// Waits until the delivery settles or `timeout` passes.
    pub fn wait_timeout(&self, timeout: Duration) -> DeliveryStatus {
        let deadline = Instant::now() + timeout;
        let mut guard = self.signal.mutex.lock();
        loop {
            let status = self.signal.status();
            if status != DeliveryStatus::Pending {
                return status;
            }
            if self.signal.condvar.wait_until(&mut guard, deadline).timed_out() {
                return self.signal.status();
            }
        }
    }
}

impl std::fmt::Debug for DeliveryHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryHandle")
            .field("status", &self.status())
            .finish()
    }
}

/// Network-side settlement token for one target.
///
/// Dropping an unsettled ticket counts as a failure, so envelopes abandoned on
/// shutdown or disconnect fail their handle without extra bookkeeping.
pub(crate) struct DeliveryTicket {
    signal: Option<Arc<DeliverySignal>>,
}

impl DeliveryTicket {
    /// Marks this target delivered.
    pub(crate) fn settle(mut self) {
        if let Some(signal) = self.signal.take() {
            signal.pending.fetch_sub(1, Ordering::AcqRel);
            signal.notify();
        }
    }

    /// Replaces this ticket with one ticket per target.
    ///
    /// Zero targets fails the delivery.
    pub(crate) fn split(mut self, targets: usize) -> Vec<DeliveryTicket> {
        let Some(signal) = self.signal.take() else {
            return Vec::new();
        };
        if targets == 0 {
            Self::fail_signal(&signal);
            return Vec::new();
        }
        signal.pending.fetch_add(targets - 1, Ordering::AcqRel);
        (0..targets)
            .map(|_| DeliveryTicket {
                signal: Some(Arc::clone(&signal)),
            })
            .collect()
    }

    fn fail_signal(signal: &DeliverySignal) {
        signal.failed.store(true, Ordering::Release);
        signal.notify();
    }
}

impl Drop for DeliveryTicket {
    fn drop(&mut self) {
        if let Some(signal) = self.signal.take() {
            Self::fail_signal(&signal);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_single_target_settles() {
        let (handle, ticket) = DeliveryHandle::new();
        assert_eq!(handle.status(), DeliveryStatus::Pending);
        ticket.settle();
        assert!(handle.is_delivered());
    }

    #[test]
    fn test_dropped_ticket_fails() {
        let (handle, ticket) = DeliveryHandle::new();
        drop(ticket);
        assert_eq!(handle.status(), DeliveryStatus::Failed);
    }

    #[test]
    fn test_split_across_targets() {
        let (handle, ticket) = DeliveryHandle::new();
        let split = ticket.split(3);
        assert_eq!(split.len(), 3);
        for ticket in split {
            assert_eq!(handle.status(), DeliveryStatus::Pending);
            ticket.settle();
        }
        assert!(handle.is_delivered());

        let (handle, ticket) = DeliveryHandle::new();
        assert!(ticket.split(0).is_empty());
        assert_eq!(handle.status(), DeliveryStatus::Failed);
    }

    #[test]
    fn test_failure_wins() {
        let (handle, ticket) = DeliveryHandle::new();
        let mut split = ticket.split(2);
        drop(split.pop());
        split.pop().unwrap().settle();
        assert_eq!(handle.status(), DeliveryStatus::Failed);
    }

    #[test]
    fn test_wait_wakes_on_settle() {
        let (handle, ticket) = DeliveryHandle::new();
        let settler = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            ticket.settle();
        });
        assert_eq!(handle.wait_timeout(Duration::from_secs(5)), DeliveryStatus::Delivered);
        settler.join().unwrap();
    }

    #[test]
    fn test_wait_times_out() {
        let (handle, _ticket) = DeliveryHandle::new();
        assert_eq!(
            handle.wait_timeout(Duration::from_millis(10)),
            DeliveryStatus::Pending
        );
    }
}
