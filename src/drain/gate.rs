//! In-flight counter with an async join point
//!
//! The gate never blocks admission. The orchestrator reads [`ConcurrencyGate::count`]
//! after each launch and decides when to [`ConcurrencyGate::join`].

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

#[derive(Debug, Default)]
pub struct ConcurrencyGate {
    in_flight: AtomicUsize,
    admitted: AtomicUsize,
    released: AtomicUsize,
    peak: AtomicUsize,
    idle: Notify,
}

impl ConcurrencyGate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register one unit of work. The returned permit releases it when dropped.
    pub fn admit(self: &Arc<Self>) -> GatePermit {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.admitted.fetch_add(1, Ordering::SeqCst);
        self.peak.fetch_max(now, Ordering::SeqCst);
        GatePermit {
            gate: Arc::clone(self),
        }
    }

    fn release(&self) {
        let previous = self
            .in_flight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .unwrap_or_else(|_| panic!("ConcurrencyGate released more times than admitted"));
        self.released.fetch_add(1, Ordering::SeqCst);
        if previous == 1 {
            self.idle.notify_waiters();
        }
    }

    /// Number of admitted units not yet released
    pub fn count(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Wait until every admitted unit has been released.
    ///
    /// Returns immediately when nothing is in flight. A permit that is never
    /// dropped makes this wait forever.
    pub async fn join(&self) {
        loop {
            let idle = self.idle.notified();
            tokio::pin!(idle);
            // Register interest before reading the count so a release between
            // the check and the await is not missed.
            idle.as_mut().enable();
            if self.count() == 0 {
                return;
            }
            idle.await;
        }
    }

    /// Total admissions over the gate's lifetime
    pub fn admitted(&self) -> usize {
        self.admitted.load(Ordering::SeqCst)
    }

    /// Total releases over the gate's lifetime
    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Highest in-flight count observed at admission
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// One admitted unit of work. Dropping it releases the gate exactly once,
/// on every exit path of the task holding it, unwinding included.
#[must_use = "dropping the permit releases the gate immediately"]
#[derive(Debug)]
pub struct GatePermit {
    gate: Arc<ConcurrencyGate>,
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.gate.release();
    }
}
