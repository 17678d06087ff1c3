//! Admission counters for one startup group.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Default)]
struct Counters {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    admitted: AtomicUsize,
    completed: AtomicUsize,
}

/// Cloneable view of a group's admissions.
#[derive(Debug, Clone, Default)]
pub struct AdmissionGauge {
    counters: Arc<Counters>,
}

impl AdmissionGauge {
    pub fn new() -> Self {
        Self::default()
    }

    /// An item entered its start chain.
    pub fn admit(&self) {
        let now = self.counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.admitted.fetch_add(1, Ordering::SeqCst);
        self.counters.peak.fetch_max(now, Ordering::SeqCst);
    }

    /// An item's start chain ended, ready or not.
    pub fn complete(&self) {
        self.counters.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.counters.completed.fetch_add(1, Ordering::SeqCst);
    }

    /// An item's start chain was abandoned before it ended.
    pub fn abandon(&self) {
        self.counters.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn in_flight(&self) -> usize {
        self.counters.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of items ever in flight at once.
    pub fn peak(&self) -> usize {
        self.counters.peak.load(Ordering::SeqCst)
    }

    pub fn admitted(&self) -> usize {
        self.counters.admitted.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> usize {
        self.counters.completed.load(Ordering::SeqCst)
    }
}
