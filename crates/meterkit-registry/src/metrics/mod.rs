//! Concrete metric kinds.

pub mod counter;
pub mod gauge;
pub mod histogram;
pub mod summary;

use std::time::Instant;

pub use counter::{Counter, CounterChild};
pub use gauge::{Gauge, GaugeChild, InProgress};
pub use histogram::{
    exponential_buckets, linear_buckets, Histogram, HistogramChild, HistogramLayout,
    DEFAULT_BUCKETS,
};
pub use summary::{Summary, SummaryChild};

/// Kinds that accept individual observations.
pub trait Observe {
    fn observe(&self, value: f64);
}

/// Observes the elapsed time in seconds when dropped or explicitly stopped.
#[must_use = "the duration is observed when the timer is dropped"]
pub struct Timer<'a, O: Observe> {
    target: &'a O,
    started: Instant,
    done: bool,
}

impl<'a, O: Observe> Timer<'a, O> {
    pub(crate) fn new(target: &'a O) -> Self {
        Self {
            target,
            started: Instant::now(),
            done: false,
        }
    }

    /// Observe now and return the recorded seconds.
    pub fn observe_duration(mut self) -> f64 {
        self.record()
    }

    fn record(&mut self) -> f64 {
        let secs = self.started.elapsed().as_secs_f64();
        if !self.done {
            self.done = true;
            self.target.observe(secs);
        }
        secs
    }
}

impl<O: Observe> Drop for Timer<'_, O> {
    fn drop(&mut self) {
        self.record();
    }
}
