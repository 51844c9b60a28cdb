//! Gauge: a value that can go up and down.

use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use meterkit_core::{AtomicF64, MetricKind, Result};

use crate::collector::{Child, ChildBase, Collector};
use crate::serializer::MetricSerializer;

pub type Gauge = Collector<GaugeChild>;

pub struct GaugeChild {
    base: ChildBase,
    value: AtomicF64,
    identifier: String,
}

impl GaugeChild {
    pub fn inc(&self) {
        self.inc_by(1.0);
    }

    pub fn inc_by(&self, delta: f64) {
        self.value.add(delta);
        self.base.publish();
    }

    pub fn dec(&self) {
        self.inc_by(-1.0);
    }

    pub fn dec_by(&self, delta: f64) {
        self.inc_by(-delta);
    }

    pub fn set(&self, value: f64) {
        self.value.set(value);
        self.base.publish();
    }

    /// Raise to `target`; never lowers.
    pub fn inc_to(&self, target: f64) {
        self.value.increment_to(target);
        self.base.publish();
    }

    /// Lower to `target`; never raises.
    pub fn dec_to(&self, target: f64) {
        self.value.decrement_to(target);
        self.base.publish();
    }

    /// Set to the current Unix time in seconds.
    pub fn set_to_current_time_utc(&self) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        self.set(now);
    }

    /// Set to the seconds elapsed since `since`.
    pub fn set_to_elapsed(&self, since: Instant) {
        self.set(since.elapsed().as_secs_f64());
    }

    /// Increment now and decrement when the returned guard drops.
    pub fn track_in_progress(self: &Arc<Self>) -> InProgress {
        self.inc();
        InProgress {
            gauge: Arc::clone(self),
        }
    }

    pub fn value(&self) -> f64 {
        self.value.get()
    }
}

/// Guard returned by [`GaugeChild::track_in_progress`].
#[must_use = "the gauge is decremented when the guard is dropped"]
pub struct InProgress {
    gauge: Arc<GaugeChild>,
}

impl Drop for InProgress {
    fn drop(&mut self) {
        self.gauge.dec();
    }
}

impl Child for GaugeChild {
    type Config = ();

    const KIND: MetricKind = MetricKind::Gauge;

    fn new(base: ChildBase, _config: &()) -> Self {
        let identifier = base.identifier("");
        Self {
            base,
            value: AtomicF64::new(0.0),
            identifier,
        }
    }

    fn base(&self) -> &ChildBase {
        &self.base
    }

    fn collect_points(&self, out: &mut dyn MetricSerializer) -> Result<()> {
        out.write_metric_point(&self.identifier, self.value.get(), None)
    }
}
