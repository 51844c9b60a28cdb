//! Auto-leasing view: callers that know nothing about leases still keep a
//! series alive just by writing to it. Reads never lease and never create.

use std::sync::Arc;

use meterkit_core::{Exemplar, LabelSet, Result};

use super::manager::LifetimeManager;
use crate::collector::{Child, Collector};
use crate::metrics::{CounterChild, GaugeChild, HistogramChild, SummaryChild};

pub struct AutoLeasing<C: Child> {
    manager: Arc<LifetimeManager<C>>,
}

impl<C: Child> Clone for AutoLeasing<C> {
    fn clone(&self) -> Self {
        Self {
            manager: Arc::clone(&self.manager),
        }
    }
}

impl<C: Child> AutoLeasing<C> {
    pub(crate) fn new(manager: Arc<LifetimeManager<C>>) -> Self {
        Self { manager }
    }

    pub fn collector(&self) -> &Arc<Collector<C>> {
        self.manager.collector()
    }

    pub fn with_labels(&self, values: &[&str]) -> Result<AutoLeased<C>> {
        let labels = self.manager.collector().label_set(values)?;
        Ok(AutoLeased {
            manager: Arc::clone(&self.manager),
            labels,
        })
    }

    pub fn unlabelled(&self) -> Result<AutoLeased<C>> {
        self.with_labels(&[])
    }
}

/// One label combination of an [`AutoLeasing`] metric.
pub struct AutoLeased<C: Child> {
    manager: Arc<LifetimeManager<C>>,
    labels: LabelSet,
}

impl<C: Child> AutoLeased<C> {
    pub fn labels(&self) -> &LabelSet {
        &self.labels
    }

    /// The live child, if one exists. No lease is taken.
    pub fn current(&self) -> Option<Arc<C>> {
        self.manager.collector().get_by_set(&self.labels)
    }

    fn touch<R>(&self, f: impl FnOnce(&C) -> R) -> R {
        let lease = self.manager.acquire(self.labels.clone());
        f(lease.child().as_ref())
    }
}

impl AutoLeased<CounterChild> {
    pub fn inc(&self) {
        self.touch(|c| c.inc());
    }

    pub fn inc_by(&self, delta: f64) -> Result<()> {
        self.touch(|c| c.inc_by(delta))
    }

    pub fn inc_with_exemplar(&self, delta: f64, exemplar: &Exemplar) -> Result<()> {
        self.touch(|c| c.inc_with_exemplar(delta, exemplar))
    }

    pub fn inc_to(&self, target: f64) {
        self.touch(|c| c.inc_to(target));
    }

    /// Current value, or 0 when the series does not exist.
    pub fn value(&self) -> f64 {
        self.current().map_or(0.0, |c| c.value())
    }
}

impl AutoLeased<GaugeChild> {
    pub fn inc(&self) {
        self.touch(|g| g.inc());
    }

    pub fn inc_by(&self, delta: f64) {
        self.touch(|g| g.inc_by(delta));
    }

    pub fn dec(&self) {
        self.touch(|g| g.dec());
    }

    pub fn dec_by(&self, delta: f64) {
        self.touch(|g| g.dec_by(delta));
    }

    pub fn set(&self, value: f64) {
        self.touch(|g| g.set(value));
    }

    pub fn inc_to(&self, target: f64) {
        self.touch(|g| g.inc_to(target));
    }

    pub fn dec_to(&self, target: f64) {
        self.touch(|g| g.dec_to(target));
    }

    pub fn set_to_current_time_utc(&self) {
        self.touch(|g| g.set_to_current_time_utc());
    }

    /// Current value, or 0 when the series does not exist.
    pub fn value(&self) -> f64 {
        self.current().map_or(0.0, |g| g.value())
    }
}

impl AutoLeased<HistogramChild> {
    pub fn observe(&self, value: f64) {
        self.touch(|h| h.observe(value));
    }

    pub fn observe_many(&self, value: f64, count: u64) {
        self.touch(|h| h.observe_many(value, count));
    }

    pub fn observe_with_exemplar(&self, value: f64, exemplar: &Exemplar) {
        self.touch(|h| h.observe_with_exemplar(value, exemplar));
    }

    pub fn count(&self) -> u64 {
        self.current().map_or(0, |h| h.count())
    }

    pub fn sum(&self) -> f64 {
        self.current().map_or(0.0, |h| h.sum())
    }
}

impl AutoLeased<SummaryChild> {
    pub fn observe(&self, value: f64) {
        self.touch(|s| s.observe(value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::CollectorSpec;
    use crate::lifetime::{ManagedMetric, ManualDelay};
    use crate::metrics::Gauge;
    use std::time::Duration;
    use tokio::runtime::Handle;

    #[tokio::test]
    async fn test_reads_take_no_lease_and_create_nothing() {
        let delay = Arc::new(ManualDelay::new());
        let gauge = Gauge::new(
            CollectorSpec {
                name: "inflight".into(),
                help: "In flight.".into(),
                label_names: vec!["route".into()],
                static_labels: LabelSet::empty(),
                suppress_initial_value: false,
            },
            (),
        );
        let managed = ManagedMetric::new(LifetimeManager::new(
            gauge,
            Duration::from_secs(5),
            delay.clone(),
            Handle::current(),
        ));
        let auto = managed.with_extend_lifetime_on_use();
        let route = auto.with_labels(&["/a"]).unwrap();

        assert_eq!(route.value(), 0.0);
        assert!(managed.collector().is_empty());
        assert_eq!(managed.tracked(), 0);

        route.set(3.0);
        assert_eq!(route.value(), 3.0);
        assert_eq!(managed.lease_count(&["/a"]).unwrap(), 0);
        assert_eq!(managed.tracked(), 1);

        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
        assert_eq!(delay.elapse_all(), 1);
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
        assert!(route.current().is_none());
        assert_eq!(route.value(), 0.0);
    }
}
