//! Monotonic counter.

use parking_lot::Mutex;

use meterkit_core::{AtomicF64, Exemplar, MeterError, MetricKind, Result};

use crate::collector::{Child, ChildBase, Collector};
use crate::serializer::MetricSerializer;

pub type Counter = Collector<CounterChild>;

pub struct CounterChild {
    base: ChildBase,
    value: AtomicF64,
    exemplar: Mutex<Option<Exemplar>>,
    identifier: String,
}

impl CounterChild {
    pub fn inc(&self) {
        self.value.add(1.0);
        self.base.publish();
    }

    /// Add a non-negative amount.
    pub fn inc_by(&self, delta: f64) -> Result<()> {
        if delta < 0.0 {
            return Err(MeterError::NegativeIncrement(delta));
        }
        self.value.add(delta);
        self.base.publish();
        Ok(())
    }

    /// Add `delta` and remember `exemplar` as the latest sample context.
    pub fn inc_with_exemplar(&self, delta: f64, exemplar: &Exemplar) -> Result<()> {
        self.inc_by(delta)?;
        *self.exemplar.lock() = Some(exemplar.observed(delta));
        Ok(())
    }

    /// Raise the value to `target`; never lowers it.
    pub fn inc_to(&self, target: f64) {
        self.value.increment_to(target);
        self.base.publish();
    }

    pub fn value(&self) -> f64 {
        self.value.get()
    }
}

impl Child for CounterChild {
    type Config = ();

    const KIND: MetricKind = MetricKind::Counter;

    fn new(base: ChildBase, _config: &()) -> Self {
        let identifier = base.identifier("");
        Self {
            base,
            value: AtomicF64::new(0.0),
            exemplar: Mutex::new(None),
            identifier,
        }
    }

    fn base(&self) -> &ChildBase {
        &self.base
    }

    fn collect_points(&self, out: &mut dyn MetricSerializer) -> Result<()> {
        let exemplar = self.exemplar.lock().clone();
        out.write_metric_point(&self.identifier, self.value.get(), exemplar.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::CollectorSpec;
    use crate::serializer::SnapshotSerializer;
    use meterkit_core::LabelSet;
    use std::sync::Arc;
    use std::thread;

    fn counter() -> Arc<Counter> {
        Counter::new(
            CollectorSpec {
                name: "jobs_total".into(),
                help: "Jobs.".into(),
                label_names: vec![],
                static_labels: LabelSet::empty(),
                suppress_initial_value: false,
            },
            (),
        )
    }

    #[test]
    fn test_negative_increment_rejected() {
        let c = counter().unlabelled().unwrap();
        assert!(matches!(c.inc_by(-1.0), Err(MeterError::NegativeIncrement(_))));
        assert_eq!(c.value(), 0.0);
    }

    #[test]
    fn test_inc_to_is_upward_only() {
        let c = counter().unlabelled().unwrap();
        c.inc_to(10.0);
        c.inc_to(4.0);
        assert_eq!(c.value(), 10.0);
    }

    #[test]
    fn test_concurrent_increments_sum_exactly() {
        let c = counter().unlabelled().unwrap();
        thread::scope(|s| {
            for t in 0..8 {
                let c = &c;
                s.spawn(move || {
                    for _ in 0..1_000 {
                        c.inc_by(t as f64 * 0.5).unwrap();
                    }
                });
            }
        });
        let expected: f64 = (0..8).map(|t| t as f64 * 0.5 * 1_000.0).sum();
        assert_eq!(c.value(), expected);
    }

    #[test]
    fn test_exemplar_exported_with_value() {
        let collector = counter();
        let c = collector.unlabelled().unwrap();
        let ex = Exemplar::new(&[("trace_id", "abc")]).unwrap();
        c.inc_with_exemplar(2.0, &ex).unwrap();

        let mut out = SnapshotSerializer::new();
        out.write_family_declaration("jobs_total", "Jobs.", MetricKind::Counter)
            .unwrap();
        c.collect_points(&mut out).unwrap();
        let point = out.point("jobs_total").unwrap();
        assert_eq!(point.value, 2.0);
        let exemplar = point.exemplar.as_ref().unwrap();
        assert_eq!(exemplar.labels().get("trace_id"), Some("abc"));
        assert_eq!(exemplar.value(), 2.0);
    }
}
