//! Summary: count, sum, and rolling-window quantiles.

use std::time::Instant;

use meterkit_core::quantile::{QuantileWindow, WindowLayout};
use meterkit_core::{MetricKind, Result};

use super::{Observe, Timer};
use crate::collector::{format_bound, Child, ChildBase, Collector};
use crate::serializer::MetricSerializer;

pub type Summary = Collector<SummaryChild>;

pub struct SummaryChild {
    base: ChildBase,
    window: QuantileWindow,
    quantile_ids: Vec<String>,
    sum_id: String,
    count_id: String,
}

impl SummaryChild {
    /// Record one value. NaN is ignored.
    pub fn observe(&self, value: f64) {
        if value.is_nan() {
            return;
        }
        if let Err(e) = self.window.observe(value, Instant::now()) {
            tracing::error!(metric = %self.base.name(), error = %e, "summary observe failed");
        }
        self.base.publish();
    }

    /// Observe elapsed seconds when the returned timer drops.
    pub fn start_timer(&self) -> Timer<'_, Self> {
        Timer::new(self)
    }

    /// Current count, sum and quantile estimates.
    pub fn snapshot(&self) -> Result<meterkit_core::quantile::WindowSnapshot> {
        self.window.snapshot(Instant::now())
    }
}

impl Observe for SummaryChild {
    fn observe(&self, value: f64) {
        SummaryChild::observe(self, value);
    }
}

impl Child for SummaryChild {
    type Config = WindowLayout;

    const KIND: MetricKind = MetricKind::Summary;

    fn new(base: ChildBase, layout: &WindowLayout) -> Self {
        let quantile_ids = layout
            .sorted_quantiles()
            .iter()
            .map(|&q| base.identifier_with("", "quantile", &format_bound(q)))
            .collect();
        let sum_id = base.identifier("_sum");
        let count_id = base.identifier("_count");
        Self {
            base,
            window: QuantileWindow::new(layout, Instant::now()),
            quantile_ids,
            sum_id,
            count_id,
        }
    }

    fn base(&self) -> &ChildBase {
        &self.base
    }

    fn collect_points(&self, out: &mut dyn MetricSerializer) -> Result<()> {
        let snapshot = self.window.snapshot(Instant::now())?;
        for (id, (_, estimate)) in self.quantile_ids.iter().zip(snapshot.quantiles.iter()) {
            out.write_metric_point(id, *estimate, None)?;
        }
        out.write_metric_point(&self.sum_id, snapshot.sum, None)?;
        out.write_metric_point(&self.count_id, snapshot.count as f64, None)
    }
}
