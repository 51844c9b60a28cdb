//! Fixed-bucket histogram.
//!
//! Each observation increments exactly one bucket (the first whose upper bound
//! is >= the value); cumulative `le` counts are computed at collection time by
//! a prefix sum. Bucket counts are plain atomic integers; the running sum is an
//! `AtomicF64`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use meterkit_core::{AtomicF64, Exemplar, MeterError, MetricKind, Result};

use super::{Observe, Timer};
use crate::collector::{format_bound, Child, ChildBase, Collector};
use crate::serializer::MetricSerializer;

pub type Histogram = Collector<HistogramChild>;

/// Default upper bounds, tuned for request latencies in seconds.
pub const DEFAULT_BUCKETS: [f64; 11] = [
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// `count` buckets starting at `start`, each `width` apart.
pub fn linear_buckets(start: f64, width: f64, count: usize) -> Result<Vec<f64>> {
    if count == 0 {
        return Err(MeterError::InvalidBuckets("count must be positive".into()));
    }
    if width <= 0.0 {
        return Err(MeterError::InvalidBuckets("width must be positive".into()));
    }
    Ok((0..count).map(|i| start + width * i as f64).collect())
}

/// `count` buckets starting at `start`, each `factor` times the previous.
pub fn exponential_buckets(start: f64, factor: f64, count: usize) -> Result<Vec<f64>> {
    if count == 0 {
        return Err(MeterError::InvalidBuckets("count must be positive".into()));
    }
    if start <= 0.0 {
        return Err(MeterError::InvalidBuckets("start must be positive".into()));
    }
    if factor <= 1.0 {
        return Err(MeterError::InvalidBuckets("factor must be greater than 1".into()));
    }
    let mut bounds = Vec::with_capacity(count);
    let mut next = start;
    for _ in 0..count {
        bounds.push(next);
        next *= factor;
    }
    Ok(bounds)
}

/// Validated bucket bounds, always ending at `+Inf`.
#[derive(Debug, Clone)]
pub struct HistogramLayout {
    bounds: Arc<[f64]>,
}

impl HistogramLayout {
    pub fn new(mut bounds: Vec<f64>) -> Result<Self> {
        if bounds.is_empty() {
            return Err(MeterError::InvalidBuckets("at least one bucket is required".into()));
        }
        if bounds.iter().any(|b| b.is_nan()) {
            return Err(MeterError::InvalidBuckets("bucket bounds must not be NaN".into()));
        }
        if let Some(w) = bounds.windows(2).find(|w| w[0] >= w[1]) {
            return Err(MeterError::InvalidBuckets(format!(
                "bounds must be strictly increasing ({} >= {})",
                w[0], w[1]
            )));
        }
        if bounds.last() != Some(&f64::INFINITY) {
            bounds.push(f64::INFINITY);
        }
        Ok(Self {
            bounds: bounds.into(),
        })
    }

    pub fn bounds(&self) -> &[f64] {
        &self.bounds
    }
}

impl Default for HistogramLayout {
    fn default() -> Self {
        let mut bounds = DEFAULT_BUCKETS.to_vec();
        bounds.push(f64::INFINITY);
        Self {
            bounds: bounds.into(),
        }
    }
}

pub struct HistogramChild {
    base: ChildBase,
    bounds: Arc<[f64]>,
    buckets: Box<[AtomicU64]>,
    exemplars: Box<[Mutex<Option<Exemplar>>]>,
    sum: AtomicF64,
    bucket_ids: Vec<String>,
    sum_id: String,
    count_id: String,
}

impl HistogramChild {
    pub fn observe(&self, value: f64) {
        self.observe_many(value, 1);
    }

    /// Record `value` as if observed `count` times.
    pub fn observe_many(&self, value: f64, count: u64) {
        let Some(bucket) = self.bucket_index(value) else {
            return;
        };
        self.buckets[bucket].fetch_add(count, Ordering::Relaxed);
        self.sum.add(value * count as f64);
        self.base.publish();
    }

    /// Record `value` and attach `exemplar` to its bucket.
    pub fn observe_with_exemplar(&self, value: f64, exemplar: &Exemplar) {
        let Some(bucket) = self.bucket_index(value) else {
            return;
        };
        self.buckets[bucket].fetch_add(1, Ordering::Relaxed);
        self.sum.add(value);
        *self.exemplars[bucket].lock() = Some(exemplar.observed(value));
        self.base.publish();
    }

    /// Observe elapsed seconds when the returned timer drops.
    pub fn start_timer(&self) -> Timer<'_, Self> {
        Timer::new(self)
    }

    pub fn count(&self) -> u64 {
        self.buckets.iter().map(|b| b.load(Ordering::Relaxed)).sum()
    }

    pub fn sum(&self) -> f64 {
        self.sum.get()
    }

    /// `(upper bound, cumulative count)` per bucket.
    pub fn cumulative_buckets(&self) -> Vec<(f64, u64)> {
        let mut running = 0u64;
        self.bounds
            .iter()
            .zip(self.buckets.iter())
            .map(|(&bound, count)| {
                running += count.load(Ordering::Relaxed);
                (bound, running)
            })
            .collect()
    }

    fn bucket_index(&self, value: f64) -> Option<usize> {
        if value.is_nan() {
            return None;
        }
        self.bounds.iter().position(|&bound| value <= bound)
    }
}

impl Observe for HistogramChild {
    fn observe(&self, value: f64) {
        HistogramChild::observe(self, value);
    }
}

impl Child for HistogramChild {
    type Config = HistogramLayout;

    const KIND: MetricKind = MetricKind::Histogram;

    fn new(base: ChildBase, layout: &HistogramLayout) -> Self {
        let bounds = Arc::clone(&layout.bounds);
        let bucket_ids = bounds
            .iter()
            .map(|&b| base.identifier_with("_bucket", "le", &format_bound(b)))
            .collect();
        let sum_id = base.identifier("_sum");
        let count_id = base.identifier("_count");
        Self {
            buckets: bounds.iter().map(|_| AtomicU64::new(0)).collect(),
            exemplars: bounds.iter().map(|_| Mutex::new(None)).collect(),
            sum: AtomicF64::new(0.0),
            bounds,
            base,
            bucket_ids,
            sum_id,
            count_id,
        }
    }

    fn base(&self) -> &ChildBase {
        &self.base
    }

    fn collect_points(&self, out: &mut dyn MetricSerializer) -> Result<()> {
        let mut running = 0u64;
        for (i, bucket) in self.buckets.iter().enumerate() {
            running += bucket.load(Ordering::Relaxed);
            let exemplar = self.exemplars[i].lock().clone();
            out.write_metric_point(&self.bucket_ids[i], running as f64, exemplar.as_ref())?;
        }
        out.write_metric_point(&self.sum_id, self.sum.get(), None)?;
        out.write_metric_point(&self.count_id, running as f64, None)
    }
}
