//! Rolling-window quantiles over a ring of streams.
//!
//! `max_age` is split into `age_buckets` slices. Every stream in the ring sees
//! every sample, but streams are reset one at a time as their slice ages out,
//! so the head stream always covers (roughly) the last `max_age`.
//!
//! Observations land in a hot buffer guarded by the buffer lock. A flush swaps
//! the hot buffer with the (empty) cold buffer and drains the cold buffer into
//! the streams under the state lock. Lock order is always buffer, then state.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::{Objective, QuantileStream};
use crate::error::{MeterError, Result};

pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(600);
pub const DEFAULT_AGE_BUCKETS: usize = 5;
pub const DEFAULT_BUFFER_CAPACITY: usize = 500;

#[derive(Debug, Clone)]
pub struct WindowConfig {
    pub objectives: Vec<Objective>,
    pub max_age: Duration,
    pub age_buckets: usize,
    pub buffer_capacity: usize,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            objectives: Vec::new(),
            max_age: DEFAULT_MAX_AGE,
            age_buckets: DEFAULT_AGE_BUCKETS,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
        }
    }
}

impl WindowConfig {
    pub fn validate(&self) -> Result<()> {
        for o in &self.objectives {
            o.validate()?;
        }
        if self.max_age.is_zero() {
            return Err(MeterError::InvalidObjective("max_age must be positive".into()));
        }
        if self.age_buckets == 0 || u32::try_from(self.age_buckets).is_err() {
            return Err(MeterError::InvalidObjective(format!(
                "age_buckets must be between 1 and {}",
                u32::MAX
            )));
        }
        if (self.max_age / self.age_buckets as u32).is_zero() {
            return Err(MeterError::InvalidObjective(format!(
                "max_age {:?} is too short for {} age buckets",
                self.max_age, self.age_buckets
            )));
        }
        if self.buffer_capacity == 0 {
            return Err(MeterError::InvalidObjective(
                "buffer_capacity must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Objective quantiles in ascending order.
    pub fn sorted_quantiles(&self) -> Vec<f64> {
        let mut qs: Vec<f64> = self.objectives.iter().map(|o| o.quantile).collect();
        qs.sort_by(f64::total_cmp);
        qs
    }
}

/// Point-in-time read of a window.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowSnapshot {
    pub count: u64,
    pub sum: f64,
    /// `(quantile, estimate)` in ascending quantile order; NaN when the window is empty.
    pub quantiles: Vec<(f64, f64)>,
}

struct HotBuffer {
    samples: Vec<f64>,
    expires: Instant,
}

struct StreamState {
    cold: Vec<f64>,
    streams: Vec<QuantileStream>,
    head: usize,
    head_expires: Instant,
    count: u64,
    sum: f64,
}

/// Validated, shareable window parameters. One layout serves every window of a
/// summary collector.
#[derive(Debug, Clone)]
pub struct WindowLayout {
    objectives: Arc<[Objective]>,
    sorted_quantiles: Arc<[f64]>,
    age_buckets: usize,
    bucket_duration: Duration,
    buffer_capacity: usize,
}

impl WindowLayout {
    pub fn new(config: &WindowConfig) -> Result<Self> {
        config.validate()?;
        let buckets = u32::try_from(config.age_buckets)
            .map_err(|_| MeterError::InvalidObjective("age_buckets out of range".into()))?;
        Ok(Self {
            objectives: config.objectives.clone().into(),
            sorted_quantiles: config.sorted_quantiles().into(),
            age_buckets: config.age_buckets,
            bucket_duration: config.max_age / buckets,
            buffer_capacity: config.buffer_capacity,
        })
    }

    /// Objective quantiles in ascending order.
    pub fn sorted_quantiles(&self) -> &[f64] {
        &self.sorted_quantiles
    }

    pub fn bucket_duration(&self) -> Duration {
        self.bucket_duration
    }
}

pub struct QuantileWindow {
    hot: Mutex<HotBuffer>,
    state: Mutex<StreamState>,
    sorted_quantiles: Arc<[f64]>,
    bucket_duration: Duration,
    buffer_capacity: usize,
}

impl QuantileWindow {
    pub fn new(layout: &WindowLayout, now: Instant) -> Self {
        let streams = (0..layout.age_buckets)
            .map(|_| QuantileStream::targeted(Arc::clone(&layout.objectives)))
            .collect();
        let expires = now + layout.bucket_duration;

        Self {
            hot: Mutex::new(HotBuffer {
                samples: Vec::with_capacity(layout.buffer_capacity),
                expires,
            }),
            state: Mutex::new(StreamState {
                cold: Vec::with_capacity(layout.buffer_capacity),
                streams,
                head: 0,
                head_expires: expires,
                count: 0,
                sum: 0.0,
            }),
            sorted_quantiles: Arc::clone(&layout.sorted_quantiles),
            bucket_duration: layout.bucket_duration,
            buffer_capacity: layout.buffer_capacity,
        }
    }

    /// Record one value at time `now`. NaN is ignored.
    pub fn observe(&self, value: f64, now: Instant) -> Result<()> {
        if value.is_nan() {
            return Ok(());
        }
        let mut hot = self.hot.lock();
        if now > hot.expires {
            self.flush(&mut hot, now)?;
        }
        hot.samples.push(value);
        if hot.samples.len() >= self.buffer_capacity {
            self.flush(&mut hot, now)?;
        }
        Ok(())
    }

    /// Flush pending samples and read count, sum and quantiles.
    pub fn snapshot(&self, now: Instant) -> Result<WindowSnapshot> {
        let mut hot = self.hot.lock();
        let mut state = self.state.lock();
        // Swap even when the hot buffer is empty so its expiry catches up with `now`.
        self.swap(&mut hot, &mut state, now)?;
        self.drain_cold(&mut state, hot.expires);

        let head = state.head;
        let stream = &mut state.streams[head];
        let empty = stream.count() == 0;
        let quantiles = self
            .sorted_quantiles
            .iter()
            .map(|&q| (q, if empty { f64::NAN } else { stream.query(q) }))
            .collect();

        Ok(WindowSnapshot {
            count: state.count,
            sum: state.sum,
            quantiles,
        })
    }

    fn flush(&self, hot: &mut HotBuffer, now: Instant) -> Result<()> {
        let mut state = self.state.lock();
        self.swap(hot, &mut state, now)?;
        self.drain_cold(&mut state, hot.expires);
        Ok(())
    }

    fn swap(&self, hot: &mut HotBuffer, state: &mut StreamState, now: Instant) -> Result<()> {
        if !state.cold.is_empty() {
            return Err(MeterError::Internal(
                "quantile window cold buffer not empty at swap".into(),
            ));
        }
        std::mem::swap(&mut hot.samples, &mut state.cold);
        while now > hot.expires {
            hot.expires += self.bucket_duration;
        }
        Ok(())
    }

    fn drain_cold(&self, state: &mut StreamState, hot_expires: Instant) {
        let cold = std::mem::take(&mut state.cold);
        for &value in &cold {
            for stream in state.streams.iter_mut() {
                stream.insert(value);
            }
            state.count += 1;
            state.sum += value;
        }
        state.cold = cold;
        state.cold.clear();

        let ring = state.streams.len();
        while state.head_expires != hot_expires {
            let head = state.head;
            state.streams[head].reset();
            state.head = (head + 1) % ring;
            state.head_expires += self.bucket_duration;
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn median_window(now: Instant) -> QuantileWindow {
        let config = WindowConfig {
            objectives: vec![Objective::new(0.5, 0.05).unwrap()],
            max_age: Duration::from_secs(10),
            age_buckets: 5,
            buffer_capacity: 16,
        };
        QuantileWindow::new(&WindowLayout::new(&config).unwrap(), now)
    }

    #[test]
    fn test_rejects_bad_config() {
        let zero_buckets = WindowConfig {
            age_buckets: 0,
            ..WindowConfig::default()
        };
        assert!(WindowLayout::new(&zero_buckets).is_err());

        let bad_quantile = WindowConfig {
            objectives: vec![Objective {
                quantile: 1.5,
                epsilon: 0.01,
            }],
            ..WindowConfig::default()
        };
        assert!(WindowLayout::new(&bad_quantile).is_err());
    }

    #[test]
    fn test_rejects_zero_length_age_bucket() {
        let config = WindowConfig {
            max_age: Duration::from_nanos(3),
            age_buckets: 5,
            ..WindowConfig::default()
        };
        let err = WindowLayout::new(&config).unwrap_err();
        assert!(matches!(err, MeterError::InvalidObjective(_)));

        let config = WindowConfig {
            max_age: Duration::from_nanos(5),
            age_buckets: 5,
            ..WindowConfig::default()
        };
        let layout = WindowLayout::new(&config).unwrap();
        assert_eq!(layout.bucket_duration(), Duration::from_nanos(1));
    }

    #[test]
    fn test_snapshot_without_objectives() {
        let now = Instant::now();
        let w = QuantileWindow::new(&WindowLayout::new(&WindowConfig::default()).unwrap(), now);
        w.observe(1.0, now).unwrap();
        w.observe(2.0, now).unwrap();
        let snap = w.snapshot(now).unwrap();
        assert_eq!(snap.count, 2);
        assert_eq!(snap.sum, 3.0);
        assert!(snap.quantiles.is_empty());
    }

    #[test]
    fn test_nan_ignored() {
        let now = Instant::now();
        let w = median_window(now);
        w.observe(f64::NAN, now).unwrap();
        let snap = w.snapshot(now).unwrap();
        assert_eq!(snap.count, 0);
        assert!(snap.quantiles[0].1.is_nan());
    }

    #[test]
    fn test_median_over_buffer_flushes() {
        let now = Instant::now();
        let w = median_window(now);
        for v in 1..=101 {
            w.observe(v as f64, now).unwrap();
        }
        let snap = w.snapshot(now).unwrap();
        assert_eq!(snap.count, 101);
        assert_eq!(snap.sum, (1..=101).sum::<i32>() as f64);
        assert_eq!(snap.quantiles[0].0, 0.5);
        assert_eq!(snap.quantiles[0].1, 51.0);
    }

    #[test]
    fn test_samples_age_out_after_max_age() {
        let start = Instant::now();
        let w = median_window(start);
        for v in 1..=9 {
            w.observe(v as f64, start).unwrap();
        }

        // Still inside the window: the head has rotated but kept the samples.
        let snap = w.snapshot(start + Duration::from_secs(9)).unwrap();
        assert_eq!(snap.quantiles[0].1, 5.0);

        // Past max_age every stream has been reset.
        let snap = w.snapshot(start + Duration::from_secs(11)).unwrap();
        assert!(snap.quantiles[0].1.is_nan());
        assert_eq!(snap.count, 9);
        assert_eq!(snap.sum, 45.0);
    }

    #[test]
    fn test_fresh_samples_after_rotation() {
        let start = Instant::now();
        let w = median_window(start);
        w.observe(1000.0, start).unwrap();

        let later = start + Duration::from_secs(30);
        for v in [1.0, 2.0, 3.0] {
            w.observe(v, later).unwrap();
        }
        let snap = w.snapshot(later).unwrap();
        assert_eq!(snap.quantiles[0].1, 2.0);
        assert_eq!(snap.count, 4);
    }

    #[test]
    fn test_sorted_quantiles() {
        let config = WindowConfig {
            objectives: vec![
                Objective::new(0.99, 0.001).unwrap(),
                Objective::new(0.5, 0.05).unwrap(),
                Objective::new(0.9, 0.01).unwrap(),
            ],
            ..WindowConfig::default()
        };
        assert_eq!(config.sorted_quantiles(), vec![0.5, 0.9, 0.99]);
    }
}
