//! Targeted-quantile stream (Cormode, Korn, Muthukrishnan, Srivastava).
//!
//! Incoming values are staged in a small buffer, then sorted and merged into a
//! compressed list of `(value, width, delta)` tuples. Compression keeps just
//! enough tuples that every configured quantile can be answered within its
//! epsilon rank error. While nothing has been merged yet, queries are answered
//! exactly from the buffer.

use std::sync::Arc;

use super::Objective;

/// Values staged before a merge.
const STREAM_BUFFER_CAPACITY: usize = 500;

#[derive(Debug, Clone, Copy)]
struct Tuple {
    value: f64,
    width: f64,
    delta: f64,
}

#[derive(Debug, Clone)]
pub struct QuantileStream {
    objectives: Arc<[Objective]>,
    tuples: Vec<Tuple>,
    /// Number of values merged into `tuples`.
    n: f64,
    buffer: Vec<f64>,
    sorted: bool,
}

impl QuantileStream {
    pub fn targeted(objectives: Arc<[Objective]>) -> Self {
        Self {
            objectives,
            tuples: Vec::new(),
            n: 0.0,
            buffer: Vec::with_capacity(STREAM_BUFFER_CAPACITY),
            sorted: true,
        }
    }

    pub fn insert(&mut self, value: f64) {
        self.buffer.push(value);
        self.sorted = false;
        if self.buffer.len() >= STREAM_BUFFER_CAPACITY {
            self.flush();
        }
    }

    /// Number of values seen since the last reset.
    pub fn count(&self) -> usize {
        self.buffer.len() + self.n as usize
    }

    /// Estimated value at rank `q`. Returns NaN on an empty stream.
    pub fn query(&mut self, q: f64) -> f64 {
        if self.tuples.is_empty() {
            let len = self.buffer.len();
            if len == 0 {
                return f64::NAN;
            }
            let rank = ((len as f64 * q).ceil() as usize).saturating_sub(1).min(len - 1);
            self.sort_buffer();
            return self.buffer[rank];
        }
        self.flush();
        self.query_merged(q)
    }

    pub fn reset(&mut self) {
        self.tuples.clear();
        self.n = 0.0;
        self.buffer.clear();
        self.sorted = true;
    }

    fn sort_buffer(&mut self) {
        if !self.sorted {
            self.buffer.sort_by(f64::total_cmp);
            self.sorted = true;
        }
    }

    fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        self.sort_buffer();
        let staged = std::mem::take(&mut self.buffer);
        self.merge(&staged);
        self.buffer = staged;
        self.buffer.clear();
        self.sorted = true;
    }

    /// Allowed tuple error at rank `r`: the tightest bound across objectives.
    fn invariant(&self, r: f64) -> f64 {
        let mut min = f64::MAX;
        for o in self.objectives.iter() {
            let f = if o.quantile * self.n <= r {
                (2.0 * o.epsilon * r) / o.quantile
            } else {
                (2.0 * o.epsilon * (self.n - r)) / (1.0 - o.quantile)
            };
            if f < min {
                min = f;
            }
        }
        min
    }

    fn merge(&mut self, sorted: &[f64]) {
        let mut r = 0.0;
        let mut i = 0;
        for &value in sorted {
            let mut inserted = false;
            while i < self.tuples.len() {
                let current = self.tuples[i];
                if current.value > value {
                    let delta = (self.invariant(r).floor() - 1.0).max(0.0);
                    self.tuples.insert(
                        i,
                        Tuple {
                            value,
                            width: 1.0,
                            delta,
                        },
                    );
                    i += 1;
                    inserted = true;
                    break;
                }
                r += current.width;
                i += 1;
            }
            if !inserted {
                self.tuples.push(Tuple {
                    value,
                    width: 1.0,
                    delta: 0.0,
                });
                i += 1;
            }
            self.n += 1.0;
            r += 1.0;
        }
        self.compress();
    }

    fn compress(&mut self) {
        if self.tuples.len() < 2 {
            return;
        }
        let mut xi = self.tuples.len() - 1;
        let mut x = self.tuples[xi];
        let mut r = self.n - 1.0 - x.width;

        let mut i = xi;
        while i > 0 {
            i -= 1;
            let current = self.tuples[i];
            if current.width + x.width + x.delta <= self.invariant(r) {
                x.width += current.width;
                self.tuples[xi] = x;
                self.tuples.remove(i);
                xi -= 1;
            } else {
                x = current;
                xi = i;
            }
            r -= current.width;
        }
    }

    fn query_merged(&self, q: f64) -> f64 {
        let Some(first) = self.tuples.first() else {
            return f64::NAN;
        };
        let mut target = (q * self.n).ceil();
        target += (self.invariant(target) / 2.0).ceil();

        let mut prev = *first;
        let mut r = 0.0;
        for current in &self.tuples[1..] {
            r += prev.width;
            if r + current.width + current.delta > target {
                return prev.value;
            }
            prev = *current;
        }
        prev.value
    }
}
