//! Lock-free `f64` cell.
//!
//! The value lives as its bit pattern inside an `AtomicU64`; every read-modify-write
//! goes through a `compare_exchange_weak` retry loop, so concurrent updates are
//! never lost and no caller ever blocks.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic double-precision value.
#[derive(Debug, Default)]
pub struct AtomicF64 {
    bits: AtomicU64,
}

impl AtomicF64 {
    pub fn new(value: f64) -> Self {
        Self {
            bits: AtomicU64::new(value.to_bits()),
        }
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }

    pub fn set(&self, value: f64) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
    }

    /// Add `delta` and return the new value.
    pub fn add(&self, delta: f64) -> f64 {
        let mut current = self.bits.load(Ordering::Relaxed);
        loop {
            let next = (f64::from_bits(current) + delta).to_bits();
            match self
                .bits
                .compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return f64::from_bits(next),
                Err(actual) => current = actual,
            }
        }
    }

    /// Raise the value to `target`. No-op if the current value is already >= `target`.
    pub fn increment_to(&self, target: f64) {
        self.move_towards(target, |current, target| target > current);
    }

    /// Lower the value to `target`. No-op if the current value is already <= `target`.
    pub fn decrement_to(&self, target: f64) {
        self.move_towards(target, |current, target| target < current);
    }

    fn move_towards(&self, target: f64, should_move: impl Fn(f64, f64) -> bool) {
        let mut current = self.bits.load(Ordering::Relaxed);
        while should_move(f64::from_bits(current), target) {
            match self.bits.compare_exchange_weak(
                current,
                target.to_bits(),
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_add_returns_new_value() {
        let v = AtomicF64::new(1.5);
        assert_eq!(v.add(2.0), 3.5);
        assert_eq!(v.get(), 3.5);
    }

    #[test]
    fn test_increment_to_only_moves_up() {
        let v = AtomicF64::new(10.0);
        v.increment_to(5.0);
        assert_eq!(v.get(), 10.0);
        v.increment_to(12.0);
        assert_eq!(v.get(), 12.0);
    }

    #[test]
    fn test_decrement_to_only_moves_down() {
        let v = AtomicF64::new(10.0);
        v.decrement_to(15.0);
        assert_eq!(v.get(), 10.0);
        v.decrement_to(-1.0);
        assert_eq!(v.get(), -1.0);
    }

    #[test]
    fn test_concurrent_adds_are_not_lost() {
        let v = Arc::new(AtomicF64::new(0.0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let v = Arc::clone(&v);
                thread::spawn(move || {
                    for _ in 0..10_000 {
                        v.add(1.0);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(v.get(), 80_000.0);
    }

    #[test]
    fn test_concurrent_increment_to_keeps_max() {
        let v = Arc::new(AtomicF64::new(0.0));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let v = Arc::clone(&v);
                thread::spawn(move || {
                    for i in 0..1_000 {
                        v.increment_to((t * 1_000 + i) as f64);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(v.get(), 7_999.0);
    }
}
