//! meterkit registry library entry.
//!
//! This crate wires the core primitives into a usable instrumentation stack:
//! the collector/child model, the four metric kinds, the registry and its
//! factories, strict YAML configuration, and managed-lifetime leases. Export
//! formats are not implemented here; they plug in through
//! [`serializer::MetricSerializer`].

pub mod collector;
pub mod config;
pub mod factory;
pub mod lifetime;
pub mod metrics;
pub mod registry;
pub mod serializer;

pub use collector::{Child, Collector, CollectorIdentity};
pub use factory::{HistogramConfig, ManagedLifetimeFactory, MetricConfig, MetricFactory, SummaryConfig};
pub use lifetime::{
    AutoLeased, AutoLeasing, Delay, Lease, ManagedCounter, ManagedGauge, ManagedHistogram,
    ManagedMetric, ManagedSummary, ManualDelay, TokioDelay,
};
pub use metrics::{
    Counter, CounterChild, Gauge, GaugeChild, Histogram, HistogramChild, Summary, SummaryChild,
};
pub use registry::{AsyncBeforeCollect, Registry};
pub use serializer::{MetricSerializer, SnapshotSerializer};
