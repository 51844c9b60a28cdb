//! Metric factories.
//!
//! A [`MetricFactory`] validates names and labels, merges static labels
//! (registry, then factory, then instance) and resolves collectors through the
//! registry. [`ManagedLifetimeFactory`] wraps the result in a lease table.

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;

use meterkit_core::labels::{validate_label_names, validate_metric_name};
use meterkit_core::quantile::{Objective, WindowConfig, WindowLayout};
use meterkit_core::{LabelSet, MeterError, Result};

use crate::collector::{Child, Collector, CollectorSpec};
use crate::lifetime::{
    Delay, LifetimeManager, ManagedCounter, ManagedGauge, ManagedHistogram, ManagedMetric,
    ManagedSummary, TokioDelay,
};
use crate::metrics::{
    Counter, CounterChild, Gauge, GaugeChild, Histogram, HistogramChild, HistogramLayout, Summary,
    SummaryChild,
};
use crate::registry::Registry;

/// Options shared by every metric kind.
#[derive(Debug, Clone, Default)]
pub struct MetricConfig {
    pub label_names: Vec<String>,
    /// Instance-level static labels, appended after registry and factory labels.
    pub static_labels: Vec<(String, String)>,
    /// Falls back to the registry default when unset.
    pub suppress_initial_value: Option<bool>,
}

impl MetricConfig {
    pub fn labelled(label_names: &[&str]) -> Self {
        Self {
            label_names: label_names.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct HistogramConfig {
    pub metric: MetricConfig,
    /// Upper bounds; registry default buckets when unset.
    pub buckets: Option<Vec<f64>>,
}

#[derive(Debug, Clone, Default)]
pub struct SummaryConfig {
    pub metric: MetricConfig,
    pub objectives: Vec<Objective>,
    pub max_age: Option<Duration>,
    pub age_buckets: Option<usize>,
    pub buffer_capacity: Option<usize>,
}

#[derive(Clone)]
pub struct MetricFactory {
    registry: Arc<Registry>,
    static_labels: LabelSet,
}

impl MetricFactory {
    pub(crate) fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            static_labels: LabelSet::empty(),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Factory-level static labels (registry labels not included).
    pub fn static_labels(&self) -> &LabelSet {
        &self.static_labels
    }

    /// A factory that adds `pairs` to every metric it creates.
    pub fn with_labels<K, V>(&self, pairs: &[(K, V)]) -> Result<MetricFactory>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let extra = LabelSet::from_pairs(pairs)?;
        validate_label_names(extra.names(), None)?;
        Ok(Self {
            registry: Arc::clone(&self.registry),
            static_labels: self.static_labels.concat(&extra)?,
        })
    }

    pub fn create_counter(&self, name: &str, help: &str, label_names: &[&str]) -> Result<Arc<Counter>> {
        self.create_counter_with(name, help, &MetricConfig::labelled(label_names))
    }

    pub fn create_counter_with(&self, name: &str, help: &str, config: &MetricConfig) -> Result<Arc<Counter>> {
        self.registry.get_or_add(
            |registry_labels| self.spec::<CounterChild>(registry_labels, name, help, config),
            (),
        )
    }

    pub fn create_gauge(&self, name: &str, help: &str, label_names: &[&str]) -> Result<Arc<Gauge>> {
        self.create_gauge_with(name, help, &MetricConfig::labelled(label_names))
    }

    pub fn create_gauge_with(&self, name: &str, help: &str, config: &MetricConfig) -> Result<Arc<Gauge>> {
        self.registry.get_or_add(
            |registry_labels| self.spec::<GaugeChild>(registry_labels, name, help, config),
            (),
        )
    }

    /// Histogram with the registry's default buckets.
    pub fn create_histogram(&self, name: &str, help: &str, label_names: &[&str]) -> Result<Arc<Histogram>> {
        self.create_histogram_with(
            name,
            help,
            &HistogramConfig {
                metric: MetricConfig::labelled(label_names),
                buckets: None,
            },
        )
    }

    pub fn create_histogram_with(
        &self,
        name: &str,
        help: &str,
        config: &HistogramConfig,
    ) -> Result<Arc<Histogram>> {
        let layout = match &config.buckets {
            Some(buckets) => HistogramLayout::new(buckets.clone())?,
            None => self.registry.defaults().histogram.clone(),
        };
        self.registry.get_or_add(
            |registry_labels| self.spec::<HistogramChild>(registry_labels, name, help, &config.metric),
            layout,
        )
    }

    /// Summary with no quantile objectives (count and sum only).
    pub fn create_summary(&self, name: &str, help: &str, label_names: &[&str]) -> Result<Arc<Summary>> {
        self.create_summary_with(
            name,
            help,
            &SummaryConfig {
                metric: MetricConfig::labelled(label_names),
                ..SummaryConfig::default()
            },
        )
    }

    pub fn create_summary_with(
        &self,
        name: &str,
        help: &str,
        config: &SummaryConfig,
    ) -> Result<Arc<Summary>> {
        let defaults = self.registry.defaults();
        let layout = WindowLayout::new(&WindowConfig {
            objectives: config.objectives.clone(),
            max_age: config.max_age.unwrap_or(defaults.summary_max_age),
            age_buckets: config.age_buckets.unwrap_or(defaults.summary_age_buckets),
            buffer_capacity: config
                .buffer_capacity
                .unwrap_or(defaults.summary_buffer_capacity),
        })?;
        self.registry.get_or_add(
            |registry_labels| self.spec::<SummaryChild>(registry_labels, name, help, &config.metric),
            layout,
        )
    }

    /// A factory whose metrics expire label combinations idle for
    /// `expires_after`. Must be called inside a tokio runtime.
    pub fn with_managed_lifetime(&self, expires_after: Duration) -> Result<ManagedLifetimeFactory> {
        let runtime = Handle::try_current().map_err(|_| MeterError::NoRuntime)?;
        Ok(ManagedLifetimeFactory {
            inner: self.clone(),
            expires_after,
            delay: Arc::new(TokioDelay),
            runtime,
        })
    }

    /// Like [`with_managed_lifetime`](Self::with_managed_lifetime) using the
    /// registry's configured expiration.
    pub fn with_default_managed_lifetime(&self) -> Result<ManagedLifetimeFactory> {
        self.with_managed_lifetime(self.registry.defaults().expires_after)
    }

    fn spec<C: Child>(
        &self,
        registry_labels: &LabelSet,
        name: &str,
        help: &str,
        config: &MetricConfig,
    ) -> Result<CollectorSpec> {
        validate_metric_name(name)?;
        let reserved = C::KIND.reserved_label();
        validate_label_names(&config.label_names, reserved)?;

        let instance = LabelSet::from_pairs(&config.static_labels)?;
        let static_labels = registry_labels
            .concat(&self.static_labels)?
            .concat(&instance)?;
        validate_label_names(static_labels.names(), reserved)?;
        if let Some(dup) = config
            .label_names
            .iter()
            .find(|n| static_labels.contains_name(n))
        {
            return Err(MeterError::LabelCollision(dup.clone()));
        }

        Ok(CollectorSpec {
            name: name.to_string(),
            help: help.to_string(),
            label_names: config.label_names.clone(),
            static_labels,
            suppress_initial_value: config
                .suppress_initial_value
                .unwrap_or(self.registry.defaults().suppress_initial_value),
        })
    }
}

/// Creates [`ManagedMetric`] handles. Handles for the same registry, name and
/// label shape share one lease table no matter which factory created them.
#[derive(Clone)]
pub struct ManagedLifetimeFactory {
    inner: MetricFactory,
    expires_after: Duration,
    delay: Arc<dyn Delay>,
    runtime: Handle,
}

impl ManagedLifetimeFactory {
    /// Replace the reaper's delay (tests use [`ManualDelay`](crate::lifetime::ManualDelay)).
    pub fn with_delay(mut self, delay: Arc<dyn Delay>) -> Self {
        self.delay = delay;
        self
    }

    pub fn expires_after(&self) -> Duration {
        self.expires_after
    }

    pub fn create_counter(&self, name: &str, help: &str, label_names: &[&str]) -> Result<ManagedCounter> {
        self.manage(self.inner.create_counter(name, help, label_names)?)
    }

    pub fn create_counter_with(&self, name: &str, help: &str, config: &MetricConfig) -> Result<ManagedCounter> {
        self.manage(self.inner.create_counter_with(name, help, config)?)
    }

    pub fn create_gauge(&self, name: &str, help: &str, label_names: &[&str]) -> Result<ManagedGauge> {
        self.manage(self.inner.create_gauge(name, help, label_names)?)
    }

    pub fn create_gauge_with(&self, name: &str, help: &str, config: &MetricConfig) -> Result<ManagedGauge> {
        self.manage(self.inner.create_gauge_with(name, help, config)?)
    }

    pub fn create_histogram(&self, name: &str, help: &str, label_names: &[&str]) -> Result<ManagedHistogram> {
        self.manage(self.inner.create_histogram(name, help, label_names)?)
    }

    pub fn create_histogram_with(
        &self,
        name: &str,
        help: &str,
        config: &HistogramConfig,
    ) -> Result<ManagedHistogram> {
        self.manage(self.inner.create_histogram_with(name, help, config)?)
    }

    pub fn create_summary(&self, name: &str, help: &str, label_names: &[&str]) -> Result<ManagedSummary> {
        self.manage(self.inner.create_summary(name, help, label_names)?)
    }

    pub fn create_summary_with(
        &self,
        name: &str,
        help: &str,
        config: &SummaryConfig,
    ) -> Result<ManagedSummary> {
        self.manage(self.inner.create_summary_with(name, help, config)?)
    }

    fn manage<C: Child>(&self, collector: Arc<Collector<C>>) -> Result<ManagedMetric<C>> {
        let table = self.inner.registry.lifetime_table(&collector, self.expires_after, || {
            tracing::debug!(
                metric = %collector.name(),
                expires_after = ?self.expires_after,
                "creating lifetime table"
            );
            LifetimeManager::new(
                Arc::clone(&collector),
                self.expires_after,
                Arc::clone(&self.delay),
                self.runtime.clone(),
            )
        })?;
        Ok(ManagedMetric::new(table))
    }
}
