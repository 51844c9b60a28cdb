//! Metric registry:
//! - `family name -> Family { help, kind, identity -> collector }`
//! - `(family name, identity) -> lifetime table`
//!
//! A family name is bound to one metric kind for the registry's lifetime.
//! Collectors with different label names or static labels may share a family.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;

use meterkit_core::labels::validate_label_names;
use meterkit_core::quantile::window::{
    DEFAULT_AGE_BUCKETS, DEFAULT_BUFFER_CAPACITY, DEFAULT_MAX_AGE,
};
use meterkit_core::{LabelSet, MeterError, MetricKind, Result};

use crate::collector::{Child, Collector, CollectorIdentity, CollectorSpec, ErasedCollector};
use crate::config::MeterConfig;
use crate::factory::MetricFactory;
use crate::lifetime::LifetimeManager;
use crate::metrics::HistogramLayout;
use crate::serializer::MetricSerializer;

/// Runs before every collection pass. Returning an error (typically
/// [`MeterError::ScrapeFailed`]) fails the whole pass.
pub type BeforeCollect = Arc<dyn Fn() -> Result<()> + Send + Sync>;

#[async_trait]
pub trait AsyncBeforeCollect: Send + Sync {
    async fn before_collect(&self) -> Result<()>;
}

/// Defaults applied when a metric is created without explicit settings.
#[derive(Debug, Clone)]
pub struct RegistryDefaults {
    pub suppress_initial_value: bool,
    pub histogram: HistogramLayout,
    pub summary_max_age: Duration,
    pub summary_age_buckets: usize,
    pub summary_buffer_capacity: usize,
    pub expires_after: Duration,
}

impl Default for RegistryDefaults {
    fn default() -> Self {
        Self {
            suppress_initial_value: false,
            histogram: HistogramLayout::default(),
            summary_max_age: DEFAULT_MAX_AGE,
            summary_age_buckets: DEFAULT_AGE_BUCKETS,
            summary_buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            expires_after: Duration::from_secs(60),
        }
    }
}

struct Family {
    help: String,
    kind: MetricKind,
    collectors: DashMap<CollectorIdentity, Arc<dyn ErasedCollector>>,
}

type LifetimeKey = (String, CollectorIdentity);

pub struct Registry {
    families: DashMap<String, Arc<Family>>,
    static_labels: RwLock<LabelSet>,
    defaults: RegistryDefaults,
    before_collect: RwLock<Vec<BeforeCollect>>,
    async_before_collect: RwLock<Vec<Arc<dyn AsyncBeforeCollect>>>,
    lifetimes: DashMap<LifetimeKey, Arc<dyn Any + Send + Sync>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self {
            families: DashMap::new(),
            static_labels: RwLock::new(LabelSet::empty()),
            defaults: RegistryDefaults::default(),
            before_collect: RwLock::new(Vec::new()),
            async_before_collect: RwLock::new(Vec::new()),
            lifetimes: DashMap::new(),
        }
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with static labels and defaults taken from `cfg`.
    pub fn from_config(cfg: &MeterConfig) -> Result<Self> {
        cfg.validate()?;
        let static_labels = cfg.static_label_set()?;
        validate_label_names(static_labels.names(), None)?;
        Ok(Self {
            static_labels: RwLock::new(static_labels),
            defaults: RegistryDefaults {
                suppress_initial_value: cfg.suppress_initial_value,
                histogram: cfg.histogram.layout()?,
                summary_max_age: cfg.summary.max_age(),
                summary_age_buckets: cfg.summary.age_buckets,
                summary_buffer_capacity: cfg.summary.buffer_capacity,
                expires_after: cfg.lifetime.expires_after(),
            },
            ..Self::default()
        })
    }

    /// Factory for creating metrics in this registry.
    pub fn factory(self: &Arc<Self>) -> MetricFactory {
        MetricFactory::new(Arc::clone(self))
    }

    pub fn defaults(&self) -> &RegistryDefaults {
        &self.defaults
    }

    pub fn static_labels(&self) -> LabelSet {
        self.static_labels.read().clone()
    }

    /// Replace registry-level labels. Only allowed before any metric exists.
    pub fn set_static_labels<K, V>(&self, pairs: &[(K, V)]) -> Result<()>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let labels = LabelSet::from_pairs(pairs)?;
        validate_label_names(labels.names(), None)?;
        let mut current = self.static_labels.write();
        if !self.families.is_empty() {
            return Err(MeterError::InvalidState(
                "static labels cannot change after metrics are registered".into(),
            ));
        }
        *current = labels;
        Ok(())
    }

    pub fn add_before_collect_callback(&self, callback: impl Fn() -> Result<()> + Send + Sync + 'static) {
        self.before_collect.write().push(Arc::new(callback));
    }

    pub fn add_async_before_collect_callback(&self, callback: Arc<dyn AsyncBeforeCollect>) {
        self.async_before_collect.write().push(callback);
    }

    /// Registered family names in collection order.
    pub fn family_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.families.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Fetch the collector matching the built spec's name and identity,
    /// creating it on first use. `config` is ignored when the collector
    /// already exists.
    ///
    /// `build` receives the registry's static labels. The read guard is held
    /// until the family is registered, so `set_static_labels` either lands
    /// first or is rejected.
    pub(crate) fn get_or_add<C: Child>(
        &self,
        build: impl FnOnce(&LabelSet) -> Result<CollectorSpec>,
        config: C::Config,
    ) -> Result<Arc<Collector<C>>> {
        let registry_labels = self.static_labels.read();
        let spec = build(&registry_labels)?;
        let family = Arc::clone(
            self.families
                .entry(spec.name.clone())
                .or_insert_with(|| {
                    tracing::debug!(metric = %spec.name, kind = C::KIND.as_str(), "registering family");
                    Arc::new(Family {
                        help: spec.help.clone(),
                        kind: C::KIND,
                        collectors: DashMap::new(),
                    })
                })
                .value(),
        );
        if family.kind != C::KIND {
            return Err(MeterError::KindMismatch {
                name: spec.name,
                existing: family.kind,
                requested: C::KIND,
            });
        }

        drop(registry_labels);

        let name = spec.name.clone();
        let erased = Arc::clone(
            family
                .collectors
                .entry(spec.identity())
                .or_insert_with(|| {
                    tracing::debug!(
                        metric = %spec.name,
                        labels = ?spec.label_names,
                        static_labels = %spec.static_labels.serialize(),
                        "registering collector"
                    );
                    let collector: Arc<dyn ErasedCollector> = Collector::<C>::new(spec, config);
                    collector
                })
                .value(),
        );
        erased
            .into_any()
            .downcast::<Collector<C>>()
            .map_err(|_| MeterError::Internal(format!("collector type mismatch for {name}")))
    }

    /// Lease table shared by every handle for `collector`.
    ///
    /// The first caller's expiration wins; later callers asking for a different
    /// one get the existing table and a warning.
    pub(crate) fn lifetime_table<C: Child>(
        &self,
        collector: &Arc<Collector<C>>,
        expires_after: Duration,
        create: impl FnOnce() -> Arc<LifetimeManager<C>>,
    ) -> Result<Arc<LifetimeManager<C>>> {
        let key = (collector.name().to_string(), collector.identity());
        let table = Arc::clone(
            self.lifetimes
                .entry(key)
                .or_insert_with(|| {
                    let table: Arc<dyn Any + Send + Sync> = create();
                    table
                })
                .value(),
        );
        let table = table.downcast::<LifetimeManager<C>>().map_err(|_| {
            MeterError::Internal(format!("lifetime table type mismatch for {}", collector.name()))
        })?;
        if table.expires_after() != expires_after {
            tracing::warn!(
                metric = %collector.name(),
                existing = ?table.expires_after(),
                requested = ?expires_after,
                "lifetime table already exists with a different expiration"
            );
        }
        Ok(table)
    }

    /// Run sync before-collect callbacks, then emit every family in name order.
    ///
    /// Async callbacks only run through [`collect_and_emit_async`](Self::collect_and_emit_async).
    pub fn collect_and_emit(&self, out: &mut dyn MetricSerializer) -> Result<()> {
        let callbacks: Vec<BeforeCollect> = self.before_collect.read().clone();
        for callback in callbacks {
            callback()?;
        }
        self.emit(out)
    }

    /// Run async callbacks, then everything [`collect_and_emit`](Self::collect_and_emit) does.
    pub async fn collect_and_emit_async(&self, out: &mut dyn MetricSerializer) -> Result<()> {
        let callbacks: Vec<Arc<dyn AsyncBeforeCollect>> = self.async_before_collect.read().clone();
        for callback in callbacks {
            callback.before_collect().await?;
        }
        self.collect_and_emit(out)
    }

    fn emit(&self, out: &mut dyn MetricSerializer) -> Result<()> {
        let mut families: Vec<(String, Arc<Family>)> = self
            .families
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();
        families.sort_by(|a, b| a.0.cmp(&b.0));

        for (name, family) in families {
            let mut collectors: Vec<(CollectorIdentity, Arc<dyn ErasedCollector>)> = family
                .collectors
                .iter()
                .map(|e| (e.key().clone(), Arc::clone(e.value())))
                .collect();
            collectors.sort_by(|a, b| a.0.cmp(&b.0));

            out.write_family_declaration(&name, &family.help, family.kind)?;
            for (_, collector) in collectors {
                collector.collect_children(out)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serializer::SnapshotSerializer;

    #[test]
    fn test_families_emitted_in_name_order() {
        let registry = Arc::new(Registry::new());
        let factory = registry.factory();
        factory.create_gauge("zeta", "Z.", &[]).unwrap();
        factory.create_counter("alpha_total", "A.", &[]).unwrap();

        let mut out = SnapshotSerializer::new();
        registry.collect_and_emit(&mut out).unwrap();
        let names: Vec<&str> = out.families().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["alpha_total", "zeta"]);
        assert_eq!(registry.family_names(), vec!["alpha_total", "zeta"]);
    }

    #[test]
    fn test_kind_mismatch_rejected() {
        let registry = Arc::new(Registry::new());
        let factory = registry.factory();
        factory.create_counter("jobs", "Jobs.", &[]).unwrap();
        let err = factory.create_gauge("jobs", "Jobs.", &[]).unwrap_err();
        assert!(matches!(
            err,
            MeterError::KindMismatch {
                existing: MetricKind::Counter,
                requested: MetricKind::Gauge,
                ..
            }
        ));
    }

    #[test]
    fn test_same_shape_returns_same_collector() {
        let registry = Arc::new(Registry::new());
        let a = registry.factory().create_counter("jobs_total", "Jobs.", &["queue"]).unwrap();
        let b = registry.factory().create_counter("jobs_total", "Jobs.", &["queue"]).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_label_shapes_coexist_in_one_family() {
        let registry = Arc::new(Registry::new());
        let factory = registry.factory();
        let by_queue = factory.create_counter("jobs_total", "Jobs.", &["queue"]).unwrap();
        let plain = factory.create_counter("jobs_total", "Jobs.", &[]).unwrap();
        assert!(!Arc::ptr_eq(&by_queue.with_labels(&["a"]).unwrap(), &plain.unlabelled().unwrap()));
        by_queue.with_labels(&["a"]).unwrap().inc();

        let mut out = SnapshotSerializer::new();
        registry.collect_and_emit(&mut out).unwrap();
        assert_eq!(out.families().len(), 1);
        assert_eq!(out.value("jobs_total"), Some(0.0));
        assert_eq!(out.value(r#"jobs_total{queue="a"}"#), Some(1.0));
    }

    #[test]
    fn test_static_labels_frozen_after_registration() {
        let registry = Arc::new(Registry::new());
        registry.set_static_labels(&[("env", "dev")]).unwrap();
        registry.factory().create_counter("jobs_total", "Jobs.", &[]).unwrap();
        assert!(matches!(
            registry.set_static_labels(&[("env", "prod")]),
            Err(MeterError::InvalidState(_))
        ));
        assert_eq!(registry.static_labels().get("env"), Some("dev"));
    }

    #[test]
    fn test_static_labels_race_with_registration() {
        for _ in 0..64 {
            let registry = Arc::new(Registry::new());
            std::thread::scope(|s| {
                s.spawn(|| {
                    let _ = registry.set_static_labels(&[("env", "prod")]);
                });
                s.spawn(|| {
                    registry.factory().create_counter("jobs_total", "Jobs.", &[]).unwrap();
                });
            });

            // Whichever side won, the collector carries the registry's final labels.
            let expected = if registry.static_labels().is_empty() {
                "jobs_total"
            } else {
                r#"jobs_total{env="prod"}"#
            };
            let mut out = SnapshotSerializer::new();
            registry.collect_and_emit(&mut out).unwrap();
            assert_eq!(out.point_count(), 1);
            assert_eq!(out.value(expected), Some(0.0));
        }
    }

    #[test]
    fn test_before_collect_failure_aborts_pass() {
        let registry = Arc::new(Registry::new());
        registry.factory().create_counter("jobs_total", "Jobs.", &[]).unwrap();
        registry.add_before_collect_callback(|| Err(MeterError::ScrapeFailed("backend down".into())));

        let mut out = SnapshotSerializer::new();
        let err = registry.collect_and_emit(&mut out).unwrap_err();
        assert!(matches!(err, MeterError::ScrapeFailed(_)));
        assert!(out.families().is_empty());
    }

    struct Refresh(Arc<crate::metrics::Gauge>);

    #[async_trait]
    impl AsyncBeforeCollect for Refresh {
        async fn before_collect(&self) -> Result<()> {
            self.0.unlabelled()?.set(42.0);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_async_before_collect_runs_first() {
        let registry = Arc::new(Registry::new());
        let gauge = registry.factory().create_gauge("pool_size", "Pool.", &[]).unwrap();
        registry.add_async_before_collect_callback(Arc::new(Refresh(gauge)));

        let mut out = SnapshotSerializer::new();
        registry.collect_and_emit(&mut out).unwrap();
        assert_eq!(out.value("pool_size"), Some(0.0));

        let mut out = SnapshotSerializer::new();
        registry.collect_and_emit_async(&mut out).await.unwrap();
        assert_eq!(out.value("pool_size"), Some(42.0));
    }
}
