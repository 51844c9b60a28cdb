//! Collector / child model.
//!
//! A [`Collector`] is one metric family shape: a name, a fixed list of label
//! names, and a concurrent map from label values to live children. Children are
//! created on first lookup and cached; creation goes through the map's entry API
//! so that concurrent lookups for the same label values always observe the same
//! `Arc<C>`.

mod child;

use std::any::Any;
use std::sync::{Arc, Weak};

use dashmap::DashMap;

use meterkit_core::{LabelSet, MetricKind, Result};

use crate::serializer::MetricSerializer;

pub use child::{Child, ChildBase};
pub(crate) use child::format_bound;

/// Everything fixed about a collector at construction.
#[derive(Debug, Clone)]
pub struct CollectorSpec {
    pub name: String,
    pub help: String,
    pub label_names: Vec<String>,
    /// Merged registry-, factory- and instance-level static labels.
    pub static_labels: LabelSet,
    pub suppress_initial_value: bool,
}

impl CollectorSpec {
    pub fn identity(&self) -> CollectorIdentity {
        CollectorIdentity {
            label_names: self.label_names.clone(),
            static_labels: self.static_labels.serialize(),
        }
    }
}

/// Distinguishes collectors sharing one family name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CollectorIdentity {
    pub label_names: Vec<String>,
    pub static_labels: String,
}

/// Receives removal requests from children holding a back-reference.
pub(crate) trait ChildOwner: Send + Sync {
    /// Evict the child owning `base`, if it is still the live entry for its labels.
    fn remove_child(&self, base: &ChildBase);
}

/// Type-erased collector as stored in a registry family.
pub(crate) trait ErasedCollector: Send + Sync {
    fn collect_children(&self, out: &mut dyn MetricSerializer) -> Result<()>;
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

pub struct Collector<C: Child> {
    name: Arc<str>,
    help: String,
    label_names: Arc<[String]>,
    static_labels: LabelSet,
    suppress_initial_value: bool,
    config: C::Config,
    children: DashMap<LabelSet, Arc<C>>,
    self_ref: Weak<Collector<C>>,
}

impl<C: Child> std::fmt::Debug for Collector<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collector")
            .field("name", &self.name)
            .field("label_names", &self.label_names)
            .finish_non_exhaustive()
    }
}

impl<C: Child> Collector<C> {
    /// Build a collector. Names and labels must already be validated.
    pub(crate) fn new(spec: CollectorSpec, config: C::Config) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            name: spec.name.into(),
            help: spec.help,
            label_names: spec.label_names.into(),
            static_labels: spec.static_labels,
            suppress_initial_value: spec.suppress_initial_value,
            config,
            children: DashMap::new(),
            self_ref: self_ref.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn help(&self) -> &str {
        &self.help
    }

    pub fn kind(&self) -> MetricKind {
        C::KIND
    }

    pub fn label_names(&self) -> &[String] {
        &self.label_names
    }

    pub fn static_labels(&self) -> &LabelSet {
        &self.static_labels
    }

    pub fn config(&self) -> &C::Config {
        &self.config
    }

    pub fn identity(&self) -> CollectorIdentity {
        CollectorIdentity {
            label_names: self.label_names.to_vec(),
            static_labels: self.static_labels.serialize(),
        }
    }

    /// Child for these label values, created on first use.
    pub fn with_labels(&self, values: &[&str]) -> Result<Arc<C>> {
        let labels = LabelSet::from_values(&self.label_names, values)?;
        Ok(self.with_label_set(labels))
    }

    /// Child of a collector declared without label names.
    pub fn unlabelled(&self) -> Result<Arc<C>> {
        self.with_labels(&[])
    }

    /// Existing child for these label values. Never creates one.
    pub fn get(&self, values: &[&str]) -> Option<Arc<C>> {
        let labels = LabelSet::from_values(&self.label_names, values).ok()?;
        self.get_by_set(&labels)
    }

    /// Evict the child for these label values. Returns whether one existed.
    pub fn remove_labels(&self, values: &[&str]) -> Result<bool> {
        let labels = LabelSet::from_values(&self.label_names, values)?;
        Ok(self.remove_label_set(&labels).is_some())
    }

    /// Label values of every live child.
    pub fn label_values(&self) -> Vec<Vec<String>> {
        self.children
            .iter()
            .map(|e| e.key().values().to_vec())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Build a label set for this collector, validating the value count.
    pub(crate) fn label_set(&self, values: &[&str]) -> Result<LabelSet> {
        LabelSet::from_values(&self.label_names, values)
    }

    pub(crate) fn with_label_set(&self, labels: LabelSet) -> Arc<C> {
        if let Some(existing) = self.children.get(&labels) {
            return Arc::clone(existing.value());
        }
        let entry = self.children.entry(labels.clone()).or_insert_with(|| {
            tracing::trace!(metric = %self.name, labels = ?labels, "creating child");
            Arc::new(self.create_child(labels))
        });
        Arc::clone(entry.value())
    }

    pub(crate) fn get_by_set(&self, labels: &LabelSet) -> Option<Arc<C>> {
        self.children.get(labels).map(|e| Arc::clone(e.value()))
    }

    pub(crate) fn remove_label_set(&self, labels: &LabelSet) -> Option<Arc<C>> {
        self.children.remove(labels).map(|(_, child)| child)
    }

    fn create_child(&self, labels: LabelSet) -> C {
        let publish = !self.suppress_initial_value || self.label_names.is_empty();
        let owner: Weak<dyn ChildOwner> = self.self_ref.clone();
        let base = ChildBase::new(
            Arc::clone(&self.name),
            &self.static_labels,
            labels,
            owner,
            publish,
        );
        C::new(base, &self.config)
    }

    fn collect_published(&self, out: &mut dyn MetricSerializer) -> Result<()> {
        if self.label_names.is_empty() {
            self.with_label_set(LabelSet::empty());
        }
        // Snapshot first so no shard lock is held while children serialize.
        let children: Vec<Arc<C>> = self.children.iter().map(|e| Arc::clone(e.value())).collect();
        for child in children {
            if child.base().is_published() {
                child.collect_points(out)?;
            }
        }
        Ok(())
    }
}

impl<C: Child> ChildOwner for Collector<C> {
    fn remove_child(&self, base: &ChildBase) {
        self.children
            .remove_if(base.labels(), |_, child| std::ptr::eq(child.base(), base));
    }
}

impl<C: Child> ErasedCollector for Collector<C> {
    fn collect_children(&self, out: &mut dyn MetricSerializer) -> Result<()> {
        self.collect_published(out)
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}
