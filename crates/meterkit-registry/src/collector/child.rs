use std::fmt::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use meterkit_core::labels::write_pair;
use meterkit_core::{LabelSet, MetricKind, Result};

use super::ChildOwner;
use crate::serializer::MetricSerializer;

/// One time series of a given metric kind.
pub trait Child: Send + Sync + Sized + 'static {
    /// Per-collector configuration shared by all children.
    type Config: Send + Sync + 'static;

    const KIND: MetricKind;

    fn new(base: ChildBase, config: &Self::Config) -> Self;

    fn base(&self) -> &ChildBase;

    /// Emit this child's points. Only called while published.
    fn collect_points(&self, out: &mut dyn MetricSerializer) -> Result<()>;

    fn labels(&self) -> &LabelSet {
        self.base().labels()
    }

    fn is_published(&self) -> bool {
        self.base().is_published()
    }

    /// Start exporting, even if never mutated.
    fn publish(&self) {
        self.base().publish();
    }

    /// Stop exporting without discarding the accumulated value.
    fn unpublish(&self) {
        self.base().unpublish();
    }

    /// Detach from the parent collector. Later writes are not exported.
    fn remove(&self) {
        self.base().remove();
    }
}

/// State shared by every child kind: identity, labels, and the publish flag.
pub struct ChildBase {
    name: Arc<str>,
    labels: LabelSet,
    /// Static labels followed by instance labels, pre-rendered.
    flattened: String,
    owner: Weak<dyn ChildOwner>,
    published: AtomicBool,
}

impl ChildBase {
    pub(crate) fn new(
        name: Arc<str>,
        static_labels: &LabelSet,
        labels: LabelSet,
        owner: Weak<dyn ChildOwner>,
        published: bool,
    ) -> Self {
        let mut flattened = static_labels.serialize();
        if !static_labels.is_empty() && !labels.is_empty() {
            flattened.push(',');
        }
        flattened.push_str(&labels.serialize());
        Self {
            name,
            labels,
            flattened,
            owner,
            published: AtomicBool::new(published),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Instance label values (excluding static labels).
    pub fn labels(&self) -> &LabelSet {
        &self.labels
    }

    pub fn is_published(&self) -> bool {
        self.published.load(Ordering::Relaxed)
    }

    pub fn publish(&self) {
        self.published.store(true, Ordering::Relaxed);
    }

    pub fn unpublish(&self) {
        self.published.store(false, Ordering::Relaxed);
    }

    pub fn remove(&self) {
        if let Some(owner) = self.owner.upgrade() {
            owner.remove_child(self);
        }
    }

    /// `name{suffix}{labels}`, braces omitted when there are no labels.
    pub fn identifier(&self, suffix: &str) -> String {
        let mut id = format!("{}{}", self.name, suffix);
        if !self.flattened.is_empty() {
            let _ = write!(id, "{{{}}}", self.flattened);
        }
        id
    }

    /// Like [`identifier`](Self::identifier) with one extra trailing label
    /// (`le` for buckets, `quantile` for summaries).
    pub fn identifier_with(&self, suffix: &str, label: &str, value: &str) -> String {
        let mut id = format!("{}{}{{", self.name, suffix);
        if !self.flattened.is_empty() {
            id.push_str(&self.flattened);
            id.push(',');
        }
        write_pair(&mut id, label, value);
        id.push('}');
        id
    }
}

/// Render a bound the way exposition formats expect (`+Inf`, `0.25`, `1`).
pub(crate) fn format_bound(value: f64) -> String {
    if value == f64::INFINITY {
        "+Inf".to_string()
    } else if value == f64::NEG_INFINITY {
        "-Inf".to_string()
    } else {
        format!("{value}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoOwner;

    impl ChildOwner for NoOwner {
        fn remove_child(&self, _base: &ChildBase) {}
    }

    fn base(static_pairs: &[(&str, &str)], instance: &[(&str, &str)]) -> ChildBase {
        let owner: Weak<dyn ChildOwner> = Weak::<NoOwner>::new();
        ChildBase::new(
            Arc::from("latency_seconds"),
            &LabelSet::from_pairs(static_pairs).unwrap(),
            LabelSet::from_pairs(instance).unwrap(),
            owner,
            true,
        )
    }

    #[test]
    fn test_identifier_without_labels() {
        let b = base(&[], &[]);
        assert_eq!(b.identifier(""), "latency_seconds");
        assert_eq!(b.identifier("_sum"), "latency_seconds_sum");
        assert_eq!(
            b.identifier_with("_bucket", "le", "0.5"),
            r#"latency_seconds_bucket{le="0.5"}"#
        );
    }

    #[test]
    fn test_identifier_static_then_instance() {
        let b = base(&[("env", "prod")], &[("route", "/a")]);
        assert_eq!(
            b.identifier("_count"),
            r#"latency_seconds_count{env="prod",route="/a"}"#
        );
        assert_eq!(
            b.identifier_with("", "quantile", "0.9"),
            r#"latency_seconds{env="prod",route="/a",quantile="0.9"}"#
        );
    }

    #[test]
    fn test_format_bound() {
        assert_eq!(format_bound(f64::INFINITY), "+Inf");
        assert_eq!(format_bound(1.0), "1");
        assert_eq!(format_bound(0.025), "0.025");
    }

    #[test]
    fn test_remove_after_owner_dropped_is_noop() {
        let b = base(&[], &[("route", "/a")]);
        b.remove();
    }
}
