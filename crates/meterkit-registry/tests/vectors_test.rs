//! Histogram bucketing and label serialization vectors.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]


use std::sync::Arc;

use meterkit_core::LabelSet;
use meterkit_registry::{HistogramConfig, Registry, SnapshotSerializer};
use vector_loader::{load, HistogramVector, LabelVector};

#[test]
fn histogram_vectors() {
    for (i, v) in load::<HistogramVector>("histogram.json").into_iter().enumerate() {
        let registry = Arc::new(Registry::new());
        let name = format!("vector_{i}");
        let created = registry.factory().create_histogram_with(
            &name,
            &v.description,
            &HistogramConfig {
                buckets: Some(v.buckets.clone()),
                ..HistogramConfig::default()
            },
        );

        if let Some(expect_error) = &v.expect_error {
            let err = created.err().unwrap_or_else(|| panic!("{}: expected error", v.description));
            assert_eq!(err.code().as_str(), expect_error.code, "{}", v.description);
            continue;
        }
        let expect = v.expect.as_ref().expect("vector needs expect or expect_error");

        let child = created.unwrap().unlabelled().unwrap();
        for &o in &v.observations {
            child.observe(o);
        }

        let mut out = SnapshotSerializer::new();
        registry.collect_and_emit(&mut out).unwrap();
        for (le, count) in &expect.cumulative {
            let id = format!(r#"{name}_bucket{{le="{le}"}}"#);
            assert_eq!(out.value(&id), Some(*count as f64), "{}: {id}", v.description);
        }
        assert_eq!(
            out.value(&format!("{name}_count")),
            Some(expect.count as f64),
            "{}",
            v.description
        );
        let sum = out.value(&format!("{name}_sum")).unwrap();
        assert!((sum - expect.sum).abs() < 1e-9, "{}: sum {sum}", v.description);
    }
}

#[test]
fn label_vectors() {
    for v in load::<LabelVector>("labels.json") {
        let labels = LabelSet::from_pairs(&v.pairs).unwrap();
        assert_eq!(labels.serialize(), v.serialized, "{}", v.description);
    }
}
