#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::time::Duration;

use meterkit_registry::config;
use meterkit_registry::{Registry, SnapshotSerializer};

#[test]
fn deny_unknown_fields_nested() {
    let bad = r#"
version: 1
summary:
  max_age_ms: 60000
  age_bukets: 3 # typo should fail
"#;

    let err = config::load_from_str(bad).expect_err("must fail");
    assert_eq!(err.code().as_str(), "CONFIG");
}

#[test]
fn unsupported_version_rejected() {
    let err = config::load_from_str("version: 2\n").expect_err("must fail");
    assert_eq!(err.code().as_str(), "CONFIG");
}

#[test]
fn invalid_values_rejected() {
    for bad in [
        "version: 1\nhistogram: { buckets: [1.0, 0.5] }\n",
        "version: 1\nsummary: { age_buckets: 0 }\n",
        "version: 1\nlifetime: { expires_after_ms: 0 }\n",
        "version: 1\nstatic_labels: { __reserved: x }\n",
    ] {
        let err = config::load_from_str(bad).expect_err(bad);
        assert_eq!(err.code().as_str(), "CONFIG", "{bad}");
    }
}

#[test]
fn ok_minimal_config() {
    let cfg = config::load_from_str("version: 1\n").expect("must parse");
    assert_eq!(cfg.version, 1);
    assert!(cfg.static_labels.is_empty());
    assert_eq!(cfg.histogram.buckets.len(), 11);
    assert_eq!(cfg.summary.max_age(), Duration::from_secs(600));
    assert_eq!(cfg.summary.age_buckets, 5);
    assert_eq!(cfg.summary.buffer_capacity, 500);
}

#[test]
fn full_config_applies_to_registry() {
    let ok = r#"
version: 1
static_labels: { service: api, env: prod }
suppress_initial_value: true
histogram: { buckets: [0.1, 0.5, 1.0] }
summary: { max_age_ms: 60000, age_buckets: 3, buffer_capacity: 100 }
lifetime: { expires_after_ms: 5000 }
"#;
    let cfg = config::load_from_str(ok).expect("must parse");
    let registry = std::sync::Arc::new(Registry::from_config(&cfg).unwrap());
    assert_eq!(registry.defaults().expires_after, Duration::from_secs(5));
    assert_eq!(registry.defaults().summary_age_buckets, 3);

    let h = registry
        .factory()
        .create_histogram("latency_seconds", "Latency.", &[])
        .unwrap();
    assert_eq!(h.config().bounds(), &[0.1, 0.5, 1.0, f64::INFINITY]);
    h.unlabelled().unwrap().observe(0.3);

    let mut out = SnapshotSerializer::new();
    registry.collect_and_emit(&mut out).unwrap();
    // Static labels are emitted in name order.
    assert_eq!(
        out.value(r#"latency_seconds_bucket{env="prod",service="api",le="0.5"}"#),
        Some(1.0)
    );
}
