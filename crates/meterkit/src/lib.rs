//! Top-level facade crate for meterkit.
//!
//! Re-exports the core primitives and the registry library so users can depend
//! on a single crate. Also provides one process-wide default registry for code
//! that does not want to thread a registry through explicitly.

use std::sync::{Arc, OnceLock};

pub mod core {
    pub use meterkit_core::*;
}

pub mod registry {
    pub use meterkit_registry::*;
}

pub use meterkit_core::{Exemplar, LabelSet, MeterError, MetricKind, Result};
pub use meterkit_registry::{MetricFactory, MetricSerializer, Registry, SnapshotSerializer};

static DEFAULT_REGISTRY: OnceLock<Arc<Registry>> = OnceLock::new();

/// The process-wide registry, created empty on first use.
pub fn default_registry() -> &'static Arc<Registry> {
    DEFAULT_REGISTRY.get_or_init(|| Arc::new(Registry::new()))
}

/// Factory over [`default_registry`].
pub fn default_factory() -> MetricFactory {
    default_registry().factory()
}
