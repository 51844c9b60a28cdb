//! meterkit core: runtime-free metric primitives, label model, and error types.
//!
//! This crate defines the building blocks shared by the registry and by any
//! serializer collaborator: label sets, exemplars, the atomic float cell that
//! backs every scalar metric, and the windowed quantile engine used by
//! summaries. It carries no async runtime dependency so it can be embedded in
//! any context.
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here.
//! All fallible paths surface as `MeterError`/`Result`, so instrumented
//! processes do not crash because of a bad label value or a misconfigured
//! metric.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod atomic;
pub mod error;
pub mod exemplar;
pub mod kind;
pub mod labels;
pub mod quantile;

/// Shared result type.
pub use error::{MeterError, Result};

pub use atomic::AtomicF64;
pub use exemplar::Exemplar;
pub use kind::MetricKind;
pub use labels::LabelSet;
