//! Managed lifetime: leases keep label combinations alive; once a combination
//! has had no lease for `expires_after`, a background reaper removes it.
//!
//! - [`delay`]: the injectable cancellable wait the reaper runs on
//! - [`manager`]: lease table, reaper scheduling, and the [`ManagedMetric`] handle
//! - [`auto`]: a view that leases implicitly on every write

pub mod auto;
pub mod delay;
pub mod manager;

pub use auto::{AutoLeased, AutoLeasing};
pub use delay::{Delay, ManualDelay, TokioDelay};
pub use manager::{
    Lease, LifetimeManager, ManagedCounter, ManagedGauge, ManagedHistogram, ManagedMetric,
    ManagedSummary,
};
