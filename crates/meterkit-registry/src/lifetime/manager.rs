use std::collections::HashMap;
use std::future::Future;
use std::ops::Deref;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use meterkit_core::{LabelSet, Result};

use super::auto::AutoLeasing;
use super::delay::Delay;
use crate::collector::{Child, Collector};
use crate::metrics::{CounterChild, GaugeChild, HistogramChild, SummaryChild};

/// Lease bookkeeping for one label combination.
#[derive(Debug, Default)]
struct LifetimeEntry {
    leases: usize,
    idle_since: Option<Instant>,
    /// Bumped on every idle transition so a stale reaper cannot expire a
    /// newer idle period.
    generation: u64,
    reaper: Option<CancellationToken>,
}

/// Lease table for one collector. Shared by every handle for the same
/// registry, name and label shape.
pub struct LifetimeManager<C: Child> {
    collector: Arc<Collector<C>>,
    expires_after: Duration,
    delay: Arc<dyn Delay>,
    runtime: Handle,
    entries: Mutex<HashMap<LabelSet, LifetimeEntry>>,
    self_ref: Weak<LifetimeManager<C>>,
}

impl<C: Child> LifetimeManager<C> {
    pub(crate) fn new(
        collector: Arc<Collector<C>>,
        expires_after: Duration,
        delay: Arc<dyn Delay>,
        runtime: Handle,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            collector,
            expires_after,
            delay,
            runtime,
            entries: Mutex::new(HashMap::new()),
            self_ref: self_ref.clone(),
        })
    }

    pub fn expires_after(&self) -> Duration {
        self.expires_after
    }

    pub(crate) fn collector(&self) -> &Arc<Collector<C>> {
        &self.collector
    }

    pub(crate) fn acquire(self: &Arc<Self>, labels: LabelSet) -> Lease<C> {
        let child = {
            let mut entries = self.entries.lock();
            let entry = entries.entry(labels.clone()).or_default();
            entry.leases += 1;
            entry.idle_since = None;
            if let Some(token) = entry.reaper.take() {
                token.cancel();
            }
            tracing::trace!(metric = %self.collector.name(), labels = ?labels, leases = entry.leases, "lease acquired");
            // Under the table lock so a concurrent expiry cannot evict between lookup and count.
            self.collector.with_label_set(labels.clone())
        };
        Lease {
            manager: Arc::clone(self),
            labels,
            child,
        }
    }

    fn release(&self, labels: &LabelSet) {
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get_mut(labels) else {
            return;
        };
        entry.leases = entry.leases.saturating_sub(1);
        tracing::trace!(metric = %self.collector.name(), labels = ?labels, leases = entry.leases, "lease released");
        if entry.leases > 0 {
            return;
        }

        entry.idle_since = Some(Instant::now());
        entry.generation = entry.generation.wrapping_add(1);
        if let Some(old) = entry.reaper.take() {
            old.cancel();
        }
        let token = CancellationToken::new();
        entry.reaper = Some(token.clone());

        let generation = entry.generation;
        let manager = self.self_ref.clone();
        let delay = Arc::clone(&self.delay);
        let expires_after = self.expires_after;
        let labels = labels.clone();
        self.runtime.spawn(async move {
            if delay.delay(expires_after, token).await {
                if let Some(manager) = manager.upgrade() {
                    manager.expire(&labels, generation);
                }
            }
        });
    }

    fn expire(&self, labels: &LabelSet, generation: u64) {
        let mut entries = self.entries.lock();
        let idle = entries
            .get(labels)
            .is_some_and(|e| e.leases == 0 && e.generation == generation);
        if !idle {
            return;
        }
        let idle_for = entries
            .remove(labels)
            .and_then(|e| e.idle_since)
            .map(|since| since.elapsed());
        self.collector.remove_label_set(labels);
        tracing::debug!(
            metric = %self.collector.name(),
            labels = ?labels,
            idle_for = ?idle_for,
            "expired idle series"
        );
    }

    fn lease_count(&self, labels: &LabelSet) -> usize {
        self.entries.lock().get(labels).map_or(0, |e| e.leases)
    }

    fn tracked(&self) -> usize {
        self.entries.lock().len()
    }
}

/// Keeps a series alive while held. Dropping it releases the lease.
#[must_use = "the lease is released when dropped"]
pub struct Lease<C: Child> {
    manager: Arc<LifetimeManager<C>>,
    labels: LabelSet,
    child: Arc<C>,
}

impl<C: Child> Lease<C> {
    pub fn child(&self) -> &Arc<C> {
        &self.child
    }

    pub fn labels(&self) -> &LabelSet {
        &self.labels
    }
}

impl<C: Child> Deref for Lease<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.child
    }
}

impl<C: Child> Drop for Lease<C> {
    fn drop(&mut self) {
        self.manager.release(&self.labels);
    }
}

/// A metric whose label combinations expire after going unused.
pub struct ManagedMetric<C: Child> {
    manager: Arc<LifetimeManager<C>>,
}

pub type ManagedCounter = ManagedMetric<CounterChild>;
pub type ManagedGauge = ManagedMetric<GaugeChild>;
pub type ManagedHistogram = ManagedMetric<HistogramChild>;
pub type ManagedSummary = ManagedMetric<SummaryChild>;

impl<C: Child> Clone for ManagedMetric<C> {
    fn clone(&self) -> Self {
        Self {
            manager: Arc::clone(&self.manager),
        }
    }
}

impl<C: Child> ManagedMetric<C> {
    pub(crate) fn new(manager: Arc<LifetimeManager<C>>) -> Self {
        Self { manager }
    }

    pub fn collector(&self) -> &Arc<Collector<C>> {
        self.manager.collector()
    }

    pub fn expires_after(&self) -> Duration {
        self.manager.expires_after()
    }

    /// Lease the child for these label values, creating it if needed.
    pub fn acquire_lease(&self, values: &[&str]) -> Result<Lease<C>> {
        let labels = self.manager.collector().label_set(values)?;
        Ok(self.manager.acquire(labels))
    }

    /// Run `f` while holding a lease.
    pub fn with_lease<R>(&self, values: &[&str], f: impl FnOnce(&C) -> R) -> Result<R> {
        let lease = self.acquire_lease(values)?;
        Ok(f(lease.child().as_ref()))
    }

    /// Hold a lease until the future returned by `f` completes.
    pub async fn with_lease_async<F, Fut, R>(&self, values: &[&str], f: F) -> Result<R>
    where
        F: FnOnce(Arc<C>) -> Fut,
        Fut: Future<Output = R>,
    {
        let lease = self.acquire_lease(values)?;
        let out = f(Arc::clone(lease.child())).await;
        drop(lease);
        Ok(out)
    }

    /// A view whose every mutation takes and releases a lease.
    pub fn with_extend_lifetime_on_use(&self) -> AutoLeasing<C> {
        AutoLeasing::new(Arc::clone(&self.manager))
    }

    /// Active leases for these label values.
    pub fn lease_count(&self, values: &[&str]) -> Result<usize> {
        let labels = self.manager.collector().label_set(values)?;
        Ok(self.manager.lease_count(&labels))
    }

    /// Label combinations currently tracked (leased or idle, not yet expired).
    pub fn tracked(&self) -> usize {
        self.manager.tracked()
    }

    /// Whether both handles resolve to the same lease table.
    pub fn shares_table_with(&self, other: &ManagedMetric<C>) -> bool {
        Arc::ptr_eq(&self.manager, &other.manager)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::CollectorSpec;
    use crate::lifetime::ManualDelay;
    use crate::metrics::Counter;

    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    fn managed(delay: Arc<ManualDelay>) -> ManagedCounter {
        let collector = Counter::new(
            CollectorSpec {
                name: "sessions_total".into(),
                help: "Sessions.".into(),
                label_names: vec!["user".into()],
                static_labels: LabelSet::empty(),
                suppress_initial_value: false,
            },
            (),
        );
        ManagedMetric::new(LifetimeManager::new(
            collector,
            Duration::from_secs(30),
            delay,
            Handle::current(),
        ))
    }

    #[tokio::test]
    async fn test_nested_leases_hold_series() {
        let delay = Arc::new(ManualDelay::new());
        let m = managed(Arc::clone(&delay));

        let outer = m.acquire_lease(&["alice"]).unwrap();
        outer.inc_by(5.0).unwrap();
        {
            let inner = m.acquire_lease(&["alice"]).unwrap();
            inner.inc();
            assert_eq!(m.lease_count(&["alice"]).unwrap(), 2);
        }
        settle().await;
        delay.elapse_all();
        settle().await;
        assert_eq!(m.collector().get(&["alice"]).unwrap().value(), 6.0);

        drop(outer);
        settle().await;
        assert_eq!(delay.requested(), vec![Duration::from_secs(30)]);
        delay.elapse_all();
        settle().await;
        assert!(m.collector().get(&["alice"]).is_none());
        assert_eq!(m.tracked(), 0);

        let again = m.acquire_lease(&["alice"]).unwrap();
        assert_eq!(again.value(), 0.0);
    }

    #[tokio::test]
    async fn test_reacquire_cancels_pending_expiry() {
        let delay = Arc::new(ManualDelay::new());
        let m = managed(Arc::clone(&delay));

        m.with_lease(&["bob"], |c| c.inc()).unwrap();
        settle().await;
        assert_eq!(delay.pending(), 1);

        let lease = m.acquire_lease(&["bob"]).unwrap();
        settle().await;
        assert_eq!(delay.pending(), 0);
        assert_eq!(delay.elapse_all(), 0);
        settle().await;
        assert_eq!(lease.value(), 1.0);
    }

    #[tokio::test]
    async fn test_with_lease_async_holds_across_await() {
        let delay = Arc::new(ManualDelay::new());
        let m = managed(Arc::clone(&delay));
        let m2 = m.clone();

        let value = m
            .with_lease_async(&["carol"], |c| async move {
                c.inc_by(2.0).unwrap();
                tokio::task::yield_now().await;
                assert_eq!(m2.lease_count(&["carol"]).unwrap(), 1);
                c.value()
            })
            .await
            .unwrap();
        assert_eq!(value, 2.0);
        assert_eq!(m.lease_count(&["carol"]).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_label_count_checked() {
        let m = managed(Arc::new(ManualDelay::new()));
        assert!(m.acquire_lease(&[]).is_err());
        assert_eq!(m.tracked(), 0);
    }
}
