//! Cancellable delay used by the expiration reaper.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

#[async_trait]
pub trait Delay: Send + Sync + 'static {
    /// Wait for `duration`. Returns `false` when `cancel` fires first.
    async fn delay(&self, duration: Duration, cancel: CancellationToken) -> bool;
}

/// Real timer backed by `tokio::time::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioDelay;

#[async_trait]
impl Delay for TokioDelay {
    async fn delay(&self, duration: Duration, cancel: CancellationToken) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}

/// Waits that only complete when the test says so.
#[derive(Debug, Default)]
pub struct ManualDelay {
    pending: Mutex<Vec<(Duration, oneshot::Sender<()>)>>,
}

impl ManualDelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Complete every outstanding wait. Returns how many were still listening.
    pub fn elapse_all(&self) -> usize {
        let pending = std::mem::take(&mut *self.pending.lock());
        pending
            .into_iter()
            .filter(|(_, tx)| !tx.is_closed())
            .map(|(_, tx)| tx.send(()).is_ok())
            .filter(|sent| *sent)
            .count()
    }

    /// Waits started and not yet completed or cancelled.
    pub fn pending(&self) -> usize {
        self.pending
            .lock()
            .iter()
            .filter(|(_, tx)| !tx.is_closed())
            .count()
    }

    /// Durations requested by outstanding waits, oldest first.
    pub fn requested(&self) -> Vec<Duration> {
        self.pending
            .lock()
            .iter()
            .filter(|(_, tx)| !tx.is_closed())
            .map(|(d, _)| *d)
            .collect()
    }
}

#[async_trait]
impl Delay for ManualDelay {
    async fn delay(&self, duration: Duration, cancel: CancellationToken) -> bool {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().push((duration, tx));
        tokio::select! {
            _ = cancel.cancelled() => false,
            fired = rx => fired.is_ok(),
        }
    }
}
