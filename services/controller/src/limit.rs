//! Effective concurrency limit.
//!
//! The limit is read fresh at the start of every evaluation and sweep,
//! never cached beyond one pass. A missing or invalid limit object keeps
//! the last known-good value (initially the configured default) so an
//! operator mistake can never stall the loop.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::store::RunStore;

/// Shared read path for the cluster-wide limit.
pub struct LimitSource {
    store: Arc<dyn RunStore>,
    last_known: AtomicU32,
}

impl LimitSource {
    pub fn new(store: Arc<dyn RunStore>, default_limit: u32) -> Self {
        Self {
            store,
            last_known: AtomicU32::new(default_limit),
        }
    }

    /// The limit to apply for this pass.
    pub async fn effective(&self) -> u32 {
        match self.store.get_limit().await {
            Ok(limit) => match limit.max_concurrent() {
                Some(value) => {
                    self.last_known.store(value, Ordering::Relaxed);
                    value
                }
                None => {
                    let fallback = self.last_known.load(Ordering::Relaxed);
                    warn!(fallback, "Limit object invalid, keeping last known value");
                    fallback
                }
            },
            Err(e) => {
                let fallback = self.last_known.load(Ordering::Relaxed);
                if e.is_not_found() {
                    debug!(fallback, "Limit object absent, keeping last known value");
                } else {
                    warn!(error = %e, fallback, "Limit read failed, keeping last known value");
                }
                fallback
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FakeStore;

    #[tokio::test]
    async fn test_default_until_object_appears() {
        let store = Arc::new(FakeStore::new());
        let limits = LimitSource::new(store.clone(), 10);

        assert_eq!(limits.effective().await, 10);

        store.set_limit(3).await;
        assert_eq!(limits.effective().await, 3);
    }

    #[tokio::test]
    async fn test_last_known_survives_deletion() {
        let store = Arc::new(FakeStore::new());
        let limits = LimitSource::new(store.clone(), 10);

        store.set_limit(3).await;
        assert_eq!(limits.effective().await, 3);

        store.clear_limit().await;
        assert_eq!(limits.effective().await, 3);
    }

    #[tokio::test]
    async fn test_last_known_survives_read_failure() {
        let store = Arc::new(FakeStore::new());
        let limits = LimitSource::new(store.clone(), 10);

        store.set_limit(5).await;
        assert_eq!(limits.effective().await, 5);

        store.fail_limit_reads(true).await;
        assert_eq!(limits.effective().await, 5);
    }

    #[tokio::test]
    async fn test_zero_limit_is_ignored() {
        let store = Arc::new(FakeStore::new());
        let limits = LimitSource::new(store.clone(), 10);

        store.set_limit(0).await;
        assert_eq!(limits.effective().await, 10);
    }
}
