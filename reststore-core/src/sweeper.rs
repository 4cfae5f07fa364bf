//! Bounded purge of expired resources.
//!
//! A sweep runs in batches of at most `bulk_size` entries, yields to the
//! runtime between batches, and stops once a batch finds nothing or the
//! budget is spent. The remaining count tells the caller whether another
//! sweep is worth it.

use crate::clock::Clock;
use crate::config::StorageConfig;
use crate::scripts::{ScriptCall, ScriptKind, ScriptManager};
use crate::{RestStoreError, Result};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::interval;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub cleaned: u64,
    pub remaining: u64,
}

pub struct ExpirationSweeper {
    scripts: Arc<ScriptManager>,
    config: Arc<StorageConfig>,
    clock: Arc<dyn Clock>,
}

impl ExpirationSweeper {
    pub fn new(
        scripts: Arc<ScriptManager>,
        config: Arc<StorageConfig>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            scripts,
            config,
            clock,
        }
    }

    pub async fn cleanup(&self, max_to_clean: u64, bulk_size: u64) -> Result<CleanupReport> {
        let mut cleaned = 0u64;

        while cleaned < max_to_clean {
            let batch = bulk_size.min(max_to_clean - cleaned);
            let call = ScriptCall::new(ScriptKind::Cleanup, &self.config, self.clock.now_millis())
                .arg(batch.to_string());
            let reply = self.scripts.execute(&call).await?;
            let swept = reply
                .as_int()
                .and_then(|count| u64::try_from(count).ok())
                .ok_or_else(|| RestStoreError::UnexpectedReply(reply.describe()))?;

            cleaned += swept;
            if swept == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }

        let remaining = self
            .scripts
            .store()
            .count_by_score(&self.config.expirable_prefix, 0, self.clock.now_millis())
            .await
            .map_err(|error| RestStoreError::BackendUnavailable(error.to_string()))?;

        tracing::debug!("cleanup finished cleaned={} remaining={}", cleaned, remaining);
        Ok(CleanupReport { cleaned, remaining })
    }

    /// One sweep with the configured budget.
    pub async fn run_once(&self) -> Result<CleanupReport> {
        self.cleanup(
            self.config.resource_cleanup_amount,
            self.config.cleanup_bulk_size,
        )
        .await
    }

    pub fn start(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(every);
            loop {
                ticker.tick().await;
                match self.run_once().await {
                    Ok(report) if report.cleaned > 0 || report.remaining > 0 => {
                        tracing::info!(
                            "expired resources swept cleaned={} remaining={}",
                            report.cleaned,
                            report.remaining
                        );
                    }
                    Ok(_) => {}
                    Err(error) => {
                        tracing::warn!("expiration sweep failed: {}", error);
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::operations::{PutResourceOperation, PutResourceOperationRequest};
    use crate::store::MemoryScriptStore;
    use crate::{CompressionPool, LockManager};

    struct Fixture {
        clock: Arc<ManualClock>,
        put: PutResourceOperation,
        sweeper: Arc<ExpirationSweeper>,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(10_000));
        let store = Arc::new(MemoryScriptStore::new());
        let scripts = Arc::new(ScriptManager::new(store, 10));
        let config = Arc::new(StorageConfig::default());
        let locks = Arc::new(LockManager::new(
            scripts.clone(),
            config.clone(),
            clock.clone(),
        ));
        let put = PutResourceOperation::new(
            scripts.clone(),
            locks,
            config.clone(),
            clock.clone(),
            Arc::new(CompressionPool::new(1)),
        );
        let sweeper = Arc::new(ExpirationSweeper::new(scripts, config, clock.clone()));
        Fixture {
            clock,
            put,
            sweeper,
        }
    }

    async fn put_expiring(fixture: &Fixture, path: &str, ttl: Duration) {
        let mut request = PutResourceOperationRequest::new(path, "{}");
        request.expire_after = Some(ttl);
        fixture.put.run(request).await.unwrap();
    }

    #[tokio::test]
    async fn budget_bounds_each_sweep() {
        let fixture = fixture();
        for index in 0..7 {
            put_expiring(&fixture, &format!("/batch/item{}", index), Duration::from_secs(1)).await;
        }
        fixture.clock.advance(Duration::from_secs(2));

        let first = fixture.sweeper.cleanup(3, 2).await.unwrap();
        assert_eq!(first, CleanupReport { cleaned: 3, remaining: 4 });

        let second = fixture.sweeper.cleanup(3, 2).await.unwrap();
        assert_eq!(second, CleanupReport { cleaned: 3, remaining: 1 });

        let third = fixture.sweeper.cleanup(3, 2).await.unwrap();
        assert_eq!(third, CleanupReport { cleaned: 1, remaining: 0 });

        let idle = fixture.sweeper.cleanup(3, 2).await.unwrap();
        assert_eq!(idle, CleanupReport { cleaned: 0, remaining: 0 });
    }

    #[tokio::test]
    async fn live_resources_are_left_alone() {
        let fixture = fixture();
        put_expiring(&fixture, "/mixed/short", Duration::from_secs(1)).await;
        put_expiring(&fixture, "/mixed/long", Duration::from_secs(60)).await;
        fixture
            .put
            .run(PutResourceOperationRequest::new("/mixed/forever", "{}"))
            .await
            .unwrap();
        fixture.clock.advance(Duration::from_secs(5));

        let report = fixture.sweeper.run_once().await.unwrap();
        assert_eq!(report, CleanupReport { cleaned: 1, remaining: 0 });
    }

    #[tokio::test]
    async fn background_loop_sweeps() {
        let fixture = fixture();
        put_expiring(&fixture, "/loop/doc", Duration::from_secs(1)).await;
        fixture.clock.advance(Duration::from_secs(2));

        let handle = fixture.sweeper.clone().start(Duration::from_millis(10));
        let mut remaining = 1;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            remaining = fixture
                .sweeper
                .cleanup(0, 1)
                .await
                .unwrap()
                .remaining;
            if remaining == 0 {
                break;
            }
        }
        handle.abort();
        assert_eq!(remaining, 0);
    }
}
