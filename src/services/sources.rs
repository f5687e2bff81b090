//! Source resolution service.
//!
//! Wraps the three upstream adapters behind one `resolve(key)` call:
//!
//! 1. Server TTL cache hit (younger than the row's `cacheTtlMs`) → return it
//! 2. Adapter fetch bounded by `fetchTimeoutMs`; success is cached
//! 3. Failure → the row's `onFailure`: `degrade` answers with the adapter's
//!    typed fallback (never cached), `surface` returns the error
//!
//! Steps 1 and 2 alone are `fetch_upstream(key)`, which the revalidation
//! controller uses so its retries see the real upstream error. Both hold a
//! per-key lock across the cache check and the fetch, so concurrent callers
//! on a cache miss share one upstream request.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::errors::UpstreamError;
use crate::models::{SourceBundle, SourceKey};
use crate::services::adapters::UpstreamAdapter;
use crate::services::cache::ServerCache;
use crate::services::clock::Clock;
use crate::services::fetcher::SourceFetcher;
use crate::services::freshness::{FailurePolicy, PolicyTable};

/// One fetch lock per source key.
#[derive(Debug, Default)]
struct FetchLocks {
    lake_level: Mutex<()>,
    outflow: Mutex<()>,
    weather: Mutex<()>,
}

impl FetchLocks {
    fn get(&self, key: SourceKey) -> &Mutex<()> {
        match key {
            SourceKey::LakeLevel => &self.lake_level,
            SourceKey::Outflow => &self.outflow,
            SourceKey::Weather => &self.weather,
        }
    }
}

pub struct SourceService {
    lake_level: Arc<dyn UpstreamAdapter>,
    outflow: Arc<dyn UpstreamAdapter>,
    weather: Arc<dyn UpstreamAdapter>,
    policies: PolicyTable,
    cache: ServerCache,
    fetch_locks: FetchLocks,
    clock: Arc<dyn Clock>,
}

impl SourceService {
    pub fn new(
        lake_level: Arc<dyn UpstreamAdapter>,
        outflow: Arc<dyn UpstreamAdapter>,
        weather: Arc<dyn UpstreamAdapter>,
        policies: PolicyTable,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            lake_level,
            outflow,
            weather,
            policies,
            cache: ServerCache::new(),
            fetch_locks: FetchLocks::default(),
            clock,
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    fn adapter(&self, key: SourceKey) -> &Arc<dyn UpstreamAdapter> {
        match key {
            SourceKey::LakeLevel => &self.lake_level,
            SourceKey::Outflow => &self.outflow,
            SourceKey::Weather => &self.weather,
        }
    }

    /// Cached or freshly fetched upstream data. Never degrades.
    ///
    /// A caller waiting on the lock re-checks the cache, so it sees the bundle
    /// the previous holder stored. Failures are not cached; the next waiter
    /// tries the upstream itself.
    pub async fn fetch_upstream(&self, key: SourceKey) -> Result<SourceBundle, UpstreamError> {
        let policy = self.policies.get(key);
        let _guard = self.fetch_locks.get(key).lock().await;

        if let Some(cached) = self
            .cache
            .get_fresh(key, policy.cache_ttl(), self.clock.now())
            .await
        {
            tracing::debug!("{}: served from server cache", key);
            return Ok(cached);
        }

        let timeout = policy.fetch_timeout();
        let bundle = match tokio::time::timeout(timeout, self.adapter(key).fetch(timeout)).await {
            Ok(result) => result?,
            Err(_) => return Err(UpstreamError::Timeout(timeout)),
        };
        self.cache.put(bundle.clone(), self.clock.now()).await;
        Ok(bundle)
    }

    /// Resolve one source, applying cache, timeout and failure policy.
    pub async fn resolve(&self, key: SourceKey) -> Result<SourceBundle, UpstreamError> {
        match self.fetch_upstream(key).await {
            Ok(bundle) => Ok(bundle),
            Err(e) => match self.policies.get(key).on_failure {
                FailurePolicy::Degrade => {
                    tracing::warn!("{}: upstream failed ({}), serving fallback", key, e);
                    Ok(self.adapter(key).fallback(self.clock.now()))
                }
                FailurePolicy::Surface => {
                    tracing::warn!("{}: upstream failed ({})", key, e);
                    Err(e)
                }
            },
        }
    }
}

#[async_trait]
impl SourceFetcher for SourceService {
    async fn fetch(&self, key: SourceKey) -> Result<SourceBundle, UpstreamError> {
        self.fetch_upstream(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::clock::ManualClock;
    use crate::services::freshness::FRESHNESS_POLICIES;
    use crate::services::testing::{sample_bundle, FakeAdapter};
    use std::time::Duration;

    fn start() -> chrono::DateTime<chrono::Utc> {
        "2026-06-01T12:00:00Z".parse().unwrap()
    }

    struct Fixture {
        service: SourceService,
        lake: Arc<FakeAdapter>,
        outflow: Arc<FakeAdapter>,
        weather: Arc<FakeAdapter>,
        clock: Arc<ManualClock>,
    }

    fn fixture(policies: PolicyTable) -> Fixture {
        let lake = Arc::new(FakeAdapter::new(SourceKey::LakeLevel));
        let outflow = Arc::new(FakeAdapter::new(SourceKey::Outflow));
        let weather = Arc::new(FakeAdapter::new(SourceKey::Weather));
        let clock = Arc::new(ManualClock::new(start()));
        let service = SourceService::new(
            lake.clone(),
            outflow.clone(),
            weather.clone(),
            policies,
            clock.clone(),
        );
        Fixture {
            service,
            lake,
            outflow,
            weather,
            clock,
        }
    }

    #[tokio::test]
    async fn test_degrade_serves_fallback_on_failure() {
        let f = fixture(FRESHNESS_POLICIES);
        f.lake.push(Err(UpstreamError::Http(503)));

        let bundle = f.service.resolve(SourceKey::LakeLevel).await.unwrap();
        let lake = bundle.into_lake_level().unwrap();
        assert!(lake.estimated);
        assert_eq!(lake.level.value, Some(545.0));
    }

    #[tokio::test]
    async fn test_surface_returns_error() {
        let f = fixture(FRESHNESS_POLICIES);
        f.weather.push(Err(UpstreamError::Http(500)));

        let err = f.service.resolve(SourceKey::Weather).await.unwrap_err();
        assert_eq!(err, UpstreamError::Http(500));
    }

    #[tokio::test]
    async fn test_success_is_cached_for_cache_ttl() {
        let f = fixture(FRESHNESS_POLICIES);
        f.outflow.push(Ok(sample_bundle(SourceKey::Outflow, start(), 1200.0)));
        f.outflow.push(Ok(sample_bundle(SourceKey::Outflow, start(), 1300.0)));

        let first = f.service.resolve(SourceKey::Outflow).await.unwrap();
        f.clock.advance(Duration::from_secs(23 * 3600));
        let second = f.service.resolve(SourceKey::Outflow).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(f.outflow.calls(), 1);

        // Cache window is 24h for outflow, not the 60 min poll interval.
        f.clock.advance(Duration::from_secs(3600));
        let third = f.service.resolve(SourceKey::Outflow).await.unwrap();
        assert_eq!(f.outflow.calls(), 2);
        assert_ne!(first, third);
    }

    #[tokio::test]
    async fn test_fallback_is_not_cached() {
        let f = fixture(FRESHNESS_POLICIES);
        f.outflow.push(Err(UpstreamError::Http(502)));
        f.outflow.push(Ok(sample_bundle(SourceKey::Outflow, start(), 1100.0)));

        let degraded = f.service.resolve(SourceKey::Outflow).await.unwrap();
        assert!(degraded.is_estimated());
        let fresh = f.service.resolve(SourceKey::Outflow).await.unwrap();
        assert!(!fresh.is_estimated());
        assert_eq!(f.outflow.calls(), 2);
    }

    #[tokio::test]
    async fn test_slow_adapter_times_out() {
        let mut policies = FRESHNESS_POLICIES;
        policies.weather.fetch_timeout_ms = 100;
        let f = fixture(policies);
        f.weather.set_delay(Duration::from_secs(2));
        f.weather.push(Ok(sample_bundle(SourceKey::Weather, start(), 80.0)));

        let err = f.service.resolve(SourceKey::Weather).await.unwrap_err();
        assert_eq!(err, UpstreamError::Timeout(Duration::from_millis(100)));
    }

    #[tokio::test]
    async fn test_fetch_upstream_does_not_degrade() {
        let f = fixture(FRESHNESS_POLICIES);
        f.lake.push(Err(UpstreamError::Http(503)));

        let err = f.service.fetch_upstream(SourceKey::LakeLevel).await.unwrap_err();
        assert_eq!(err, UpstreamError::Http(503));

        // The controller's fetch path is the undegraded one.
        f.lake
            .push(Err(UpstreamError::NetworkUnavailable("connection reset".into())));
        let err = SourceFetcher::fetch(&f.service, SourceKey::LakeLevel)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            UpstreamError::NetworkUnavailable("connection reset".into())
        );
    }

    #[tokio::test]
    async fn test_concurrent_misses_share_one_upstream_call() {
        let f = fixture(FRESHNESS_POLICIES);
        f.outflow.set_delay(Duration::from_millis(100));
        f.outflow.push(Ok(sample_bundle(SourceKey::Outflow, start(), 1400.0)));

        let results = futures::future::join_all(
            (0..5).map(|_| f.service.resolve(SourceKey::Outflow)),
        )
        .await;

        assert_eq!(f.outflow.calls(), 1);
        for result in results {
            let bundle = result.unwrap();
            assert!(!bundle.is_estimated());
            assert_eq!(bundle, sample_bundle(SourceKey::Outflow, start(), 1400.0));
        }
    }
}
