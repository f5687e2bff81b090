//! Server-side prefetch of every source into a [`FallbackSnapshot`].

use crate::errors::UpstreamError;
use crate::models::{FallbackSnapshot, SourceBundle, SourceKey};
use crate::services::sources::SourceService;

/// Resolve all sources concurrently. A failing source is `None` in the
/// snapshot; this never fails as a whole.
pub async fn prefetch_all(service: &SourceService) -> FallbackSnapshot {
    let (lake_level, outflow, weather) = futures::join!(
        service.resolve(SourceKey::LakeLevel),
        service.resolve(SourceKey::Outflow),
        service.resolve(SourceKey::Weather),
    );

    let ok = |key: SourceKey, result: Result<SourceBundle, UpstreamError>| match result {
        Ok(bundle) => Some(bundle),
        Err(e) => {
            tracing::warn!("Prefetch: {} unavailable: {}", key, e);
            None
        }
    };

    let snapshot = FallbackSnapshot::new(
        service.clock().now(),
        ok(SourceKey::LakeLevel, lake_level).and_then(SourceBundle::into_lake_level),
        ok(SourceKey::Outflow, outflow).and_then(SourceBundle::into_outflow),
        ok(SourceKey::Weather, weather).and_then(SourceBundle::into_weather),
    );

    tracing::info!(
        "Prefetch complete: {} of {} sources available",
        snapshot.available().len(),
        SourceKey::ALL.len()
    );
    snapshot
}
