//! Server-side TTL cache of upstream bundles, one slot per source key.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::models::{SourceBundle, SourceKey};

#[derive(Debug, Clone)]
struct CachedBundle {
    bundle: SourceBundle,
    stored_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct ServerCache {
    slots: RwLock<HashMap<SourceKey, CachedBundle>>,
}

impl ServerCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached bundle for `key` if it was stored less than `ttl` ago.
    pub async fn get_fresh(
        &self,
        key: SourceKey,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Option<SourceBundle> {
        let slots = self.slots.read().await;
        let cached = slots.get(&key)?;
        let age = (now - cached.stored_at).to_std().unwrap_or_default();
        (age < ttl).then(|| cached.bundle.clone())
    }

    /// Store an upstream bundle. Estimated bundles are ignored.
    pub async fn put(&self, bundle: SourceBundle, now: DateTime<Utc>) {
        if bundle.is_estimated() {
            return;
        }
        self.slots.write().await.insert(
            bundle.key(),
            CachedBundle {
                bundle,
                stored_at: now,
            },
        );
    }
}
