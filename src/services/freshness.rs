//! Per-source freshness policy table.
//!
//! Each upstream source changes at its own natural rate (weather forecasts
//! refresh every few minutes, lake telemetry roughly every 15 minutes, the
//! projected outflow once a day), so polling, caching and retry behaviour is
//! configured per source key instead of globally.
//!
//! The compiled-in table can be overridden row by row from a JSON file:
//!
//! ```json
//! { "outflow": { "pollIntervalMs": 1800000, "maxRetries": 1 } }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::SourceKey;

/// What the source service does when an adapter fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Answer with the adapter's typed fallback bundle.
    Degrade,
    /// Propagate the error to the caller.
    Surface,
}

/// One row of the freshness table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FreshnessPolicy {
    /// Revalidate this long after the previous fetch settled.
    pub poll_interval_ms: u64,
    /// Minimum spacing between two triggered fetch starts.
    pub dedup_window_ms: u64,
    pub revalidate_on_focus: bool,
    pub revalidate_on_reconnect: bool,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    /// Server-side cache window for upstream responses.
    pub cache_ttl_ms: u64,
    /// Budget for one upstream adapter call (all chained requests).
    pub fetch_timeout_ms: u64,
    /// Budget for one revalidation attempt by the controller.
    pub client_timeout_ms: u64,
    pub on_failure: FailurePolicy,
}

impl FreshnessPolicy {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn dedup_window(&self) -> Duration {
        Duration::from_millis(self.dedup_window_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_millis(self.client_timeout_ms)
    }
}

const SECOND_MS: u64 = 1_000;
const MINUTE_MS: u64 = 60 * SECOND_MS;
const HOUR_MS: u64 = 60 * MINUTE_MS;

/// Lake telemetry: sub-hourly.
pub const LAKE_LEVEL_POLICY: FreshnessPolicy = FreshnessPolicy {
    poll_interval_ms: 15 * MINUTE_MS,
    dedup_window_ms: 5 * SECOND_MS,
    revalidate_on_focus: true,
    revalidate_on_reconnect: true,
    max_retries: 3,
    retry_backoff_ms: 5 * SECOND_MS,
    cache_ttl_ms: 15 * MINUTE_MS,
    fetch_timeout_ms: 10 * SECOND_MS,
    client_timeout_ms: 15 * SECOND_MS,
    on_failure: FailurePolicy::Degrade,
};

/// Projected 6am discharge: published once a day.
pub const OUTFLOW_POLICY: FreshnessPolicy = FreshnessPolicy {
    poll_interval_ms: HOUR_MS,
    dedup_window_ms: MINUTE_MS,
    revalidate_on_focus: false,
    revalidate_on_reconnect: true,
    max_retries: 2,
    retry_backoff_ms: 5 * SECOND_MS,
    cache_ttl_ms: 24 * HOUR_MS,
    fetch_timeout_ms: 15 * SECOND_MS,
    client_timeout_ms: 15 * SECOND_MS,
    on_failure: FailurePolicy::Degrade,
};

/// Forecasts: refreshed every few minutes upstream.
pub const WEATHER_POLICY: FreshnessPolicy = FreshnessPolicy {
    poll_interval_ms: 10 * MINUTE_MS,
    dedup_window_ms: 5 * SECOND_MS,
    revalidate_on_focus: true,
    revalidate_on_reconnect: true,
    max_retries: 3,
    retry_backoff_ms: 5 * SECOND_MS,
    cache_ttl_ms: 10 * MINUTE_MS,
    fetch_timeout_ms: 10 * SECOND_MS,
    client_timeout_ms: 15 * SECOND_MS,
    on_failure: FailurePolicy::Surface,
};

/// The full table, one row per [`SourceKey`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub struct PolicyTable {
    pub lake_level: FreshnessPolicy,
    pub outflow: FreshnessPolicy,
    pub weather: FreshnessPolicy,
}

pub const FRESHNESS_POLICIES: PolicyTable = PolicyTable {
    lake_level: LAKE_LEVEL_POLICY,
    outflow: OUTFLOW_POLICY,
    weather: WEATHER_POLICY,
};

impl Default for PolicyTable {
    fn default() -> Self {
        FRESHNESS_POLICIES
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PolicyLoadError {
    #[error("failed to read policy file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse policy file {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
}

/// Partial row used by override files; unset fields keep the table value.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct PolicyOverride {
    poll_interval_ms: Option<u64>,
    dedup_window_ms: Option<u64>,
    revalidate_on_focus: Option<bool>,
    revalidate_on_reconnect: Option<bool>,
    max_retries: Option<u32>,
    retry_backoff_ms: Option<u64>,
    cache_ttl_ms: Option<u64>,
    fetch_timeout_ms: Option<u64>,
    client_timeout_ms: Option<u64>,
    on_failure: Option<FailurePolicy>,
}

impl PolicyOverride {
    fn apply(self, base: FreshnessPolicy) -> FreshnessPolicy {
        FreshnessPolicy {
            poll_interval_ms: self.poll_interval_ms.unwrap_or(base.poll_interval_ms),
            dedup_window_ms: self.dedup_window_ms.unwrap_or(base.dedup_window_ms),
            revalidate_on_focus: self.revalidate_on_focus.unwrap_or(base.revalidate_on_focus),
            revalidate_on_reconnect: self
                .revalidate_on_reconnect
                .unwrap_or(base.revalidate_on_reconnect),
            max_retries: self.max_retries.unwrap_or(base.max_retries),
            retry_backoff_ms: self.retry_backoff_ms.unwrap_or(base.retry_backoff_ms),
            cache_ttl_ms: self.cache_ttl_ms.unwrap_or(base.cache_ttl_ms),
            fetch_timeout_ms: self.fetch_timeout_ms.unwrap_or(base.fetch_timeout_ms),
            client_timeout_ms: self.client_timeout_ms.unwrap_or(base.client_timeout_ms),
            on_failure: self.on_failure.unwrap_or(base.on_failure),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct TableOverride {
    #[serde(default)]
    lake_level: Option<PolicyOverride>,
    #[serde(default)]
    outflow: Option<PolicyOverride>,
    #[serde(default)]
    weather: Option<PolicyOverride>,
}

impl PolicyTable {
    pub fn get(&self, key: SourceKey) -> &FreshnessPolicy {
        match key {
            SourceKey::LakeLevel => &self.lake_level,
            SourceKey::Outflow => &self.outflow,
            SourceKey::Weather => &self.weather,
        }
    }

    /// Apply a JSON override document on top of this table.
    pub fn with_overrides_json(self, json: &str) -> Result<Self, serde_json::Error> {
        let overrides: TableOverride = serde_json::from_str(json)?;
        Ok(Self {
            lake_level: overrides
                .lake_level
                .map(|o| o.apply(self.lake_level))
                .unwrap_or(self.lake_level),
            outflow: overrides
                .outflow
                .map(|o| o.apply(self.outflow))
                .unwrap_or(self.outflow),
            weather: overrides
                .weather
                .map(|o| o.apply(self.weather))
                .unwrap_or(self.weather),
        })
    }

    /// Load the compiled-in table, optionally overridden from a file.
    pub fn load(path: Option<&Path>) -> Result<Self, PolicyLoadError> {
        let Some(path) = path else {
            return Ok(FRESHNESS_POLICIES);
        };
        let display = path.display().to_string();
        let raw = std::fs::read_to_string(path).map_err(|source| PolicyLoadError::Io {
            path: display.clone(),
            source,
        })?;
        FRESHNESS_POLICIES
            .with_overrides_json(&raw)
            .map_err(|source| PolicyLoadError::Parse {
                path: display,
                source,
            })
    }
}
