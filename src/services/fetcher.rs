//! How the revalidation controller obtains a fresh bundle for one source.
//!
//! In-process the controller calls the [`SourceService`] directly. With
//! `API_BASE_URL` set it goes through [`SameOriginFetcher`] instead, hitting
//! the same `/api/*` endpoints a browser dashboard would.
//!
//! [`SourceService`]: crate::services::sources::SourceService

use async_trait::async_trait;

use crate::errors::UpstreamError;
use crate::models::{SourceBundle, SourceKey};
use crate::payloads::{LakeDataResponse, OutflowResponse, WeatherResponse};

#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(&self, key: SourceKey) -> Result<SourceBundle, UpstreamError>;
}

/// Fetches bundles from this service's own HTTP endpoints.
#[derive(Debug, Clone)]
pub struct SameOriginFetcher {
    client: reqwest::Client,
    base_url: String,
}

impl SameOriginFetcher {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl SourceFetcher for SameOriginFetcher {
    async fn fetch(&self, key: SourceKey) -> Result<SourceBundle, UpstreamError> {
        let url = format!("{}{}", self.base_url, key.api_path());

        // The controller bounds each attempt with its own client timeout.
        let response = self.client.get(&url).send().await.map_err(|e| {
            if e.is_decode() {
                UpstreamError::Malformed(e.to_string())
            } else {
                UpstreamError::NetworkUnavailable(e.to_string())
            }
        })?;

        if !response.status().is_success() {
            return Err(UpstreamError::Http(response.status().as_u16()));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| UpstreamError::NetworkUnavailable(e.to_string()))?;
        let malformed = |e: serde_json::Error| UpstreamError::Malformed(e.to_string());

        let bundle = match key {
            SourceKey::LakeLevel => SourceBundle::LakeLevel(
                serde_json::from_slice::<LakeDataResponse>(&body)
                    .map_err(malformed)?
                    .try_into()?,
            ),
            SourceKey::Outflow => SourceBundle::Outflow(
                serde_json::from_slice::<OutflowResponse>(&body)
                    .map_err(malformed)?
                    .try_into()?,
            ),
            SourceKey::Weather => SourceBundle::Weather(
                serde_json::from_slice::<WeatherResponse>(&body)
                    .map_err(malformed)?
                    .try_into()?,
            ),
        };
        Ok(bundle)
    }
}
