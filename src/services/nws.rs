//! weather.gov (National Weather Service) forecast client.
//!
//! Forecasts are a two-step lookup: `points/{lat},{lon}` resolves the grid
//! forecast URL for a location, then that URL returns the forecast periods.
//! See: https://www.weather.gov/documentation/services-web-api

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::ACCEPT;
use serde::Deserialize;
use tokio::sync::RwLock;

use crate::errors::UpstreamError;
use crate::helpers::celsius_to_fahrenheit;

/// Barren River Lake dam area.
pub const LAKE_LATITUDE: f64 = 36.89;
pub const LAKE_LONGITUDE: f64 = -86.12;

/// How long a resolved grid forecast URL is reused. Grid assignments change
/// rarely, so this is much longer than the forecast refresh.
const POINTS_CACHE_HOURS: i64 = 6;

const GEOJSON: &str = "application/geo+json";

/// One forecast period, temperatures already in °F.
#[derive(Debug, Clone, PartialEq)]
pub struct NwsPeriod {
    pub name: String,
    pub temperature_f: Option<f64>,
    pub wind_speed: Option<String>,
    pub wind_direction: Option<String>,
    pub short_forecast: Option<String>,
}

// --- weather.gov JSON response types ---

#[derive(Debug, Deserialize)]
struct PointsResponse {
    properties: Option<PointsProperties>,
}

#[derive(Debug, Deserialize)]
struct PointsProperties {
    forecast: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    properties: Option<ForecastProperties>,
}

#[derive(Debug, Deserialize)]
struct ForecastProperties {
    periods: Option<Vec<RawPeriod>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPeriod {
    name: Option<String>,
    temperature: Option<f64>,
    temperature_unit: Option<String>,
    wind_speed: Option<String>,
    wind_direction: Option<String>,
    short_forecast: Option<String>,
}

#[derive(Debug, Clone)]
struct CachedForecastUrl {
    url: String,
    resolved_at: DateTime<Utc>,
}

/// Client for api.weather.gov.
#[derive(Debug, Clone)]
pub struct NwsClient {
    client: reqwest::Client,
    base_url: String,
    forecast_url: Arc<RwLock<Option<CachedForecastUrl>>>,
}

impl NwsClient {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            forecast_url: Arc::new(RwLock::new(None)),
        }
    }

    /// Fetch forecast periods for a location, first period = current conditions.
    pub async fn fetch_forecast(
        &self,
        lat: f64,
        lon: f64,
        timeout: Duration,
    ) -> Result<Vec<NwsPeriod>, UpstreamError> {
        let forecast_url = self.resolve_forecast_url(lat, lon, timeout).await?;

        let response = self
            .client
            .get(&forecast_url)
            .header(ACCEPT, GEOJSON)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| UpstreamError::from_reqwest(e, timeout))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            if status == 404 {
                // Grid reassigned; resolve again next time.
                self.forecast_url.write().await.take();
            }
            return Err(UpstreamError::Http(status));
        }

        let body: ForecastResponse = response
            .json()
            .await
            .map_err(|e| UpstreamError::from_reqwest(e, timeout))?;

        let periods = body
            .properties
            .and_then(|p| p.periods)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| {
                UpstreamError::Malformed("weather.gov forecast has no periods".to_string())
            })?;

        Ok(periods.into_iter().map(normalize_period).collect())
    }

    /// Resolve (or reuse) the grid forecast URL for a location.
    async fn resolve_forecast_url(
        &self,
        lat: f64,
        lon: f64,
        timeout: Duration,
    ) -> Result<String, UpstreamError> {
        if let Some(cached) = self.forecast_url.read().await.as_ref() {
            if Utc::now() - cached.resolved_at < chrono::Duration::hours(POINTS_CACHE_HOURS) {
                return Ok(cached.url.clone());
            }
        }

        let url = format!("{}/points/{},{}", self.base_url, lat, lon);
        tracing::debug!("weather.gov points lookup: {}", url);

        let response = self
            .client
            .get(&url)
            .header(ACCEPT, GEOJSON)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| UpstreamError::from_reqwest(e, timeout))?;

        if !response.status().is_success() {
            return Err(UpstreamError::Http(response.status().as_u16()));
        }

        let body: PointsResponse = response
            .json()
            .await
            .map_err(|e| UpstreamError::from_reqwest(e, timeout))?;

        let forecast_url = body
            .properties
            .and_then(|p| p.forecast)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| {
                UpstreamError::Malformed("weather.gov points response has no forecast URL".into())
            })?;

        *self.forecast_url.write().await = Some(CachedForecastUrl {
            url: forecast_url.clone(),
            resolved_at: Utc::now(),
        });

        Ok(forecast_url)
    }
}

fn normalize_period(raw: RawPeriod) -> NwsPeriod {
    let celsius = raw
        .temperature_unit
        .as_deref()
        .is_some_and(|u| u.eq_ignore_ascii_case("C"));
    let temperature_f = raw
        .temperature
        .filter(|t| t.is_finite())
        .map(|t| if celsius { celsius_to_fahrenheit(t) } else { t });

    NwsPeriod {
        name: raw.name.unwrap_or_default(),
        temperature_f,
        wind_speed: raw.wind_speed,
        wind_direction: raw.wind_direction,
        short_forecast: raw.short_forecast,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const BUDGET: Duration = Duration::from_secs(5);

    fn points_body(server: &MockServer) -> serde_json::Value {
        json!({
            "properties": {
                "forecast": format!("{}/gridpoints/LMK/40,12/forecast", server.uri())
            }
        })
    }

    fn forecast_body() -> serde_json::Value {
        json!({
            "properties": {
                "periods": [
                    { "name": "This Afternoon", "temperature": 84, "temperatureUnit": "F",
                      "windSpeed": "5 to 10 mph", "windDirection": "SW", "shortForecast": "Sunny" },
                    { "name": "Tonight", "temperature": 20, "temperatureUnit": "C",
                      "windSpeed": "5 mph", "windDirection": "S", "shortForecast": "Clear" }
                ]
            }
        })
    }

    #[test]
    fn test_normalize_period_converts_celsius() {
        let period = normalize_period(RawPeriod {
            name: Some("Tonight".into()),
            temperature: Some(20.0),
            temperature_unit: Some("C".into()),
            wind_speed: None,
            wind_direction: None,
            short_forecast: None,
        });
        assert_eq!(period.temperature_f, Some(68.0));
    }

    #[test]
    fn test_normalize_period_keeps_fahrenheit() {
        let period = normalize_period(RawPeriod {
            name: None,
            temperature: Some(84.0),
            temperature_unit: Some("F".into()),
            wind_speed: Some("5 mph".into()),
            wind_direction: Some("SW".into()),
            short_forecast: Some("Sunny".into()),
        });
        assert_eq!(period.temperature_f, Some(84.0));
        assert_eq!(period.name, "");
    }

    #[tokio::test]
    async fn test_fetch_forecast_two_step() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/points/36.89,-86.12"))
            .respond_with(ResponseTemplate::new(200).set_body_json(points_body(&server)))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/gridpoints/LMK/40,12/forecast"))
            .respond_with(ResponseTemplate::new(200).set_body_json(forecast_body()))
            .expect(2)
            .mount(&server)
            .await;

        let client = NwsClient::new(reqwest::Client::new(), &server.uri());
        let periods = client
            .fetch_forecast(LAKE_LATITUDE, LAKE_LONGITUDE, BUDGET)
            .await
            .unwrap();
        assert_eq!(periods.len(), 2);
        assert_eq!(periods[0].temperature_f, Some(84.0));
        assert_eq!(periods[1].temperature_f, Some(68.0));

        // Second call reuses the resolved grid URL (points expected once).
        client
            .fetch_forecast(LAKE_LATITUDE, LAKE_LONGITUDE, BUDGET)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_points_failure_is_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/points/36.89,-86.12"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = NwsClient::new(reqwest::Client::new(), &server.uri());
        let err = client
            .fetch_forecast(LAKE_LATITUDE, LAKE_LONGITUDE, BUDGET)
            .await
            .unwrap_err();
        assert_eq!(err, UpstreamError::Http(500));
    }

    #[tokio::test]
    async fn test_points_without_forecast_url_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/points/36.89,-86.12"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "properties": {} })))
            .mount(&server)
            .await;

        let client = NwsClient::new(reqwest::Client::new(), &server.uri());
        let err = client
            .fetch_forecast(LAKE_LATITUDE, LAKE_LONGITUDE, BUDGET)
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_empty_periods_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/points/36.89,-86.12"))
            .respond_with(ResponseTemplate::new(200).set_body_json(points_body(&server)))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/gridpoints/LMK/40,12/forecast"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "properties": { "periods": [] } })),
            )
            .mount(&server)
            .await;

        let client = NwsClient::new(reqwest::Client::new(), &server.uri());
        let err = client
            .fetch_forecast(LAKE_LATITUDE, LAKE_LONGITUDE, BUDGET)
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_forecast_404_drops_cached_grid() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/points/36.89,-86.12"))
            .respond_with(ResponseTemplate::new(200).set_body_json(points_body(&server)))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/gridpoints/LMK/40,12/forecast"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = NwsClient::new(reqwest::Client::new(), &server.uri());
        for _ in 0..2 {
            let err = client
                .fetch_forecast(LAKE_LATITUDE, LAKE_LONGITUDE, BUDGET)
                .await
                .unwrap_err();
            assert_eq!(err, UpstreamError::Http(404));
        }
    }
}
