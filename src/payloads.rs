//! Wire shapes of the `/api/lake-data`, `/api/outflow` and `/api/weather`
//! endpoints.
//!
//! The same types are used to serve a bundle and, when the controller
//! revalidates through the service's own base URL, to read it back.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::errors::UpstreamError;
use crate::helpers::{iso8601, parse_iso8601};
use crate::models::{ForecastPeriod, LakeLevelBundle, Observation, OutflowBundle, WeatherBundle};

/// Lake conditions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LakeDataResponse {
    /// Pool elevation in feet
    pub level: Option<f64>,
    /// Hourly average inflow in cfs
    #[serde(default)]
    pub inflow: Option<f64>,
    /// Hourly average outflow in cfs
    #[serde(default)]
    pub outflow: Option<f64>,
    /// Water temperature in °F
    pub water_temp: Option<f64>,
    /// 24-hour rainfall in inches
    #[serde(rename = "rain24h")]
    pub rain_24h: Option<f64>,
    /// ISO 8601 timestamp of the newest reading
    pub last_updated: String,
    /// True when the values are estimates because the upstream failed
    #[serde(default)]
    pub estimated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Projected daily discharge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OutflowResponse {
    /// Discharge in cfs
    pub outflow: Option<f64>,
    pub last_updated: String,
    pub note: String,
    #[serde(default)]
    pub estimated: bool,
}

/// Current conditions and the next three forecast periods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WeatherResponse {
    /// Air temperature in °F
    pub temperature: Option<f64>,
    pub wind_speed: Option<String>,
    pub wind_direction: Option<String>,
    pub short_forecast: Option<String>,
    #[serde(default)]
    pub forecast: Vec<ForecastPeriod>,
    pub last_updated: String,
    #[serde(default)]
    pub estimated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

fn parse_last_updated(s: &str) -> Result<chrono::DateTime<chrono::Utc>, UpstreamError> {
    parse_iso8601(s).ok_or_else(|| UpstreamError::Malformed(format!("invalid lastUpdated '{}'", s)))
}

// --- bundle -> wire ---

impl From<&LakeLevelBundle> for LakeDataResponse {
    fn from(b: &LakeLevelBundle) -> Self {
        Self {
            level: b.level.value,
            inflow: b.inflow.value,
            outflow: b.outflow.value,
            water_temp: b.water_temp.value,
            rain_24h: b.rain_24h.value,
            last_updated: iso8601(b.last_updated),
            estimated: b.estimated,
            note: b.note.clone(),
        }
    }
}

impl From<&OutflowBundle> for OutflowResponse {
    fn from(b: &OutflowBundle) -> Self {
        Self {
            outflow: b.discharge.value,
            last_updated: iso8601(b.last_updated),
            note: b.note.clone(),
            estimated: b.estimated,
        }
    }
}

impl From<&WeatherBundle> for WeatherResponse {
    fn from(b: &WeatherBundle) -> Self {
        Self {
            temperature: b.temperature.value,
            wind_speed: b.wind_speed.value.clone(),
            wind_direction: b.wind_direction.value.clone(),
            short_forecast: b.short_forecast.value.clone(),
            forecast: b.forecast.clone(),
            last_updated: iso8601(b.last_updated),
            estimated: b.estimated,
            note: b.note.clone(),
        }
    }
}

// --- wire -> bundle ---
//
// Per-observation timestamps are not on the wire; every observation takes
// the payload's `lastUpdated`.

impl TryFrom<LakeDataResponse> for LakeLevelBundle {
    type Error = UpstreamError;

    fn try_from(r: LakeDataResponse) -> Result<Self, Self::Error> {
        let at = parse_last_updated(&r.last_updated)?;
        Ok(Self {
            level: Observation::new(r.level, at),
            inflow: Observation::new(r.inflow, at),
            outflow: Observation::new(r.outflow, at),
            water_temp: Observation::new(r.water_temp, at),
            rain_24h: Observation::new(r.rain_24h, at),
            last_updated: at,
            estimated: r.estimated,
            note: r.note,
        })
    }
}

impl TryFrom<OutflowResponse> for OutflowBundle {
    type Error = UpstreamError;

    fn try_from(r: OutflowResponse) -> Result<Self, Self::Error> {
        let at = parse_last_updated(&r.last_updated)?;
        Ok(Self {
            discharge: Observation::new(r.outflow, at),
            last_updated: at,
            estimated: r.estimated,
            note: r.note,
        })
    }
}

impl TryFrom<WeatherResponse> for WeatherBundle {
    type Error = UpstreamError;

    fn try_from(r: WeatherResponse) -> Result<Self, Self::Error> {
        let at = parse_last_updated(&r.last_updated)?;
        Ok(Self {
            temperature: Observation::new(r.temperature, at),
            wind_speed: Observation::new(r.wind_speed, at),
            wind_direction: Observation::new(r.wind_direction, at),
            short_forecast: Observation::new(r.short_forecast, at),
            forecast: r.forecast,
            last_updated: at,
            estimated: r.estimated,
            note: r.note,
        })
    }
}
