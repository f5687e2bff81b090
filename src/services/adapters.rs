//! Upstream adapters: one per source key.
//!
//! Every adapter normalizes its upstream into a [`SourceBundle`] and returns
//! `Err(UpstreamError)` on any failure. Adapters never decide whether to
//! degrade; they only know what their typed fallback looks like. The
//! [`SourceService`](crate::services::sources::SourceService) applies the
//! policy uniformly.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::UpstreamError;
use crate::models::{
    ForecastPeriod, LakeLevelBundle, Observation, OutflowBundle, SourceBundle, WeatherBundle,
};
use crate::services::cwms::{
    current_operations_day, CwmsClient, RecentValue, INFLOW_TS, LEVEL_TS, OUTFLOW_HOURLY_TS,
    PRECIP_24H_TS, PROJECTED_OUTFLOW_TS, WATER_TEMP_TS,
};
use crate::services::nws::{NwsClient, NwsPeriod, LAKE_LATITUDE, LAKE_LONGITUDE};

// ---------------------------------------------------------------------------
// Fallback values
// ---------------------------------------------------------------------------

/// Typical summer pool elevation (ft).
pub const FALLBACK_LEVEL_FT: f64 = 545.0;
pub const FALLBACK_WATER_TEMP_F: f64 = 72.0;
pub const FALLBACK_RAIN_24H_IN: f64 = 0.0;
pub const FALLBACK_LAKE_NOTE: &str = "Estimated lake conditions (data unavailable)";

/// Typical daily release (cfs).
pub const FALLBACK_DISCHARGE_CFS: f64 = 850.0;
pub const FALLBACK_OUTFLOW_NOTE: &str = "Estimated discharge rate (data unavailable)";
pub const PROJECTED_OUTFLOW_NOTE: &str = "Projected 6am discharge rate";

pub const FALLBACK_AIR_TEMP_F: f64 = 65.0;
pub const FALLBACK_WEATHER_NOTE: &str = "Forecast unavailable";

/// Number of forecast periods after the current one.
const FORECAST_PERIODS: usize = 3;

// ---------------------------------------------------------------------------
// Adapter contract
// ---------------------------------------------------------------------------

#[async_trait]
pub trait UpstreamAdapter: Send + Sync {
    /// Fetch and normalize. `timeout` bounds each chained request.
    async fn fetch(&self, timeout: Duration) -> Result<SourceBundle, UpstreamError>;

    /// Plausible estimated bundle used when the source is degraded.
    fn fallback(&self, now: DateTime<Utc>) -> SourceBundle;
}

// ---------------------------------------------------------------------------
// Lake level (CWMS recent)
// ---------------------------------------------------------------------------

/// Series the lake-level source cannot do without.
const LAKE_CORE_IDS: [&str; 3] = [LEVEL_TS, INFLOW_TS, OUTFLOW_HOURLY_TS];

/// Best-effort series, requested separately so a rejected ID cannot fail the
/// level read.
const LAKE_EXTRA_IDS: [&str; 2] = [WATER_TEMP_TS, PRECIP_24H_TS];

pub struct LakeLevelAdapter {
    cwms: CwmsClient,
}

impl LakeLevelAdapter {
    pub fn new(cwms: CwmsClient) -> Self {
        Self { cwms }
    }
}

/// Map one `recent` value to an observation, falling back to the request time
/// when the upstream omits the timestamp.
fn recent_observation(value: Option<&RecentValue>, now: DateTime<Utc>) -> Observation<f64> {
    match value {
        Some(v) => Observation::new(v.value, v.observed_at.unwrap_or(now)),
        None => Observation::unavailable(now),
    }
}

#[async_trait]
impl UpstreamAdapter for LakeLevelAdapter {
    async fn fetch(&self, timeout: Duration) -> Result<SourceBundle, UpstreamError> {
        let (primary, extra) = futures::join!(
            self.cwms.fetch_recent(&LAKE_CORE_IDS, timeout),
            self.cwms.fetch_recent(&LAKE_EXTRA_IDS, timeout),
        );
        let primary = primary?;

        if !LAKE_CORE_IDS.iter().any(|id| primary.contains_key(*id)) {
            return Err(UpstreamError::Malformed(
                "CWMS recent response has none of the requested timeseries".to_string(),
            ));
        }

        let extra = extra.unwrap_or_else(|e| {
            tracing::debug!("Water temperature and rainfall unavailable: {}", e);
            HashMap::new()
        });

        let now = Utc::now();
        let last_updated = primary
            .values()
            .chain(extra.values())
            .filter_map(|v| v.observed_at)
            .max()
            .unwrap_or(now);

        Ok(SourceBundle::LakeLevel(LakeLevelBundle {
            level: recent_observation(primary.get(LEVEL_TS), now),
            inflow: recent_observation(primary.get(INFLOW_TS), now),
            outflow: recent_observation(primary.get(OUTFLOW_HOURLY_TS), now),
            water_temp: recent_observation(extra.get(WATER_TEMP_TS), now),
            rain_24h: recent_observation(extra.get(PRECIP_24H_TS), now),
            last_updated,
            estimated: false,
            note: None,
        }))
    }

    fn fallback(&self, now: DateTime<Utc>) -> SourceBundle {
        SourceBundle::LakeLevel(lake_level_fallback(now))
    }
}

pub fn lake_level_fallback(now: DateTime<Utc>) -> LakeLevelBundle {
    LakeLevelBundle {
        level: Observation::available(FALLBACK_LEVEL_FT, now).with_note(FALLBACK_LAKE_NOTE),
        inflow: Observation::unavailable(now),
        outflow: Observation::unavailable(now),
        water_temp: Observation::available(FALLBACK_WATER_TEMP_F, now)
            .with_note(FALLBACK_LAKE_NOTE),
        rain_24h: Observation::available(FALLBACK_RAIN_24H_IN, now).with_note(FALLBACK_LAKE_NOTE),
        last_updated: now,
        estimated: true,
        note: Some(FALLBACK_LAKE_NOTE.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Outflow (CWMS projected daily series)
// ---------------------------------------------------------------------------

pub struct OutflowAdapter {
    cwms: CwmsClient,
}

impl OutflowAdapter {
    pub fn new(cwms: CwmsClient) -> Self {
        Self { cwms }
    }
}

#[async_trait]
impl UpstreamAdapter for OutflowAdapter {
    async fn fetch(&self, timeout: Duration) -> Result<SourceBundle, UpstreamError> {
        let (begin, end) = current_operations_day();
        let point = self
            .cwms
            .fetch_latest_in_window(PROJECTED_OUTFLOW_TS, begin, end, timeout)
            .await?;

        let now = Utc::now();
        let observed_at = point.observed_at.unwrap_or(now);
        Ok(SourceBundle::Outflow(OutflowBundle {
            discharge: Observation::available(point.value, observed_at),
            last_updated: now,
            estimated: false,
            note: PROJECTED_OUTFLOW_NOTE.to_string(),
        }))
    }

    fn fallback(&self, now: DateTime<Utc>) -> SourceBundle {
        SourceBundle::Outflow(outflow_fallback(now))
    }
}

pub fn outflow_fallback(now: DateTime<Utc>) -> OutflowBundle {
    OutflowBundle {
        discharge: Observation::available(FALLBACK_DISCHARGE_CFS, now)
            .with_note(FALLBACK_OUTFLOW_NOTE),
        last_updated: now,
        estimated: true,
        note: FALLBACK_OUTFLOW_NOTE.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Weather (weather.gov)
// ---------------------------------------------------------------------------

pub struct WeatherAdapter {
    nws: NwsClient,
    latitude: f64,
    longitude: f64,
}

impl WeatherAdapter {
    pub fn new(nws: NwsClient) -> Self {
        Self {
            nws,
            latitude: LAKE_LATITUDE,
            longitude: LAKE_LONGITUDE,
        }
    }
}

/// Current conditions from the first period, forecast from the next three.
fn weather_bundle(periods: Vec<NwsPeriod>, now: DateTime<Utc>) -> Result<WeatherBundle, UpstreamError> {
    let mut periods = periods.into_iter();
    let current = periods
        .next()
        .ok_or_else(|| UpstreamError::Malformed("no current forecast period".to_string()))?;

    let forecast = periods
        .take(FORECAST_PERIODS)
        .filter_map(|p| {
            Some(ForecastPeriod {
                temperature: p.temperature_f?,
                short_forecast: p.short_forecast.unwrap_or_default(),
                name: p.name,
            })
        })
        .collect();

    Ok(WeatherBundle {
        temperature: Observation::new(current.temperature_f, now),
        wind_speed: Observation::new(current.wind_speed, now),
        wind_direction: Observation::new(current.wind_direction, now),
        short_forecast: Observation::new(current.short_forecast, now),
        forecast,
        last_updated: now,
        estimated: false,
        note: None,
    })
}

#[async_trait]
impl UpstreamAdapter for WeatherAdapter {
    async fn fetch(&self, timeout: Duration) -> Result<SourceBundle, UpstreamError> {
        let periods = self
            .nws
            .fetch_forecast(self.latitude, self.longitude, timeout)
            .await?;
        weather_bundle(periods, Utc::now()).map(SourceBundle::Weather)
    }

    fn fallback(&self, now: DateTime<Utc>) -> SourceBundle {
        SourceBundle::Weather(weather_fallback(now))
    }
}

pub fn weather_fallback(now: DateTime<Utc>) -> WeatherBundle {
    WeatherBundle {
        temperature: Observation::available(FALLBACK_AIR_TEMP_F, now)
            .with_note(FALLBACK_WEATHER_NOTE),
        wind_speed: Observation::unavailable(now),
        wind_direction: Observation::unavailable(now),
        short_forecast: Observation::available(FALLBACK_WEATHER_NOTE.to_string(), now),
        forecast: Vec::new(),
        last_updated: now,
        estimated: true,
        note: Some(FALLBACK_WEATHER_NOTE.to_string()),
    }
}
