//! Canonical shapes every upstream response is normalized into.
//!
//! Units are fixed to English units regardless of upstream defaults:
//! feet for elevations, cfs for flows, °F for temperatures, inches for rain.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::ser::{SerializeStruct, Serializer};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::helpers::iso8601;

// ---------------------------------------------------------------------------
// Source keys
// ---------------------------------------------------------------------------

/// Identifier of one upstream data source. Exactly one cache entry and one
/// freshness policy row exist per key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKey {
    LakeLevel,
    Outflow,
    Weather,
}

impl SourceKey {
    pub const ALL: [SourceKey; 3] = [SourceKey::LakeLevel, SourceKey::Outflow, SourceKey::Weather];

    pub fn as_str(self) -> &'static str {
        match self {
            SourceKey::LakeLevel => "lake-level",
            SourceKey::Outflow => "outflow",
            SourceKey::Weather => "weather",
        }
    }

    /// Path of the endpoint that serves this source.
    pub fn api_path(self) -> &'static str {
        match self {
            SourceKey::LakeLevel => "/api/lake-data",
            SourceKey::Outflow => "/api/outflow",
            SourceKey::Weather => "/api/weather",
        }
    }
}

impl fmt::Display for SourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown source key '{0}'")]
pub struct UnknownSourceKey(pub String);

impl FromStr for SourceKey {
    type Err = UnknownSourceKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SourceKey::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| UnknownSourceKey(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Observation
// ---------------------------------------------------------------------------

/// A single measurement of one quantity at a point in time.
///
/// A `None` value is always serialized with `status: "unavailable"` so a
/// consumer can never mistake a missing reading for zero.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation<T> {
    pub value: Option<T>,
    pub observed_at: DateTime<Utc>,
    pub note: Option<String>,
}

impl<T> Observation<T> {
    pub fn new(value: Option<T>, observed_at: DateTime<Utc>) -> Self {
        Self {
            value,
            observed_at,
            note: None,
        }
    }

    pub fn available(value: T, observed_at: DateTime<Utc>) -> Self {
        Self::new(Some(value), observed_at)
    }

    pub fn unavailable(observed_at: DateTime<Utc>) -> Self {
        Self::new(None, observed_at)
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn is_available(&self) -> bool {
        self.value.is_some()
    }
}

impl<T: Serialize> Serialize for Observation<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("Observation", 4)?;
        s.serialize_field("value", &self.value)?;
        s.serialize_field("observedAt", &iso8601(self.observed_at))?;
        s.serialize_field(
            "status",
            if self.is_available() { "ok" } else { "unavailable" },
        )?;
        match &self.note {
            Some(note) => s.serialize_field("note", note)?,
            None => s.skip_field("note")?,
        }
        s.end()
    }
}

// ---------------------------------------------------------------------------
// Source bundles
// ---------------------------------------------------------------------------

/// Lake elevation and companion readings from the CWMS `recent` endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LakeLevelBundle {
    /// Pool elevation in feet.
    pub level: Observation<f64>,
    /// Hourly average inflow in cfs.
    pub inflow: Observation<f64>,
    /// Hourly average outflow in cfs.
    pub outflow: Observation<f64>,
    /// Water temperature in °F.
    pub water_temp: Observation<f64>,
    /// Rainfall over the last 24 hours in inches.
    #[serde(rename = "rain24h")]
    pub rain_24h: Observation<f64>,
    pub last_updated: DateTime<Utc>,
    /// True when this bundle is a typed fallback rather than upstream data.
    pub estimated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Daily projected 6am discharge.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutflowBundle {
    /// Discharge in cfs.
    pub discharge: Observation<f64>,
    pub last_updated: DateTime<Utc>,
    pub estimated: bool,
    pub note: String,
}

/// One named period of the short-range forecast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ForecastPeriod {
    /// Period name (e.g. "Tonight", "Thursday")
    pub name: String,
    pub short_forecast: String,
    /// Temperature in °F
    pub temperature: f64,
}

/// Current conditions plus the next three forecast periods.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeatherBundle {
    /// Air temperature in °F.
    pub temperature: Observation<f64>,
    /// Wind speed as reported (e.g. "5 to 10 mph").
    pub wind_speed: Observation<String>,
    /// Compass direction (e.g. "SW").
    pub wind_direction: Observation<String>,
    pub short_forecast: Observation<String>,
    pub forecast: Vec<ForecastPeriod>,
    pub last_updated: DateTime<Utc>,
    pub estimated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// The normalized payload of any one source.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SourceBundle {
    LakeLevel(LakeLevelBundle),
    Outflow(OutflowBundle),
    Weather(WeatherBundle),
}

impl SourceBundle {
    pub fn key(&self) -> SourceKey {
        match self {
            SourceBundle::LakeLevel(_) => SourceKey::LakeLevel,
            SourceBundle::Outflow(_) => SourceKey::Outflow,
            SourceBundle::Weather(_) => SourceKey::Weather,
        }
    }

    pub fn is_estimated(&self) -> bool {
        match self {
            SourceBundle::LakeLevel(b) => b.estimated,
            SourceBundle::Outflow(b) => b.estimated,
            SourceBundle::Weather(b) => b.estimated,
        }
    }

    pub fn as_lake_level(&self) -> Option<&LakeLevelBundle> {
        match self {
            SourceBundle::LakeLevel(b) => Some(b),
            _ => None,
        }
    }

    pub fn into_lake_level(self) -> Option<LakeLevelBundle> {
        match self {
            SourceBundle::LakeLevel(b) => Some(b),
            _ => None,
        }
    }

    pub fn into_outflow(self) -> Option<OutflowBundle> {
        match self {
            SourceBundle::Outflow(b) => Some(b),
            _ => None,
        }
    }

    pub fn into_weather(self) -> Option<WeatherBundle> {
        match self {
            SourceBundle::Weather(b) => Some(b),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Fallback snapshot
// ---------------------------------------------------------------------------

/// Best-effort union of every source captured by one prefetch.
///
/// Fields are private so a snapshot cannot be patched after creation; the
/// revalidation controller copies bundles out and supersedes them entry by
/// entry.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FallbackSnapshot {
    captured_at: DateTime<Utc>,
    #[schema(value_type = Option<Object>)]
    lake_level: Option<LakeLevelBundle>,
    #[schema(value_type = Option<Object>)]
    outflow: Option<OutflowBundle>,
    #[schema(value_type = Option<Object>)]
    weather: Option<WeatherBundle>,
}

impl FallbackSnapshot {
    pub fn new(
        captured_at: DateTime<Utc>,
        lake_level: Option<LakeLevelBundle>,
        outflow: Option<OutflowBundle>,
        weather: Option<WeatherBundle>,
    ) -> Self {
        Self {
            captured_at,
            lake_level,
            outflow,
            weather,
        }
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// A copy of one source's bundle, if the prefetch produced it.
    pub fn get(&self, key: SourceKey) -> Option<SourceBundle> {
        match key {
            SourceKey::LakeLevel => self.lake_level.clone().map(SourceBundle::LakeLevel),
            SourceKey::Outflow => self.outflow.clone().map(SourceBundle::Outflow),
            SourceKey::Weather => self.weather.clone().map(SourceBundle::Weather),
        }
    }

    /// Keys present in this snapshot.
    pub fn available(&self) -> Vec<SourceKey> {
        SourceKey::ALL
            .into_iter()
            .filter(|k| match k {
                SourceKey::LakeLevel => self.lake_level.is_some(),
                SourceKey::Outflow => self.outflow.is_some(),
                SourceKey::Weather => self.weather.is_some(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at() -> DateTime<Utc> {
        "2026-06-01T12:00:00Z".parse().unwrap()
    }

    fn outflow_bundle() -> OutflowBundle {
        OutflowBundle {
            discharge: Observation::available(1200.0, at()),
            last_updated: at(),
            estimated: false,
            note: "Projected 6am discharge rate".to_string(),
        }
    }

    #[test]
    fn test_source_key_round_trip_str() {
        for key in SourceKey::ALL {
            assert_eq!(key.as_str().parse::<SourceKey>().unwrap(), key);
        }
    }

    #[test]
    fn test_source_key_unknown() {
        let err = "tides".parse::<SourceKey>().unwrap_err();
        assert_eq!(err.to_string(), "unknown source key 'tides'");
    }

    #[test]
    fn test_source_key_serde_matches_as_str() {
        let json = serde_json::to_value(SourceKey::LakeLevel).unwrap();
        assert_eq!(json, "lake-level");
    }

    #[test]
    fn test_unavailable_observation_serializes_status() {
        let obs: Observation<f64> = Observation::unavailable(at());
        let json = serde_json::to_value(&obs).unwrap();
        assert!(json["value"].is_null());
        assert_eq!(json["status"], "unavailable");
        assert!(json.get("note").is_none());
    }

    #[test]
    fn test_available_observation_serializes_value_and_note() {
        let obs = Observation::available(545.2, at()).with_note("provisional");
        let json = serde_json::to_value(&obs).unwrap();
        assert_eq!(json["value"], 545.2);
        assert_eq!(json["status"], "ok");
        assert_eq!(json["note"], "provisional");
        assert_eq!(json["observedAt"], "2026-06-01T12:00:00.000Z");
    }

    #[test]
    fn test_zero_is_available_not_unavailable() {
        let obs = Observation::available(0.0, at());
        assert!(obs.is_available());
        let json = serde_json::to_value(&obs).unwrap();
        assert_eq!(json["status"], "ok");
    }

    #[test]
    fn test_bundle_key_and_accessors() {
        let bundle = SourceBundle::Outflow(outflow_bundle());
        assert_eq!(bundle.key(), SourceKey::Outflow);
        assert!(!bundle.is_estimated());
        assert!(bundle.as_lake_level().is_none());
        assert!(bundle.into_outflow().is_some());
    }

    #[test]
    fn test_snapshot_get_and_available() {
        let snap = FallbackSnapshot::new(at(), None, Some(outflow_bundle()), None);
        assert_eq!(snap.available(), vec![SourceKey::Outflow]);
        assert!(snap.get(SourceKey::LakeLevel).is_none());
        assert_eq!(
            snap.get(SourceKey::Outflow),
            Some(SourceBundle::Outflow(outflow_bundle()))
        );
    }

    #[test]
    fn test_snapshot_serializes_absent_sources_as_null() {
        let snap = FallbackSnapshot::new(at(), None, None, None);
        let json = serde_json::to_value(&snap).unwrap();
        assert!(json["lakeLevel"].is_null());
        assert!(json["outflow"].is_null());
        assert!(json["weather"].is_null());
        assert!(json["capturedAt"].is_string());
    }
}
