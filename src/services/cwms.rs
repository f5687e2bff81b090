//! USACE CWMS Data API client.
//!
//! Reads Barren River Lake telemetry published by the Louisville District.
//! See: https://cwms-data.usace.army.mil/cwms-data/swagger-ui.html

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Days, Local, NaiveTime, TimeZone, Utc};
use serde::Deserialize;

use crate::errors::UpstreamError;
use crate::helpers::parse_upstream_timestamp;

/// USACE office that publishes the lake's timeseries.
pub const LRL_OFFICE: &str = "LRL";

/// Timeseries read from the `recent` endpoint for the lake-level source.
pub const LEVEL_TS: &str = "Barren.Elev.Inst.0.0.lrldlb-rev";
pub const INFLOW_TS: &str = "Barren.Flow-Inflow.Ave.1Hour.6Hours.lrldlb-comp";
pub const OUTFLOW_HOURLY_TS: &str = "Barren.Flow-Outflow.Ave.1Hour.1Hour.lrldlb-comp";
pub const WATER_TEMP_TS: &str = "Barren.Temp-Water.Inst.1Hour.0.lrldlb-rev";
pub const PRECIP_24H_TS: &str = "Barren.Precip-Inc.Total.1Day.1Day.lrldlb-rev";

/// Daily projected outflow (the planned 6am discharge).
pub const PROJECTED_OUTFLOW_TS: &str = "Barren.Flow-Out.Ave.1Day.1Day.lrldlb-rev";

/// Hour of day (local) at which dam operations roll over.
const OPERATIONS_DAY_START_HOUR: u32 = 6;

/// Latest value of one timeseries from the `recent` endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct RecentValue {
    pub value: Option<f64>,
    pub observed_at: Option<DateTime<Utc>>,
}

/// Latest usable point of a value series.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesPoint {
    pub value: f64,
    pub observed_at: Option<DateTime<Utc>>,
}

// --- CWMS JSON response types ---

#[derive(Debug, Deserialize)]
struct RecentItem {
    id: Option<String>,
    dqu: Option<RecentDqu>,
}

#[derive(Debug, Deserialize)]
struct RecentDqu {
    value: Option<f64>,
    #[serde(rename = "date-time")]
    date_time: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct SeriesResponse {
    values: Option<Vec<Vec<serde_json::Value>>>,
}

/// Client for the CWMS Data API.
#[derive(Debug, Clone)]
pub struct CwmsClient {
    client: reqwest::Client,
    base_url: String,
}

impl CwmsClient {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Fetch the most recent value of each timeseries in one request.
    ///
    /// Returns a map keyed by timeseries ID. IDs the upstream omits are simply
    /// absent from the map.
    pub async fn fetch_recent(
        &self,
        ts_ids: &[&str],
        timeout: Duration,
    ) -> Result<HashMap<String, RecentValue>, UpstreamError> {
        let url = format!("{}/timeseries/recent", self.base_url);
        let joined = ts_ids.join(",");

        tracing::debug!("CWMS recent: {} [{}]", url, joined);

        let response = self
            .client
            .get(&url)
            .query(&[("office", LRL_OFFICE), ("ts-ids", joined.as_str()), ("unit", "EN")])
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| UpstreamError::from_reqwest(e, timeout))?;

        if !response.status().is_success() {
            return Err(UpstreamError::Http(response.status().as_u16()));
        }

        let raw: serde_json::Value = response
            .json()
            .await
            .map_err(|e| UpstreamError::from_reqwest(e, timeout))?;

        parse_recent(raw)
    }

    /// Fetch the latest non-null value of `ts_id` between `begin` and `end`.
    pub async fn fetch_latest_in_window(
        &self,
        ts_id: &str,
        begin: DateTime<Utc>,
        end: DateTime<Utc>,
        timeout: Duration,
    ) -> Result<SeriesPoint, UpstreamError> {
        let url = format!("{}/timeseries", self.base_url);
        let begin = begin.to_rfc3339();
        let end = end.to_rfc3339();

        tracing::debug!("CWMS series: {} {} [{} .. {}]", url, ts_id, begin, end);

        let response = self
            .client
            .get(&url)
            .query(&[
                ("office", LRL_OFFICE),
                ("name", ts_id),
                ("begin", begin.as_str()),
                ("end", end.as_str()),
                ("unit", "EN"),
                ("format", "json"),
            ])
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| UpstreamError::from_reqwest(e, timeout))?;

        if !response.status().is_success() {
            return Err(UpstreamError::Http(response.status().as_u16()));
        }

        let raw: serde_json::Value = response
            .json()
            .await
            .map_err(|e| UpstreamError::from_reqwest(e, timeout))?;

        latest_series_point(raw)
    }
}

/// Parse the `recent` endpoint body: an array of `{id, dqu: {value, date-time}}`.
fn parse_recent(raw: serde_json::Value) -> Result<HashMap<String, RecentValue>, UpstreamError> {
    let items: Vec<RecentItem> = serde_json::from_value(raw)
        .map_err(|e| UpstreamError::Malformed(format!("CWMS recent structure error: {}", e)))?;

    let mut values = HashMap::with_capacity(items.len());
    for item in items {
        let (Some(id), Some(dqu)) = (item.id, item.dqu) else {
            continue;
        };
        values.insert(
            id,
            RecentValue {
                value: dqu.value.filter(|v| v.is_finite()),
                observed_at: dqu.date_time.as_ref().and_then(parse_upstream_timestamp),
            },
        );
    }
    Ok(values)
}

/// Walk `values` backwards and return the latest row whose value is present.
///
/// Rows are `[timestamp, value, quality]`; the value may arrive as a number
/// or a numeric string.
fn latest_series_point(raw: serde_json::Value) -> Result<SeriesPoint, UpstreamError> {
    let series: SeriesResponse = serde_json::from_value(raw)
        .map_err(|e| UpstreamError::Malformed(format!("CWMS series structure error: {}", e)))?;

    let rows = series.values.unwrap_or_default();
    rows.iter()
        .rev()
        .find_map(|row| {
            let value = match row.get(1)? {
                serde_json::Value::Number(n) => n.as_f64(),
                serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            }
            .filter(|v| v.is_finite())?;
            Some(SeriesPoint {
                value,
                observed_at: row.first().and_then(parse_upstream_timestamp),
            })
        })
        .ok_or_else(|| UpstreamError::Malformed("no valid outflow value in series".to_string()))
}

/// The operations day containing `now`: 06:00 local today to 06:00 tomorrow.
pub fn operations_day_window<Tz: TimeZone>(now: DateTime<Tz>) -> (DateTime<Utc>, DateTime<Utc>) {
    let start_time = NaiveTime::from_hms_opt(OPERATIONS_DAY_START_HOUR, 0, 0).unwrap_or_default();
    let today = now.date_naive();
    let tz = now.timezone();

    let begin = tz
        .from_local_datetime(&today.and_time(start_time))
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| now.with_timezone(&Utc));
    let end = today
        .checked_add_days(Days::new(1))
        .and_then(|d| tz.from_local_datetime(&d.and_time(start_time)).earliest())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| begin + chrono::Duration::days(1));

    (begin, end)
}

/// [`operations_day_window`] in the server's local timezone.
pub fn current_operations_day() -> (DateTime<Utc>, DateTime<Utc>) {
    operations_day_window(Local::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[test]
    fn test_parse_recent_maps_ids() {
        let raw = json!([
            { "id": LEVEL_TS, "dqu": { "value": 548.31, "date-time": 1771070400000i64 } },
            { "id": INFLOW_TS, "dqu": { "value": 1520.0 } },
            { "id": "Other.Ts", "dqu": null }
        ]);
        let values = parse_recent(raw).unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(values[LEVEL_TS].value, Some(548.31));
        assert_eq!(
            values[LEVEL_TS].observed_at.map(|dt| dt.timestamp()),
            Some(1771070400)
        );
        assert_eq!(values[INFLOW_TS].observed_at, None);
    }

    #[test]
    fn test_parse_recent_not_an_array() {
        let err = parse_recent(json!({ "error": "nope" })).unwrap_err();
        assert!(matches!(err, UpstreamError::Malformed(_)));
    }

    #[test]
    fn test_latest_series_point_skips_trailing_nulls() {
        let raw = json!({
            "values": [
                [1771048800000i64, 800.0, 0],
                [1771135200000i64, 950.0, 0],
                [1771221600000i64, null, 0]
            ]
        });
        let point = latest_series_point(raw).unwrap();
        assert_eq!(point.value, 950.0);
        assert_eq!(point.observed_at.map(|dt| dt.timestamp()), Some(1771135200));
    }

    #[test]
    fn test_latest_series_point_numeric_string() {
        let raw = json!({ "values": [[1771048800000i64, "1210.5", 0]] });
        assert_eq!(latest_series_point(raw).unwrap().value, 1210.5);
    }

    #[test]
    fn test_latest_series_point_empty_is_malformed() {
        let err = latest_series_point(json!({ "values": [] })).unwrap_err();
        assert!(matches!(err, UpstreamError::Malformed(_)));
        let err = latest_series_point(json!({})).unwrap_err();
        assert!(matches!(err, UpstreamError::Malformed(_)));
    }

    #[test]
    fn test_operations_day_window_utc() {
        let now: DateTime<Utc> = "2026-06-01T14:30:00Z".parse().unwrap();
        let (begin, end) = operations_day_window(now);
        assert_eq!(begin, "2026-06-01T06:00:00Z".parse::<DateTime<Utc>>().unwrap());
        assert_eq!(end, "2026-06-02T06:00:00Z".parse::<DateTime<Utc>>().unwrap());
    }

    #[test]
    fn test_operations_day_window_fixed_offset() {
        let tz = chrono::FixedOffset::west_opt(5 * 3600).unwrap();
        let now = tz.with_ymd_and_hms(2026, 6, 1, 9, 0, 0).unwrap();
        let (begin, end) = operations_day_window(now);
        assert_eq!(begin, "2026-06-01T11:00:00Z".parse::<DateTime<Utc>>().unwrap());
        assert_eq!(end - begin, chrono::Duration::days(1));
    }

    #[tokio::test]
    async fn test_fetch_recent_sends_office_and_units() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/timeseries/recent"))
            .and(query_param("office", "LRL"))
            .and(query_param("unit", "EN"))
            .and(query_param("ts-ids", format!("{},{}", LEVEL_TS, INFLOW_TS)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "id": LEVEL_TS, "dqu": { "value": 547.9 } }
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let client = CwmsClient::new(reqwest::Client::new(), &server.uri());
        let values = client
            .fetch_recent(&[LEVEL_TS, INFLOW_TS], TIMEOUT)
            .await
            .unwrap();
        assert_eq!(values[LEVEL_TS].value, Some(547.9));
        assert!(!values.contains_key(INFLOW_TS));
    }

    #[tokio::test]
    async fn test_fetch_recent_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/timeseries/recent"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = CwmsClient::new(reqwest::Client::new(), &server.uri());
        let err = client.fetch_recent(&[LEVEL_TS], TIMEOUT).await.unwrap_err();
        assert_eq!(err, UpstreamError::Http(503));
    }

    #[tokio::test]
    async fn test_fetch_recent_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/timeseries/recent"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!([]))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let client = CwmsClient::new(reqwest::Client::new(), &server.uri());
        let budget = Duration::from_millis(50);
        let err = client.fetch_recent(&[LEVEL_TS], budget).await.unwrap_err();
        assert_eq!(err, UpstreamError::Timeout(budget));
    }

    #[tokio::test]
    async fn test_fetch_latest_in_window() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/timeseries"))
            .and(query_param("name", PROJECTED_OUTFLOW_TS))
            .and(query_param("format", "json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "values": [[1771048800000i64, 1100.0, 0]]
            })))
            .mount(&server)
            .await;

        let client = CwmsClient::new(reqwest::Client::new(), &server.uri());
        let (begin, end) = operations_day_window(Utc::now());
        let point = client
            .fetch_latest_in_window(PROJECTED_OUTFLOW_TS, begin, end, TIMEOUT)
            .await
            .unwrap();
        assert_eq!(point.value, 1100.0);
    }
}
