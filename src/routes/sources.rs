//! Source data HTTP endpoints.
//!
//! - GET /api/lake-data
//! - GET /api/outflow
//! - GET /api/weather
//! - GET /api/fallback
//!
//! Lake data and outflow degrade to estimates and always answer 200. Weather
//! surfaces upstream failures as 500.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;

use crate::errors::{AppError, ErrorResponse};
use crate::models::{FallbackSnapshot, SourceBundle, SourceKey};
use crate::payloads::{LakeDataResponse, OutflowResponse, WeatherResponse};
use crate::services::prefetch::prefetch_all;
use crate::services::sources::SourceService;

async fn resolve(
    service: &SourceService,
    key: SourceKey,
    failure_message: &str,
) -> Result<SourceBundle, AppError> {
    service.resolve(key).await.map_err(|e| {
        tracing::error!("{}: {}", key, e);
        AppError::InternalError(failure_message.to_string())
    })
}

fn wrong_bundle(key: SourceKey) -> AppError {
    AppError::InternalError(format!("{} resolved to a different source", key))
}

/// Current lake elevation, flows, water temperature and 24h rainfall.
#[utoipa::path(
    get,
    path = "/api/lake-data",
    tag = "Sources",
    responses(
        (status = 200, description = "Lake conditions (estimated when the upstream is unavailable)", body = LakeDataResponse),
        (status = 500, description = "Lake data unavailable", body = ErrorResponse),
    )
)]
pub async fn get_lake_data(
    State(service): State<Arc<SourceService>>,
) -> Result<Json<LakeDataResponse>, AppError> {
    let bundle = resolve(&service, SourceKey::LakeLevel, "Failed to fetch lake data").await?;
    let lake = bundle
        .as_lake_level()
        .ok_or_else(|| wrong_bundle(SourceKey::LakeLevel))?;
    Ok(Json(LakeDataResponse::from(lake)))
}

/// Projected 6am discharge for today's operations day.
#[utoipa::path(
    get,
    path = "/api/outflow",
    tag = "Sources",
    responses(
        (status = 200, description = "Projected outflow (estimated when the upstream is unavailable)", body = OutflowResponse),
        (status = 500, description = "Outflow unavailable", body = ErrorResponse),
    )
)]
pub async fn get_outflow(
    State(service): State<Arc<SourceService>>,
) -> Result<Json<OutflowResponse>, AppError> {
    let bundle = resolve(&service, SourceKey::Outflow, "Failed to fetch outflow data").await?;
    let outflow = bundle
        .into_outflow()
        .ok_or_else(|| wrong_bundle(SourceKey::Outflow))?;
    Ok(Json(OutflowResponse::from(&outflow)))
}

/// Current conditions and short-range forecast from weather.gov.
#[utoipa::path(
    get,
    path = "/api/weather",
    tag = "Sources",
    responses(
        (status = 200, description = "Current conditions and forecast", body = WeatherResponse),
        (status = 500, description = "weather.gov unavailable", body = ErrorResponse),
    )
)]
pub async fn get_weather(
    State(service): State<Arc<SourceService>>,
) -> Result<Json<WeatherResponse>, AppError> {
    let bundle = resolve(&service, SourceKey::Weather, "Failed to fetch weather data").await?;
    let weather = bundle
        .into_weather()
        .ok_or_else(|| wrong_bundle(SourceKey::Weather))?;
    Ok(Json(WeatherResponse::from(&weather)))
}

/// Prefetch every source into one snapshot. Unavailable sources are null.
#[utoipa::path(
    get,
    path = "/api/fallback",
    tag = "Sources",
    responses(
        (status = 200, description = "Fallback snapshot of all sources", body = FallbackSnapshot),
    )
)]
pub async fn get_fallback(State(service): State<Arc<SourceService>>) -> Json<FallbackSnapshot> {
    Json(prefetch_all(&service).await)
}
