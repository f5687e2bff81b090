//! Revalidation controller HTTP endpoints.
//!
//! - GET  /api/dashboard            view model for every source
//! - GET  /api/state/:key           one source's cache entry
//! - POST /api/revalidate/:key      manual revalidation (`?wait=true` to block)
//! - POST /api/events/:event        focus / reconnect from a dashboard client

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::errors::{AppError, ErrorResponse};
use crate::models::SourceKey;
use crate::services::revalidate::{
    DashboardView, RevalidateOutcome, RevalidationController, SourceState, TriggerOutcome,
};
use crate::services::scheduler::{ClientEvent, Trigger};

#[derive(Debug, Deserialize, IntoParams)]
pub struct RevalidateQuery {
    /// Wait for the fetch to finish and return the resulting state
    pub wait: Option<bool>,
}

/// Response of a background revalidation request.
#[derive(Debug, Serialize, ToSchema)]
pub struct TriggerResponse {
    pub key: SourceKey,
    #[serde(flatten)]
    pub outcome: TriggerOutcome,
}

/// Response of a revalidation run to completion.
#[derive(Debug, Serialize, ToSchema)]
pub struct RevalidateResponse {
    pub key: SourceKey,
    #[serde(flatten)]
    pub outcome: RevalidateOutcome,
    pub state: SourceState,
}

/// Per-key outcomes of a client event.
#[derive(Debug, Serialize, ToSchema)]
pub struct EventResponse {
    pub event: ClientEvent,
    pub triggers: Vec<TriggerResponse>,
}

fn parse_key(key: &str) -> Result<SourceKey, AppError> {
    key.parse()
        .map_err(|e: crate::models::UnknownSourceKey| AppError::NotFound(e.to_string()))
}

/// Every source's state plus the 24h lake level trend.
#[utoipa::path(
    get,
    path = "/api/dashboard",
    tag = "Dashboard",
    responses(
        (status = 200, description = "Dashboard view model", body = DashboardView),
    )
)]
pub async fn get_dashboard(State(controller): State<RevalidationController>) -> Json<DashboardView> {
    Json(controller.dashboard().await)
}

/// One source's cached state.
#[utoipa::path(
    get,
    path = "/api/state/{key}",
    tag = "Dashboard",
    params(
        ("key" = String, Path, description = "Source key: lake-level, outflow or weather"),
    ),
    responses(
        (status = 200, description = "Source state", body = SourceState),
        (status = 404, description = "Unknown source key", body = ErrorResponse),
    )
)]
pub async fn get_source_state(
    State(controller): State<RevalidationController>,
    Path(key): Path<String>,
) -> Result<Json<SourceState>, AppError> {
    let key = parse_key(&key)?;
    Ok(Json(controller.get_state(key).await))
}

/// Manually revalidate one source, superseding any fetch in flight.
///
/// Returns 202 immediately, or 200 with the settled state when `wait=true`.
#[utoipa::path(
    post,
    path = "/api/revalidate/{key}",
    tag = "Dashboard",
    params(
        ("key" = String, Path, description = "Source key: lake-level, outflow or weather"),
        RevalidateQuery,
    ),
    responses(
        (status = 202, description = "Revalidation started", body = TriggerResponse),
        (status = 200, description = "Revalidation finished", body = RevalidateResponse),
        (status = 404, description = "Unknown source key", body = ErrorResponse),
    )
)]
pub async fn revalidate_source(
    State(controller): State<RevalidationController>,
    Path(key): Path<String>,
    Query(query): Query<RevalidateQuery>,
) -> Result<Response, AppError> {
    let key = parse_key(&key)?;

    if query.wait.unwrap_or(false) {
        let outcome = controller.revalidate(key, Trigger::Manual).await;
        let state = controller.get_state(key).await;
        return Ok(Json(RevalidateResponse {
            key,
            outcome,
            state,
        })
        .into_response());
    }

    let outcome = controller.trigger(key, Trigger::Manual).await;
    Ok((StatusCode::ACCEPTED, Json(TriggerResponse { key, outcome })).into_response())
}

/// Report a client event; every subscribed source revalidates unless deduplicated.
#[utoipa::path(
    post,
    path = "/api/events/{event}",
    tag = "Dashboard",
    params(
        ("event" = String, Path, description = "focus or reconnect"),
    ),
    responses(
        (status = 202, description = "Event delivered", body = EventResponse),
        (status = 400, description = "Unknown event", body = ErrorResponse),
    )
)]
pub async fn post_client_event(
    State(controller): State<RevalidationController>,
    Path(event): Path<String>,
) -> Result<(StatusCode, Json<EventResponse>), AppError> {
    let event: ClientEvent = event
        .parse()
        .map_err(|e: crate::services::scheduler::UnknownClientEvent| {
            AppError::BadRequest(e.to_string())
        })?;

    let triggers = controller
        .notify(event)
        .await
        .into_iter()
        .map(|(key, outcome)| TriggerResponse { key, outcome })
        .collect();

    Ok((StatusCode::ACCEPTED, Json(EventResponse { event, triggers })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::errors::UpstreamError;
    use crate::models::FallbackSnapshot;
    use crate::services::clock::SystemClock;
    use crate::services::freshness::FRESHNESS_POLICIES;
    use crate::services::sources::SourceService;
    use crate::services::testing::{sample_bundle, FakeAdapter};

    /// Controller fetching in-process through a source service of fakes.
    fn controller_with(lake: FakeAdapter) -> RevalidationController {
        let service = SourceService::new(
            Arc::new(lake),
            Arc::new(FakeAdapter::new(SourceKey::Outflow)),
            Arc::new(FakeAdapter::new(SourceKey::Weather)),
            FRESHNESS_POLICIES,
            Arc::new(SystemClock),
        );
        RevalidationController::new(
            Arc::new(service),
            FRESHNESS_POLICIES,
            Arc::new(SystemClock),
            0.05,
        )
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_unknown_key_is_404() {
        let controller = controller_with(FakeAdapter::new(SourceKey::LakeLevel));
        let response = get_source_state(State(controller), Path("tides".to_string()))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_unknown_event_is_400() {
        let controller = controller_with(FakeAdapter::new(SourceKey::LakeLevel));
        let response = post_client_event(State(controller), Path("blur".to_string()))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_seeded_state_is_not_loading() {
        let controller = controller_with(FakeAdapter::new(SourceKey::LakeLevel));
        let now = chrono::Utc::now();
        let lake = sample_bundle(SourceKey::LakeLevel, now, 549.1).into_lake_level();
        controller
            .seed(&FallbackSnapshot::new(now, lake, None, None))
            .await;

        let response = get_source_state(State(controller), Path("lake-level".to_string()))
            .await
            .into_response();
        let json = body_json(response).await;
        assert_eq!(json["isLoading"], false);
        assert_eq!(json["isValidating"], false);
        assert_eq!(json["phase"], "seeded");
        assert_eq!(json["data"]["level"]["value"], 549.1);
    }

    #[tokio::test]
    async fn test_revalidate_wait_returns_settled_state() {
        let lake = FakeAdapter::new(SourceKey::LakeLevel);
        lake.push(Ok(sample_bundle(SourceKey::LakeLevel, chrono::Utc::now(), 547.9)));
        let controller = controller_with(lake);

        let response = revalidate_source(
            State(controller),
            Path("lake-level".to_string()),
            Query(RevalidateQuery { wait: Some(true) }),
        )
        .await
        .into_response();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["outcome"], "fresh");
        assert_eq!(json["state"]["phase"], "fresh");
        assert_eq!(json["state"]["data"]["level"]["value"], 547.9);
    }

    #[tokio::test]
    async fn test_revalidate_without_wait_is_accepted() {
        let lake = FakeAdapter::new(SourceKey::LakeLevel);
        lake.push(Err(UpstreamError::Http(503)));
        let controller = controller_with(lake);

        let response = revalidate_source(
            State(controller),
            Path("lake-level".to_string()),
            Query(RevalidateQuery { wait: None }),
        )
        .await
        .into_response();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let json = body_json(response).await;
        assert_eq!(json["key"], "lake-level");
        assert_eq!(json["outcome"], "started");
        assert_eq!(json["generation"], 1);
    }

    #[tokio::test]
    async fn test_focus_event_skips_outflow() {
        let controller = controller_with(FakeAdapter::new(SourceKey::LakeLevel));
        let response = post_client_event(State(controller), Path("focus".to_string()))
            .await
            .into_response();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let json = body_json(response).await;
        let outflow = json["triggers"]
            .as_array()
            .unwrap()
            .iter()
            .find(|t| t["key"] == "outflow")
            .unwrap()
            .clone();
        assert_eq!(outflow["outcome"], "dropped");
        assert_eq!(outflow["reason"], "notSubscribed");
    }
}
