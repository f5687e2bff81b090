// Lake Hub API v0.1
use axum::routing::{get, post};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod config;
mod errors;
mod helpers;
mod models;
mod payloads;
mod routes;
mod services;

use config::{AppConfig, LogFormat};
use services::adapters::{LakeLevelAdapter, OutflowAdapter, WeatherAdapter};
use services::clock::SystemClock;
use services::cwms::CwmsClient;
use services::fetcher::{SameOriginFetcher, SourceFetcher};
use services::freshness::PolicyTable;
use services::nws::NwsClient;
use services::revalidate::RevalidationController;
use services::sources::SourceService;

/// Lake Hub API — OpenAPI specification.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Lake Hub API",
        version = "0.1.0",
        description = "Near-real-time conditions for Barren River Lake. \
            Aggregates USACE CWMS lake telemetry and weather.gov forecasts, \
            serves each source under its own freshness policy with graceful \
            fallbacks, and keeps a revalidating per-source cache for dashboards.",
        license(name = "MIT"),
    ),
    tags(
        (name = "Health", description = "Service health check"),
        (name = "Sources", description = "Normalized upstream data"),
        (name = "Dashboard", description = "Revalidation controller state and triggers"),
    ),
    paths(
        routes::health::health_check,
        routes::sources::get_lake_data,
        routes::sources::get_outflow,
        routes::sources::get_weather,
        routes::sources::get_fallback,
        routes::dashboard::get_dashboard,
        routes::dashboard::get_source_state,
        routes::dashboard::revalidate_source,
        routes::dashboard::post_client_event,
    ),
    components(
        schemas(
            routes::health::HealthResponse,
            payloads::LakeDataResponse,
            payloads::OutflowResponse,
            payloads::WeatherResponse,
            models::ForecastPeriod,
            models::FallbackSnapshot,
            models::SourceKey,
            services::revalidate::DashboardView,
            services::revalidate::SourceState,
            services::revalidate::EntryPhase,
            services::revalidate::TriggerOutcome,
            services::revalidate::RevalidateOutcome,
            services::revalidate::DropReason,
            services::scheduler::ClientEvent,
            services::trend::TrendAnnotation,
            services::trend::TrendDirection,
            services::freshness::FreshnessPolicy,
            services::freshness::PolicyTable,
            routes::dashboard::TriggerResponse,
            routes::dashboard::RevalidateResponse,
            routes::dashboard::EventResponse,
            errors::UpstreamErrorBody,
            errors::UpstreamErrorKind,
            errors::ErrorResponse,
        )
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() {
    let config = AppConfig::from_env().expect("Invalid configuration");

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "lake_hub_api=debug,tower_http=debug".into());
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }

    let policies = PolicyTable::load(config.freshness_policy_path.as_deref())
        .expect("Failed to load freshness policy table");
    if let Some(path) = &config.freshness_policy_path {
        tracing::info!("Freshness policy overrides loaded from {}", path.display());
    }

    // One HTTP client for every upstream; per-request timeouts come from the policy table
    let http = reqwest::Client::builder()
        .user_agent(&config.user_agent)
        .build()
        .expect("Failed to build HTTP client");

    let cwms = CwmsClient::new(http.clone(), &config.cwms_api_url);
    let nws = NwsClient::new(http.clone(), &config.nws_api_url);
    let clock = Arc::new(SystemClock);

    let service = Arc::new(SourceService::new(
        Arc::new(LakeLevelAdapter::new(cwms.clone())),
        Arc::new(OutflowAdapter::new(cwms)),
        Arc::new(WeatherAdapter::new(nws)),
        policies,
        clock.clone(),
    ));

    // Revalidate through our own endpoints when a base URL is configured,
    // otherwise resolve sources in-process.
    let fetcher: Arc<dyn SourceFetcher> = match &config.base_url {
        Some(base_url) => {
            tracing::info!("Revalidating through {}", base_url);
            Arc::new(SameOriginFetcher::new(http, base_url))
        }
        None => service.clone(),
    };

    let controller = RevalidationController::new(
        fetcher,
        policies,
        clock,
        config.trend_steady_threshold_ft,
    );

    // Seed the controller with a prefetch so the dashboard never starts empty
    let snapshot = services::prefetch::prefetch_all(&service).await;
    controller.seed(&snapshot).await;

    // CORS — dashboards read sources and post triggers
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
        .allow_headers(Any);

    // Build router
    // Source routes use the SourceService; dashboard routes use the controller.
    let source_routes = Router::new()
        .route("/api/lake-data", get(routes::sources::get_lake_data))
        .route("/api/outflow", get(routes::sources::get_outflow))
        .route("/api/weather", get(routes::sources::get_weather))
        .route("/api/fallback", get(routes::sources::get_fallback))
        .with_state(service);

    let dashboard_routes = Router::new()
        .route("/api/dashboard", get(routes::dashboard::get_dashboard))
        .route("/api/state/:key", get(routes::dashboard::get_source_state))
        .route(
            "/api/revalidate/:key",
            post(routes::dashboard::revalidate_source),
        )
        .route(
            "/api/events/:event",
            post(routes::dashboard::post_client_event),
        )
        .with_state(controller.clone());

    let app = Router::new()
        .route("/api/health", get(routes::health::health_check))
        .merge(source_routes)
        .merge(dashboard_routes)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind TCP listener");

    tracing::info!("API server listening on {}", addr);
    tracing::info!(
        "Swagger UI available at http://localhost:{}/swagger-ui/",
        config.port
    );

    // Listener is bound, so same-origin revalidation can connect from the first tick
    tokio::spawn(controller.run());

    axum::serve(listener, app)
        .await
        .expect("Server terminated unexpectedly");
}
