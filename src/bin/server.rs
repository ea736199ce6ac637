//! Engram Memory Server
//!
//! HTTP API over the graph memory service.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use engram_memory::{
    error::Error,
    model::{EventType, GraphExport},
    Config, ContextPack, HousekeepingReport, MemoryService, TurnOutcome,
};

type SharedState = Arc<MemoryService>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!("Starting Engram Memory Server on port {}", config.server_port);
    tracing::info!("Graph backend: {}", config.backend);

    let port = config.server_port;
    let service = Arc::new(MemoryService::open(config).await?);

    // Housekeeping runs as its own task, never inline with a request handler.
    if let Some(secs) = service.config().housekeeping_interval_secs {
        let svc = service.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(secs));
            loop {
                ticker.tick().await;
                match svc.run_housekeeping().await {
                    Ok(report) => tracing::info!(
                        archived = report.archived.len(),
                        reactivated = report.reactivated.len(),
                        "scheduled housekeeping complete"
                    ),
                    Err(err) => tracing::warn!(error = %err, "scheduled housekeeping failed"),
                }
            }
        });
    }

    // Build router
    let app = Router::new()
        .route("/health", get(health))
        .route("/ingest", post(ingest))
        .route("/context", get(context))
        .route("/graph", get(graph))
        .route("/housekeeping", post(housekeeping))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .with_state(service);

    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
    tracing::info!("Server listening on http://127.0.0.1:{}", port);

    axum::serve(listener, app).await?;

    Ok(())
}

fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::Conflict(_) => StatusCode::CONFLICT,
        Error::Validation(_) => StatusCode::BAD_REQUEST,
        Error::BackendUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        Error::Cancelled => StatusCode::REQUEST_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

fn reply_err(err: Error) -> (StatusCode, Json<ErrorBody>) {
    (
        status_for(&err),
        Json(ErrorBody {
            error: err.to_string(),
        }),
    )
}

// === Handlers ===

#[derive(Debug, Serialize)]
struct HealthResponse {
    ok: bool,
    backend: String,
}

async fn health(State(service): State<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        backend: service.config().backend.to_string(),
    })
}

#[derive(Debug, Deserialize)]
struct IngestRequest {
    text: String,

    #[serde(default = "default_source")]
    source: String,

    #[serde(default)]
    event_type: Option<String>,
}

fn default_source() -> String {
    "api".to_string()
}

async fn ingest(
    State(service): State<SharedState>,
    Json(req): Json<IngestRequest>,
) -> Result<Json<TurnOutcome>, (StatusCode, Json<ErrorBody>)> {
    let event_type = match req.event_type.as_deref() {
        Some(raw) => raw.parse::<EventType>().map_err(reply_err)?,
        None => EventType::Text,
    };

    let outcome = service
        .handle(&req.text, &req.source, event_type)
        .await
        .map_err(reply_err)?;
    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
struct ContextParams {
    limit: Option<usize>,
    since: Option<chrono::DateTime<chrono::Utc>>,
    min_importance: Option<f64>,
}

#[derive(Debug, Serialize)]
struct ContextResponse {
    context: String,

    #[serde(flatten)]
    pack: ContextPack,
}

async fn context(
    State(service): State<SharedState>,
    Query(params): Query<ContextParams>,
) -> Result<Json<ContextResponse>, (StatusCode, Json<ErrorBody>)> {
    let pack = service
        .get_context(params.limit, params.since, params.min_importance)
        .await
        .map_err(reply_err)?;
    Ok(Json(ContextResponse {
        context: pack.format_for_prompt(),
        pack,
    }))
}

async fn graph(
    State(service): State<SharedState>,
) -> Result<Json<GraphExport>, (StatusCode, Json<ErrorBody>)> {
    let export = service.export_graph().await.map_err(reply_err)?;
    Ok(Json(export))
}

async fn housekeeping(
    State(service): State<SharedState>,
) -> Result<Json<HousekeepingReport>, (StatusCode, Json<ErrorBody>)> {
    let report = service.run_housekeeping().await.map_err(reply_err)?;
    Ok(Json(report))
}
