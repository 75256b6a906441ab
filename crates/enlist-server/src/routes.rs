use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::middleware;
use axum::response::IntoResponse;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::routing::{delete, get, post};
use futures::Stream;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use enlist_core::events::Subscription;
use enlist_core::job::{Job, MemberRecord};

use crate::auth::require_api_key;
use crate::dto::{
    ErrorResponse, EventHistoryQuery, EventResponse, HealthResponse, RegisterWorkerRequest,
    StartRunRequest, StartRunResponse, StatusResponse, StopRunResponse, WorkerListResponse,
    WorkerResponse,
};
use crate::error::ApiError;
use crate::openapi::ApiDoc;
use crate::state::AppState;

/// Build the full router with all routes and middleware.
pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/v1/status", get(get_status))
        .route("/v1/workers", get(list_workers))
        .route("/v1/workers", post(register_worker))
        .route("/v1/workers/{account_key}", delete(remove_worker))
        .route("/v1/runs", post(start_run))
        .route("/v1/runs/stop", post(stop_run))
        .route("/v1/events", get(stream_events))
        .route("/v1/events/history", get(event_history))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ));

    let public = Router::new()
        .route("/health", get(health))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    public.merge(api).with_state(state)
}

fn validation_error(message: impl Into<String>) -> axum::response::Response {
    let body = ErrorResponse {
        error: "validation_error".to_string(),
        message: message.into(),
    };
    (StatusCode::BAD_REQUEST, axum::Json(body)).into_response()
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/v1/status",
    responses(
        (status = 200, description = "Run and worker status", body = StatusResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "runs"
)]
pub async fn get_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    axum::Json(StatusResponse::from(state.pool.status()))
}

// ---------------------------------------------------------------------------
// Workers
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/v1/workers",
    responses(
        (status = 200, description = "Registered workers", body = WorkerListResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "workers"
)]
pub async fn list_workers(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let workers: Vec<WorkerResponse> = state
        .pool
        .status()
        .workers
        .into_iter()
        .map(WorkerResponse::from)
        .collect();
    let total = workers.len();

    axum::Json(WorkerListResponse { workers, total })
}

#[utoipa::path(
    post,
    path = "/v1/workers",
    request_body = RegisterWorkerRequest,
    responses(
        (status = 201, description = "Worker registered", body = WorkerResponse),
        (status = 400, description = "Bad request", body = ErrorResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "workers"
)]
pub async fn register_worker(
    State(state): State<Arc<AppState>>,
    axum::Json(body): axum::Json<RegisterWorkerRequest>,
) -> impl IntoResponse {
    let account_key = body.account_key.trim().to_string();
    if account_key.is_empty() {
        return validation_error("account_key must not be empty");
    }

    let connection = match state.connect(body.gateway_url.as_deref(), &body.session_token) {
        Ok(connection) => connection,
        Err(e) => return validation_error(e.to_string()),
    };

    state.pool.add_worker(account_key.clone(), connection).await;

    match state.pool.worker_status(&account_key) {
        Some(worker) => {
            (StatusCode::CREATED, axum::Json(WorkerResponse::from(worker))).into_response()
        }
        None => ApiError::from(enlist_core::AppError::WorkerNotFound(account_key)).into_response(),
    }
}

#[utoipa::path(
    delete,
    path = "/v1/workers/{account_key}",
    params(
        ("account_key" = String, Path, description = "Worker account key")
    ),
    responses(
        (status = 204, description = "Worker removed"),
        (status = 404, description = "Not found", body = ErrorResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "workers"
)]
pub async fn remove_worker(
    State(state): State<Arc<AppState>>,
    Path(account_key): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.pool.remove_worker(&account_key).await {
        return Err(enlist_core::AppError::WorkerNotFound(account_key).into());
    }
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Runs
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/v1/runs",
    request_body = StartRunRequest,
    responses(
        (status = 202, description = "Run started", body = StartRunResponse),
        (status = 400, description = "No workers or invalid members", body = ErrorResponse),
        (status = 409, description = "A run is already processing", body = ErrorResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "runs"
)]
pub async fn start_run(
    State(state): State<Arc<AppState>>,
    axum::Json(body): axum::Json<StartRunRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let target = body.target.trim();
    if target.is_empty() {
        return Ok(validation_error("target must not be empty"));
    }

    let jobs = body
        .members
        .into_iter()
        .map(|member| Job::try_from(MemberRecord::from(member)))
        .collect::<Result<Vec<_>, _>>()?;

    let ticket = state.pool.start_run(target, jobs)?;
    Ok((StatusCode::ACCEPTED, axum::Json(StartRunResponse::from(ticket))).into_response())
}

#[utoipa::path(
    post,
    path = "/v1/runs/stop",
    responses(
        (status = 200, description = "Stop requested (no-op when idle)", body = StopRunResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "runs"
)]
pub async fn stop_run(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.pool.stop();
    let status = state.pool.status();
    axum::Json(StopRunResponse {
        status: status.status.to_string(),
        running: status.running,
    })
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/v1/events",
    responses(
        (status = 200, description = "text/event-stream of recent history, then live events"),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "events"
)]
pub async fn stream_events(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let subscription = state.pool.events().subscribe();
    tracing::debug!(
        subscribers = state.pool.events().subscriber_count(),
        "Event stream opened"
    );

    Sse::new(event_stream(subscription)).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

/// Turn a bus subscription into SSE frames. Dropping the stream unsubscribes.
fn event_stream(subscription: Subscription) -> impl Stream<Item = Result<SseEvent, Infallible>> {
    futures::stream::unfold(subscription, |mut subscription| async move {
        let event = subscription.recv().await?;
        let name = event.kind.as_str();
        let payload = EventResponse::from(event);
        let frame = SseEvent::default()
            .event(name)
            .json_data(&payload)
            .unwrap_or_else(|e| SseEvent::default().event("error").data(e.to_string()));
        Some((Ok(frame), subscription))
    })
}

#[utoipa::path(
    get,
    path = "/v1/events/history",
    params(EventHistoryQuery),
    responses(
        (status = 200, description = "Retained events, oldest first", body = Vec<EventResponse>),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "events"
)]
pub async fn event_history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EventHistoryQuery>,
) -> impl IntoResponse {
    let events = match query.limit {
        Some(limit) => state.pool.events().recent(limit),
        None => state.pool.events().history(),
    };
    let response: Vec<EventResponse> = events.into_iter().map(EventResponse::from).collect();
    axum::Json(response)
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
    ),
    tag = "system"
)]
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let response = HealthResponse {
        status: "healthy",
        run_status: state.pool.run_status().to_string(),
        workers: state.pool.worker_count(),
    };

    axum::Json(response)
}
