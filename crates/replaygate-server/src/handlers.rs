use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::{
        HeaderMap, HeaderValue, StatusCode,
        header::{CONTENT_TYPE, ETAG, IF_MATCH, LOCATION},
    },
    response::{IntoResponse, Response},
};
use replaygate_core::{CoreError, CreateTodo, TodoItem, UpdateTodo, Validate};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::idempotency::ResponseCacheStats;
use crate::problem::{ApiError, Problem};
use crate::server::AppState;

pub const TODOS_PATH: &str = "/api/v1/todos";

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: &'static str,
    todos: usize,
    idempotency: IdempotencyReadiness,
}

#[derive(Serialize)]
struct IdempotencyReadiness {
    enabled: bool,
    #[serde(flatten)]
    cache: ResponseCacheStats,
    locks: usize,
}

pub async fn root() -> impl IntoResponse {
    let body = json!({
        "service": "replaygate",
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    });
    (StatusCode::OK, Json(body))
}

pub async fn health_live() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

pub async fn health_ready(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let todos = state.repo.count().await?;
    let body = ReadyResponse {
        status: "ready",
        todos,
        idempotency: IdempotencyReadiness {
            enabled: state.config.idempotency.enabled,
            cache: state.engine.cache().stats(),
            locks: state.engine.locks().len(),
        },
    };
    Ok((StatusCode::OK, Json(body)))
}

pub async fn metrics() -> Response {
    match crate::metrics::render_metrics() {
        Some(text) => (
            StatusCode::OK,
            [(CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        None => Problem::new(StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable")
            .with_detail("Metrics recorder is not installed.")
            .into_response(),
    }
}

// ---- Todo CRUD ----

pub async fn list_todos(State(state): State<AppState>) -> Result<Json<Vec<TodoItem>>, ApiError> {
    Ok(Json(state.repo.list().await?))
}

pub async fn get_todo(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<Response, ApiError> {
    let id = parse_id(&raw_id)?;
    let item = state
        .repo
        .get(id)
        .await?
        .ok_or_else(|| CoreError::todo_not_found(id.to_string()))?;
    Ok((StatusCode::OK, [(ETAG, etag_header(&item)?)], Json(item)).into_response())
}

pub async fn create_todo(
    State(state): State<AppState>,
    payload: Result<Json<CreateTodo>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(dto) = payload.map_err(|e| ApiError::bad_request(e.body_text()))?;
    dto.validate()?;

    let item = state.repo.create(dto.into_item()).await?;
    tracing::info!(id = %item.id, "todo created");

    let location = HeaderValue::from_str(&format!("{TODOS_PATH}/{}", item.id))
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok((
        StatusCode::CREATED,
        [(LOCATION, location), (ETAG, etag_header(&item)?)],
        Json(item),
    )
        .into_response())
}

pub async fn update_todo(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    headers: HeaderMap,
    payload: Result<Json<UpdateTodo>, JsonRejection>,
) -> Result<Response, ApiError> {
    let id = parse_id(&raw_id)?;
    let Json(dto) = payload.map_err(|e| ApiError::bad_request(e.body_text()))?;
    dto.validate()?;

    let if_match = headers
        .get(IF_MATCH)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| *v != "*");

    let item = state.repo.update(id, dto, if_match).await?;
    Ok((StatusCode::OK, [(ETAG, etag_header(&item)?)], Json(item)).into_response())
}

pub async fn delete_todo(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = parse_id(&raw_id)?;
    state.repo.delete(id).await?;
    tracing::info!(%id, "todo deleted");
    Ok(StatusCode::NO_CONTENT)
}

fn parse_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::try_parse(raw).map_err(|_| CoreError::invalid_id(raw).into())
}

fn etag_header(item: &TodoItem) -> Result<HeaderValue, ApiError> {
    HeaderValue::from_str(&item.etag()).map_err(|e| ApiError::Internal(e.to_string()))
}
