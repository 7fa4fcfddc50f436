//! Route handlers. Each one pulls the bearer token, calls the gateway and
//! maps `GateError` onto an HTTP status with a `{errorKind, message}` body.

use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use gatehouse_core::{GateError, StateMachine, Variant};
use gatehouse_engine::{EntityFilter, NewEntity, TransitionRequest};
use serde::Deserialize;

use super::state::AppState;

/// A `GateError` on its way out as an HTTP response.
pub(crate) struct ApiError(GateError);

impl From<GateError> for ApiError {
    fn from(e: GateError) -> Self {
        ApiError(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        ApiError(GateError::validation("body", e.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(e: QueryRejection) -> Self {
        ApiError(GateError::validation("query", e.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }
        (status, Json(self.0.to_body())).into_response()
    }
}

pub(crate) fn status_for(e: &GateError) -> StatusCode {
    match e {
        GateError::NotFound { .. } => StatusCode::NOT_FOUND,
        GateError::DuplicateCredential { .. }
        | GateError::IllegalTransition { .. }
        | GateError::AlreadyTerminal { .. }
        | GateError::Conflict { .. } => StatusCode::CONFLICT,
        GateError::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        GateError::Unauthenticated => StatusCode::UNAUTHORIZED,
        GateError::Unauthorized { .. } => StatusCode::FORBIDDEN,
        GateError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

type ApiResult = Result<Response, ApiError>;

/// The token of an `Authorization: Bearer <token>` header, if any.
fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Fallback handler for unmatched routes.
pub(crate) async fn handle_not_found() -> impl IntoResponse {
    ApiError(GateError::not_found("no such route"))
}

/// GET /health
pub(crate) async fn handle_health() -> impl IntoResponse {
    let response = serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    });
    (StatusCode::OK, Json(response))
}

/// GET /machines
pub(crate) async fn handle_machines() -> impl IntoResponse {
    let machines: Vec<&StateMachine> = StateMachine::all().collect();
    Json(serde_json::json!({ "machines": machines }))
}

#[derive(Debug, Deserialize)]
pub(crate) struct VerifyBody {
    credential: String,
    variant: Variant,
}

/// POST /verify
pub(crate) async fn handle_verify(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Json<VerifyBody>, JsonRejection>,
) -> ApiResult {
    let Json(body) = body?;
    let outcome = state
        .gateway
        .verify(bearer(&headers), &body.credential, body.variant)
        .await?;
    Ok(Json(outcome).into_response())
}

/// POST /entities
pub(crate) async fn handle_create(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Json<NewEntity>, JsonRejection>,
) -> ApiResult {
    let Json(new) = body?;
    let entity = state.gateway.create(bearer(&headers), new).await?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "entity": entity })),
    )
        .into_response())
}

/// GET /entities
pub(crate) async fn handle_list(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    filter: Result<Query<EntityFilter>, QueryRejection>,
) -> ApiResult {
    let Query(filter) = filter?;
    let entities = state.gateway.list(bearer(&headers), &filter).await?;
    Ok(Json(serde_json::json!({ "entities": entities })).into_response())
}

/// GET /entities/{id}
pub(crate) async fn handle_get(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult {
    let entity = state.gateway.get(bearer(&headers), &id).await?;
    Ok(Json(serde_json::json!({ "entity": entity })).into_response())
}

#[derive(Debug, Deserialize)]
pub(crate) struct PatchBody {
    subject: serde_json::Value,
}

/// PATCH /entities/{id}
pub(crate) async fn handle_update(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Result<Json<PatchBody>, JsonRejection>,
) -> ApiResult {
    let Json(body) = body?;
    let entity = state
        .gateway
        .update(bearer(&headers), &id, &body.subject)
        .await?;
    Ok(Json(serde_json::json!({ "entity": entity })).into_response())
}

/// DELETE /entities/{id}
pub(crate) async fn handle_delete(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult {
    let entity = state.gateway.delete(bearer(&headers), &id).await?;
    Ok(Json(serde_json::json!({ "deleted": entity.id })).into_response())
}

/// POST /entities/{id}/transitions
pub(crate) async fn handle_transition(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Result<Json<TransitionRequest>, JsonRejection>,
) -> ApiResult {
    let Json(request) = body?;
    let outcome = state.gateway.act(bearer(&headers), &id, request).await?;
    Ok(Json(outcome).into_response())
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct AdvanceBody {
    #[serde(default)]
    notes: Option<String>,
}

/// POST /entities/{id}/advance
///
/// The body is optional; an empty request applies the inferred edge with no
/// notes.
pub(crate) async fn handle_advance(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Option<Json<AdvanceBody>>,
) -> ApiResult {
    let notes = body.and_then(|Json(b)| b.notes);
    let outcome = state.gateway.advance(bearer(&headers), &id, notes).await?;
    Ok(Json(outcome).into_response())
}

/// GET /history/{entity_id}
pub(crate) async fn handle_history(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(entity_id): Path<String>,
) -> ApiResult {
    let history = state.gateway.history(bearer(&headers), &entity_id).await?;
    Ok(Json(history).into_response())
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ChangesQuery {
    #[serde(default)]
    since: u64,
    #[serde(default)]
    limit: usize,
}

/// GET /changes
pub(crate) async fn handle_changes(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    query: Result<Query<ChangesQuery>, QueryRejection>,
) -> ApiResult {
    let Query(query) = query?;
    let feed = state
        .gateway
        .changes(bearer(&headers), query.since, query.limit)
        .await?;
    Ok(Json(feed).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn error_kinds_map_to_statuses() {
        assert_eq!(status_for(&GateError::not_found("x")), StatusCode::NOT_FOUND);
        assert_eq!(
            status_for(&GateError::validation("phone", "bad")),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_for(&GateError::Unauthenticated),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status_for(&GateError::Conflict {
                entity_id: "e".into()
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&GateError::Storage("disk".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn bearer_token_is_extracted() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer(&headers), None);
        headers.insert("authorization", HeaderValue::from_static("Bearer gate-1"));
        assert_eq!(bearer(&headers), Some("gate-1"));
        headers.insert("authorization", HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer(&headers), None);
    }
}
