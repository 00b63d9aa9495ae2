// REST handlers: login, container list/inspect/actions, health

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::{HeaderValue, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use std::sync::atomic::Ordering;

use super::AppState;
use crate::auth::AUTH_COOKIE;
use crate::docker_repo::ContainerAction;
use crate::error::ApiError;

const NAME: &str = env!("CARGO_PKG_NAME");
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Deserialize)]
pub(super) struct LoginRequest {
    #[serde(default)]
    password: Option<String>,
}

/// GET /healthz: service name, version and open relay sockets.
pub(super) async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "name": NAME,
        "version": VERSION,
        "wsClients": state.ws_connections.load(Ordering::Relaxed),
    }))
}

/// POST /api/login: `{password}` → `{token}` plus the `auth` cookie.
/// A missing or non-JSON body counts as no password.
pub(super) async fn login(
    State(state): State<AppState>,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let password = body.ok().and_then(|Json(body)| body.password);
    let token = state.auth.login(password.as_deref())?;
    let cookie = format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        AUTH_COOKIE,
        token,
        state.auth.ttl_secs()
    );
    let mut response = Json(serde_json::json!({ "token": token })).into_response();
    if let Ok(value) = HeaderValue::from_str(&cookie) {
        response.headers_mut().insert(header::SET_COOKIE, value);
    }
    tracing::info!("Dashboard login");
    Ok(response)
}

/// GET /api/containers: full snapshot; empty list when the engine is unavailable.
pub(super) async fn list_containers(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.docker.snapshot().await)
}

/// GET /api/containers/:id/inspect: allow-listed inspect fields.
pub(super) async fn inspect_container(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let detail = state.docker.inspect(&id).await.map_err(|e| {
        tracing::debug!(error = %e, container = %id, "inspect failed");
        ApiError::NotFound("Container not found")
    })?;
    let mut response = Json(detail).into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    Ok(response)
}

/// POST /api/containers/:id/:action: start, stop, restart, kill or pull.
pub(super) async fn container_action(
    State(state): State<AppState>,
    Path((id, action)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if action == "pull" {
        return pull_image(&state, &id).await;
    }
    let action = ContainerAction::parse(&action).ok_or(ApiError::NotFound("Unknown action"))?;
    state.docker.run_action(&id, action).await.map_err(|e| {
        tracing::warn!(
            error = %e,
            container = %id,
            operation = action.as_str(),
            "container action failed"
        );
        ApiError::Internal(format!("Failed to {}", action.as_str()))
    })?;
    tracing::info!(container = %id, operation = action.as_str(), "container action done");
    Ok(Json(serde_json::json!({ "ok": true })))
}

/// Accepted as soon as the pull is started; completion is only logged.
async fn pull_image(state: &AppState, id: &str) -> Result<Json<serde_json::Value>, ApiError> {
    let image = state.docker.image_of(id).await.map_err(|e| {
        tracing::warn!(error = %e, container = %id, operation = "pull", "inspect before pull failed");
        ApiError::Internal("Failed to pull image".to_string())
    })?;
    let image = image.ok_or(ApiError::BadRequest("No image"))?;
    state.docker.spawn_pull(&image);
    Ok(Json(serde_json::json!({ "ok": true })))
}
