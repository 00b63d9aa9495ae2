// HTTP + WebSocket routes

mod http;
mod ui;
mod ws;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::{self, Authenticator};
use crate::config::AppConfig;
use crate::docker_repo::DockerRepo;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) docker: Arc<DockerRepo>,
    pub(crate) auth: Arc<Authenticator>,
    pub(crate) ws_connections: Arc<AtomicUsize>,
    pub(crate) config: AppConfig,
}

pub fn app(docker: Arc<DockerRepo>, config: AppConfig) -> Router {
    let auth = Arc::new(Authenticator::new(&config.auth));
    let state = AppState {
        docker,
        auth: auth.clone(),
        ws_connections: Arc::new(AtomicUsize::new(0)),
        config,
    };

    let protected = Router::new()
        .route("/api/containers", get(http::list_containers)) // GET /api/containers
        .route("/api/containers/{id}/inspect", get(http::inspect_container)) // GET /api/containers/:id/inspect
        .route("/api/containers/{id}/{action}", post(http::container_action)) // POST /api/containers/:id/:action
        .route("/ws/containers/stream", get(ws::ws_containers)) // WS /ws/containers/stream
        .route("/ws/containers/all/stats", get(ws::ws_all_stats)) // WS /ws/containers/all/stats
        .route("/ws/containers/{id}/stats", get(ws::ws_container_stats)) // WS /ws/containers/:id/stats
        .route_layer(middleware::from_fn_with_state(auth, auth::require_auth));

    Router::new()
        .route("/", get(ui::index)) // GET /
        .route("/healthz", get(http::healthz)) // GET /healthz
        .route("/api/login", post(http::login)) // POST /api/login
        .merge(protected)
        .fallback(ui::fallback)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any))
        .with_state(state)
}
