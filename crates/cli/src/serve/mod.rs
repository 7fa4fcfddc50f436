//! `gatehouse serve` -- HTTP JSON API for the verification desk.
//!
//! Callers identify themselves with `Authorization: Bearer <token>`; tokens
//! map to operators in the configuration file.
//!
//! Endpoints:
//! - GET    /health                      - Server status (no auth, no rate limit)
//! - GET    /machines                    - Lifecycle tables of every variant
//! - POST   /verify                      - Scan a credential at the gate
//! - POST   /entities                    - Register a tracked entity
//! - GET    /entities                    - List, filtered by variant/status/inside/q
//! - GET    /entities/{id}               - One entity
//! - PATCH  /entities/{id}               - Edit subject info
//! - DELETE /entities/{id}               - Remove a non-terminal entity
//! - POST   /entities/{id}/transitions   - Apply a named action
//! - POST   /entities/{id}/advance       - Apply the inferred action
//! - GET    /history/{entity_id}         - Transition history with replay check
//! - GET    /changes?since=&limit=       - Ledger feed in commit order
//!
//! Errors are `{"errorKind": ..., "message": ...}`.

mod handlers;
mod middleware;
mod state;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::Method;
use axum::routing::{get, post};
use axum::{middleware as axum_middleware, Router};
use gatehouse_engine::Gateway;
use gatehouse_storage::MemoryStorage;
use tower_http::cors::{Any, CorsLayer};

use self::handlers::{
    handle_advance, handle_changes, handle_create, handle_delete, handle_get, handle_health,
    handle_history, handle_list, handle_machines, handle_not_found, handle_transition,
    handle_update, handle_verify,
};
use self::middleware::{rate_limit_middleware, trace_middleware};
use self::state::{AppState, RateLimiter};
use crate::config::Config;

/// Maximum request body size: 64 KB. Subject info is small.
const MAX_BODY_SIZE: usize = 64 * 1024;

/// Rate limit window duration in seconds (1 minute).
const RATE_LIMIT_WINDOW_SECS: u64 = 60;

fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/machines", get(handle_machines))
        .route("/verify", post(handle_verify))
        .route("/entities", post(handle_create).get(handle_list))
        .route(
            "/entities/{id}",
            get(handle_get).patch(handle_update).delete(handle_delete),
        )
        .route("/entities/{id}/transitions", post(handle_transition))
        .route("/entities/{id}/advance", post(handle_advance))
        .route("/history/{entity_id}", get(handle_history))
        .route("/changes", get(handle_changes))
        .fallback(handle_not_found)
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .layer(axum_middleware::from_fn(trace_middleware))
        .layer(cors)
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .with_state(state)
}

/// Start the HTTP server with the in-memory backend and serve until Ctrl+C.
pub async fn start_server(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let identity = config.identity();
    if identity.is_empty() {
        tracing::warn!("no operators configured; every authenticated request will be rejected");
    }
    tracing::info!(
        operators = identity.len(),
        residents = config.residents.len(),
        rate_limit = config.server.rate_limit,
        rescan_window_ms = config.server.rescan_window_ms,
        "configuration loaded"
    );

    let gateway = Gateway::new(
        Arc::new(MemoryStorage::new()),
        Arc::new(identity),
        config.directory(),
    )
    .with_rescan_window(config.server.rescan_window());
    let state = Arc::new(AppState {
        gateway,
        rate_limiter: RateLimiter::new(config.server.rate_limit),
    });

    let addr = format!("0.0.0.0:{}", config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("gatehouse listening on http://{}", addr);
    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("server shut down");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C).
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    tracing::info!("received shutdown signal");
}
