//! Web server setup and routing

use anyhow::Result;
use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::api;
use crate::state::AppState;

/// API routes with permissive CORS for the dashboard
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/snapshot", get(api::get_snapshot))
        .route("/api/fetch", post(api::trigger_fetch))
        .route("/api/devices", get(api::list_devices).post(api::add_device))
        .route("/api/devices/{id}", delete(api::remove_device))
        .route("/api/alarms", get(api::list_alarms))
        .route("/api/alarms/{id}", delete(api::delete_alarm))
        .route("/api/config", get(api::get_config))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Start the poll scheduler and serve the API until the listener fails
pub async fn run(state: Arc<AppState>, bind: &str) -> Result<()> {
    state.scheduler.start().await;

    let app = router(state.clone());
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(address = %bind, protocol = "HTTP", "Starting web server");
    let served = axum::serve(listener, app).await;

    state.scheduler.stop().await;
    served?;
    Ok(())
}
