pub mod error;
pub mod routes;
pub mod state;

use axum::routing::{get, post};
use axum::Router;
use std::path::PathBuf;
use tower_http::cors::{Any, CorsLayer};

/// Build the axum Router with all trigger and gate routes.
/// Used by `serve()` and available for integration testing.
pub fn build_router(db_path: PathBuf) -> Router {
    let app_state = state::AppState::new(db_path);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Periodic triggers (external cron calls these)
        .route(
            "/api/cron/deadline-reminders",
            post(routes::cron::deadline_reminders),
        )
        .route(
            "/api/cron/persistent-reminders",
            post(routes::cron::persistent_reminders),
        )
        .route(
            "/api/cron/resolve-proposals",
            post(routes::cron::resolve_proposals),
        )
        // Compliance gate (host application read path)
        .route("/api/gate/{subject_id}", get(routes::gate::check_gate))
        .layer(cors)
        .with_state(app_state)
}

/// Start the vigil trigger server.
pub async fn serve(db_path: PathBuf, port: u16) -> anyhow::Result<()> {
    let app = build_router(db_path);

    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("vigil trigger server listening on http://localhost:{port}");

    axum::serve(listener, app).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
