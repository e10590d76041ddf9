//! Periodic-trigger endpoints. Each is idempotent to call with no body and
//! returns the run summary `{processed, details}`; a non-2xx response means
//! the run aborted on a configuration or store failure, never a per-subject
//! delivery failure.

use axum::{extract::State, Json};
use chrono::Utc;

use crate::error::AppError;
use crate::state::AppState;
use vigil_core::quorum::StoreFeed;
use vigil_core::scheduler::RunSummary;
use vigil_core::store::Store;

/// POST /api/cron/deadline-reminders — escalate overdue checklist-style
/// obligations at unit granularity.
pub async fn deadline_reminders(
    State(app): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let db = app.db_path.clone();
    let summary = tokio::task::spawn_blocking(move || {
        let store = Store::open(&db)?;
        vigil_core::scheduler::run_deadline_escalations(&store, Utc::now())
    })
    .await
    .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;
    Ok(Json(summary_json(&summary)?))
}

/// POST /api/cron/persistent-reminders — nudge subjects with unmet
/// mandatory-content obligations.
pub async fn persistent_reminders(
    State(app): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let db = app.db_path.clone();
    let summary = tokio::task::spawn_blocking(move || {
        let store = Store::open(&db)?;
        vigil_core::scheduler::run_persistent_escalations(&store, Utc::now())
    })
    .await
    .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;
    Ok(Json(summary_json(&summary)?))
}

/// POST /api/cron/resolve-proposals — close expired votes and publish
/// approved, auto-publish proposals to the feed.
pub async fn resolve_proposals(
    State(app): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let db = app.db_path.clone();
    let summary = tokio::task::spawn_blocking(move || {
        let store = Store::open(&db)?;
        let now = Utc::now();
        let feed = StoreFeed::new(&store, now);
        vigil_core::quorum::resolve_due_proposals(&store, &feed, now)
    })
    .await
    .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;
    Ok(Json(summary_json(&summary)?))
}

fn summary_json(summary: &RunSummary) -> Result<serde_json::Value, AppError> {
    Ok(serde_json::to_value(summary).map_err(|e| AppError(e.into()))?)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
