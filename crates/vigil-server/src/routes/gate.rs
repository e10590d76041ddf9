//! Compliance-gate check endpoint, called on the host application's read
//! path before protected functionality is granted.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;

use crate::error::AppError;
use crate::state::AppState;
use vigil_core::store::Store;

#[derive(Deserialize)]
pub struct GateQuery {
    /// Path the subject is requesting; exempt prefixes pass while blocked.
    #[serde(default)]
    pub path: String,
}

/// GET /api/gate/{subject_id}?path=/some/page — evaluate the gate.
///
/// Fails open inside the core: a store error still produces a 200 with
/// `decision: allowed`, because availability outranks strict gating here.
pub async fn check_gate(
    State(app): State<AppState>,
    Path(subject_id): Path<i64>,
    Query(q): Query<GateQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let db = app.db_path.clone();
    let decision = tokio::task::spawn_blocking(move || {
        let store = Store::open(&db)?;
        Ok::<_, vigil_core::VigilError>(vigil_core::gate::check(&store, subject_id, &q.path))
    })
    .await
    .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;
    Ok(Json(serde_json::to_value(&decision).map_err(|e| AppError(e.into()))?))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
