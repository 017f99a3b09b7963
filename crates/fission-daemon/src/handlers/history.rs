//! Read-only access to bonus history documents.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use fission_db::queries::bonus_history;
use fission_types::{BonusHistory, BONUS_HISTORY_COLLECTION};
use tracing::error;

use crate::server::ApiError;
use crate::AppState;

/// `GET /bonus_history/{uid}`
pub async fn get_bonus_history(
    State(state): State<Arc<AppState>>,
    Path(uid): Path<String>,
) -> Result<Json<BonusHistory>, ApiError> {
    let db = state.db.lock().await;
    match bonus_history::find(&db, &uid) {
        Ok(Some(history)) => Ok(Json(history)),
        Ok(None) => Err(ApiError::NotFound(format!("{BONUS_HISTORY_COLLECTION}/{uid} not found"))),
        Err(e) => {
            error!(class = "persistence", %uid, error = %e, "failed to load bonus history");
            Err(ApiError::Internal(e.to_string()))
        }
    }
}
