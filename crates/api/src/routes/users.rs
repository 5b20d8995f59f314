//! Per-user notification listing.

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};

use herald_common::error::AppError;
use herald_common::types::NotificationView;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/users/{user_id}/notifications", get(list_notifications))
}

/// GET /users/{user_id}/notifications: Oldest first; empty if the user has none.
async fn list_notifications(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<Json<Vec<NotificationView>>, AppError> {
    let records = state.store.list_by_user(user_id).await?;
    Ok(Json(records.into_iter().map(NotificationView::from).collect()))
}
