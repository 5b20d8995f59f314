//! Notification submission and lookup routes.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;

use herald_common::error::AppError;
use herald_common::types::{NewNotification, NotificationId, NotificationRecord};
use herald_notifier::SubmitError;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/notifications", post(create_notification))
        .route("/notifications/{id}", get(get_notification))
}

#[derive(Debug, Serialize)]
pub struct Submitted {
    pub status: &'static str,
    pub notification_id: NotificationId,
}

/// POST /notifications: Persist a notification and queue it for dispatch.
async fn create_notification(
    State(state): State<AppState>,
    Json(body): Json<NewNotification>,
) -> Result<Json<Submitted>, Response> {
    match state.submissions.submit(body).await {
        Ok(notification_id) => Ok(Json(Submitted {
            status: "queued",
            notification_id,
        })),
        // The record exists; report its id so the caller can look it up.
        Err(SubmitError::Enqueue { id, source }) => {
            let body = json!({
                "error": format!("Notification stored but not queued: {}", source),
                "notification_id": id,
            });
            Err((StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response())
        }
        Err(e) => Err(AppError::from(e).into_response()),
    }
}

/// GET /notifications/{id}: Full record including attempt count.
async fn get_notification(
    State(state): State<AppState>,
    Path(id): Path<NotificationId>,
) -> Result<Json<NotificationRecord>, AppError> {
    let record = state.store.get(id).await?;
    Ok(Json(record))
}
