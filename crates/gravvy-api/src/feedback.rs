use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
};
use chrono::Utc;
use tracing::info;

use gravvy_types::api::{Detail, FeedbackRequest};

use crate::error::{ApiError, ApiResult};
use crate::middleware::CurrentUser;
use crate::{AppState, db_call};

/// `POST /feedbacks/`: store a note for the admins.
pub async fn create_feedback(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
    payload: Result<Json<FeedbackRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Detail<bool>>)> {
    let Json(req) = payload?;
    if req.body.trim().is_empty() {
        return Err(ApiError::field("body", "This field may not be blank."));
    }

    let feedback = db_call(&state, move |db| {
        db.create_feedback(me.id, req.body.trim(), Utc::now())
    })
    .await?;
    info!(
        "Feedback {} from user {}: {}",
        feedback.id, feedback.user_id, feedback.body
    );
    Ok((StatusCode::CREATED, Json(Detail { detail: true })))
}
