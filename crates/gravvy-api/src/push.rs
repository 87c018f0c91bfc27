use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
};
use chrono::Utc;

use gravvy_db::models::UserRow;
use gravvy_types::api::{DeviceResponse, RegisterDeviceRequest};
use gravvy_types::models::DevicePlatform;

use crate::error::{ApiError, ApiResult};
use crate::middleware::CurrentUser;
use crate::{AppState, db_call};

/// APNS device tokens are 32 bytes, written as hex.
fn is_apns_token(registration_id: &str) -> bool {
    registration_id.len() == 64 && registration_id.bytes().all(|b| b.is_ascii_hexdigit())
}

async fn register(
    state: AppState,
    me: UserRow,
    platform: DevicePlatform,
    req: RegisterDeviceRequest,
) -> ApiResult<(StatusCode, Json<DeviceResponse>)> {
    let registration_id = req.registration_id.trim().to_string();
    if registration_id.is_empty() {
        return Err(ApiError::field(
            "registration_id",
            "This field may not be blank.",
        ));
    }
    if platform == DevicePlatform::Apns && !is_apns_token(&registration_id) {
        return Err(ApiError::field(
            "registration_id",
            "Registration ID (device token) is invalid.",
        ));
    }

    let user_id = me.id;
    let device = db_call(&state, move |db| {
        db.register_device(
            user_id,
            platform,
            &registration_id,
            req.name.as_deref(),
            Utc::now(),
        )
    })
    .await?;
    Ok((StatusCode::CREATED, Json(state.device_response(&device, &me))))
}

/// `POST /push/apns/`
pub async fn register_apns(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
    payload: Result<Json<RegisterDeviceRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<DeviceResponse>)> {
    let Json(req) = payload?;
    register(state, me, DevicePlatform::Apns, req).await
}

/// `POST /push/gcm/`
pub async fn register_gcm(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
    payload: Result<Json<RegisterDeviceRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<DeviceResponse>)> {
    let Json(req) = payload?;
    register(state, me, DevicePlatform::Gcm, req).await
}
