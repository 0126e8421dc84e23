use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;

use crate::auth::RequireAdmin;
use crate::server::AppState;
use crate::server::dto::{SettingRequest, SettingResponse};
use crate::server::response::{ApiError, ApiResponse, StoreOptionExt, StoreResultExt};
use crate::server::validation::{validate_setting_key, validate_setting_value};

pub async fn list_settings(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let settings = state
        .store
        .list_settings()
        .api_err("Failed to list settings")?;

    let responses: Vec<SettingResponse> = settings.into_iter().map(SettingResponse::from).collect();
    Ok::<_, ApiError>(Json(ApiResponse::success(responses)))
}

pub async fn get_setting(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> impl IntoResponse {
    let setting = state
        .store
        .get_setting(&key)
        .api_err("Failed to get setting")?
        .or_not_found("Setting not found")?;

    Ok::<_, ApiError>(Json(ApiResponse::success(SettingResponse::from(setting))))
}

pub async fn put_setting(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    Json(req): Json<SettingRequest>,
) -> impl IntoResponse {
    validate_setting_key(&key)?;
    validate_setting_value(&key, &req.value)?;

    state
        .store
        .set_setting(&key, req.value.trim())
        .api_err("Failed to save setting")?;
    info!(key = %key, "updated setting");

    let setting = state
        .store
        .get_setting(&key)
        .api_err("Failed to get setting")?
        .or_not_found("Setting not found")?;

    Ok::<_, ApiError>(Json(ApiResponse::success(SettingResponse::from(setting))))
}

pub async fn delete_setting(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> impl IntoResponse {
    let deleted = state
        .store
        .delete_setting(&key)
        .api_err("Failed to delete setting")?;
    if !deleted {
        return Err(ApiError::not_found("Setting not found"));
    }

    Ok::<_, ApiError>(StatusCode::NO_CONTENT)
}
