use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use serde::Deserialize;

use crate::auth::RequireAdmin;
use crate::server::AppState;
use crate::server::dto::{SiteGrantRequest, SiteGrantResponse};
use crate::server::response::{ApiError, ApiResponse, StoreOptionExt, StoreResultExt};
use crate::server::validation::parse_permissions;
use crate::types::{SiteGrant, User};

#[derive(Deserialize)]
pub struct SiteGrantPath {
    id: String,
    site_id: i64,
}

fn load_user(state: &AppState, id: &str) -> Result<User, ApiError> {
    state
        .store
        .get_user(id)
        .api_err("Failed to get user")?
        .or_not_found("User not found")
}

fn list_responses(state: &AppState, user_id: &str) -> Result<Vec<SiteGrantResponse>, ApiError> {
    let grants = state
        .store
        .list_user_site_grants(user_id)
        .api_err("Failed to list grants")?;
    Ok(grants.into_iter().map(SiteGrantResponse::from).collect())
}

pub async fn create_site_grant(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Json(req): Json<SiteGrantRequest>,
) -> impl IntoResponse {
    let user = load_user(&state, &user_id)?;

    let site = state
        .store
        .get_site(req.site_id)
        .api_err("Failed to get site")?
        .or_not_found("Site not found")?;

    if site.owner_id == user.id {
        return Err(ApiError::bad_request(
            "Site owners already have full access",
        ));
    }

    let allow_bits = parse_permissions(&req.allow)?;
    let deny_bits = parse_permissions(&req.deny)?;

    let now = Utc::now();
    let grant = SiteGrant {
        user_id: user.id.clone(),
        site_id: site.id,
        allow_bits,
        deny_bits,
        created_at: now,
        updated_at: now,
    };

    state
        .store
        .upsert_site_grant(&grant)
        .api_err("Failed to create grant")?;

    let responses = list_responses(&state, &user.id)?;
    Ok::<_, ApiError>(Json(ApiResponse::success(responses)))
}

pub async fn list_site_grants(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    let user = load_user(&state, &user_id)?;
    let responses = list_responses(&state, &user.id)?;
    Ok::<_, ApiError>(Json(ApiResponse::success(responses)))
}

pub async fn get_site_grant(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(path): Path<SiteGrantPath>,
) -> impl IntoResponse {
    let user = load_user(&state, &path.id)?;

    let grant = state
        .store
        .get_site_grant(&user.id, path.site_id)
        .api_err("Failed to get grant")?
        .or_not_found("Grant not found")?;

    Ok::<_, ApiError>(Json(ApiResponse::success(SiteGrantResponse::from(grant))))
}

pub async fn delete_site_grant(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(path): Path<SiteGrantPath>,
) -> impl IntoResponse {
    let user = load_user(&state, &path.id)?;

    let deleted = state
        .store
        .delete_site_grant(&user.id, path.site_id)
        .api_err("Failed to delete grant")?;
    if !deleted {
        return Err(ApiError::not_found("Grant not found"));
    }

    Ok::<_, ApiError>(StatusCode::NO_CONTENT)
}
