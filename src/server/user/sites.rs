use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};

use crate::auth::{RequireAuth, RequireUser, can_access_site};
use crate::deploy::{SiteSpec, SiteUpdate};
use crate::server::AppState;
use crate::server::dto::{DeleteResponse, DeleteSiteParams, PaginationParams, SiteResponse};
use crate::server::response::{
    ApiError, ApiResponse, DEFAULT_PAGE_SIZE, PaginatedResponse, StoreResultExt, blocking,
    paginate,
};
use crate::types::{Permission, Site};

use super::access::load_site_with_permission;

pub async fn list_sites(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Query(params): Query<PaginationParams>,
) -> impl IntoResponse {
    let store = state.store.as_ref();
    let cursor = match params.cursor.as_deref() {
        Some(c) => c
            .parse::<i64>()
            .map_err(|_| ApiError::bad_request("Invalid cursor"))?,
        None => 0,
    };

    let sites: Vec<Site> = match &auth.user {
        Some(user) if !auth.is_admin() => {
            let mut sites = store
                .list_owner_sites(&user.id)
                .api_err("Failed to list sites")?;

            let grants = store
                .list_user_site_grants(&user.id)
                .api_err("Failed to list site grants")?;
            for grant in grants {
                if sites.iter().any(|s| s.id == grant.site_id) {
                    continue;
                }
                let Some(site) = store.get_site(grant.site_id).api_err("Failed to get site")? else {
                    continue;
                };
                if can_access_site(store, user, &site, Permission::SITE_READ)
                    .api_err("Failed to check site grant")?
                {
                    sites.push(site);
                }
            }

            sites.retain(|s| s.id > cursor);
            sites.sort_by_key(|s| s.id);
            sites
        }
        _ => store
            .list_sites(cursor, DEFAULT_PAGE_SIZE + 1)
            .api_err("Failed to list sites")?,
    };

    let (sites, next_cursor, has_more) =
        paginate(sites, DEFAULT_PAGE_SIZE as usize, |s| s.id.to_string());
    let sites: Vec<SiteResponse> = sites.into_iter().map(SiteResponse::from).collect();

    Ok::<_, ApiError>(Json(PaginatedResponse::new(sites, next_cursor, has_more)))
}

pub async fn create_site(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Json(spec): Json<SiteSpec>,
) -> impl IntoResponse {
    let orchestrator = Arc::clone(&state.orchestrator);
    let user = auth.user;

    let outcome = blocking(move || orchestrator.executor().create(&user, spec)).await?;

    Ok::<_, ApiError>((
        StatusCode::CREATED,
        Json(ApiResponse::success(SiteResponse::from(outcome))),
    ))
}

pub async fn get_site(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    let site = load_site_with_permission(state.store.as_ref(), &auth, id, Permission::SITE_READ)?;
    Ok::<_, ApiError>(Json(ApiResponse::success(SiteResponse::from(site))))
}

pub async fn update_site(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(update): Json<SiteUpdate>,
) -> impl IntoResponse {
    load_site_with_permission(state.store.as_ref(), &auth, id, Permission::SITE_WRITE)?;

    let orchestrator = Arc::clone(&state.orchestrator);
    let outcome = blocking(move || orchestrator.reconciler().update(id, update)).await?;

    Ok::<_, ApiError>(Json(ApiResponse::success(SiteResponse::from(outcome))))
}

pub async fn delete_site(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Query(params): Query<DeleteSiteParams>,
) -> impl IntoResponse {
    load_site_with_permission(state.store.as_ref(), &auth, id, Permission::SITE_ADMIN)?;

    let orchestrator = Arc::clone(&state.orchestrator);
    let report =
        blocking(move || orchestrator.lifecycle().delete(id, params.keep_data)).await?;

    Ok::<_, ApiError>(Json(ApiResponse::success(DeleteResponse::from(report))))
}
