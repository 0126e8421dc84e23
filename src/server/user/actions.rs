use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    response::IntoResponse,
};

use crate::auth::RequireAuth;
use crate::deploy::{DeployOutcome, Orchestrator};
use crate::error::Result;
use crate::server::AppState;
use crate::server::dto::{LogsParams, LogsResponse, SiteResponse, TopologyResponse};
use crate::server::response::{ApiError, ApiResponse, blocking};
use crate::types::Permission;

use super::access::load_site_with_permission;

/// Checks `required` on the site, then runs `action` on a blocking thread.
async fn run_action<F>(
    state: &AppState,
    auth: &RequireAuth,
    id: i64,
    required: Permission,
    action: F,
) -> std::result::Result<Json<ApiResponse<SiteResponse>>, ApiError>
where
    F: FnOnce(&Orchestrator, i64) -> Result<DeployOutcome> + Send + 'static,
{
    load_site_with_permission(state.store.as_ref(), auth, id, required)?;
    let orchestrator = Arc::clone(&state.orchestrator);
    let outcome = blocking(move || action(&orchestrator, id)).await?;
    Ok(Json(ApiResponse::success(SiteResponse::from(outcome))))
}

pub async fn start_site(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    run_action(&state, &auth, id, Permission::SITE_WRITE, |o, id| {
        o.lifecycle().start(id)
    })
    .await
}

pub async fn stop_site(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    run_action(&state, &auth, id, Permission::SITE_WRITE, |o, id| {
        o.lifecycle().stop(id)
    })
    .await
}

pub async fn restart_site(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    run_action(&state, &auth, id, Permission::SITE_WRITE, |o, id| {
        o.lifecycle().restart(id)
    })
    .await
}

pub async fn rebuild_site(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    run_action(&state, &auth, id, Permission::SITE_WRITE, |o, id| {
        o.lifecycle().rebuild(id)
    })
    .await
}

pub async fn deploy_site(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    run_action(&state, &auth, id, Permission::SITE_WRITE, |o, id| {
        o.executor().redeploy(id)
    })
    .await
}

pub async fn site_status(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    load_site_with_permission(state.store.as_ref(), &auth, id, Permission::SITE_READ)?;
    let orchestrator = Arc::clone(&state.orchestrator);
    let status = blocking(move || orchestrator.status(id)).await?;
    Ok::<_, ApiError>(Json(ApiResponse::success(status)))
}

pub async fn site_stats(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    load_site_with_permission(state.store.as_ref(), &auth, id, Permission::SITE_READ)?;
    let orchestrator = Arc::clone(&state.orchestrator);
    let stats = blocking(move || orchestrator.stats(id)).await?;
    Ok::<_, ApiError>(Json(ApiResponse::success(stats)))
}

pub async fn site_logs(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Query(params): Query<LogsParams>,
) -> impl IntoResponse {
    load_site_with_permission(state.store.as_ref(), &auth, id, Permission::SITE_READ)?;
    let lines = params.lines();
    let orchestrator = Arc::clone(&state.orchestrator);
    let output = blocking(move || orchestrator.logs(id, lines)).await?;
    Ok::<_, ApiError>(Json(ApiResponse::success(LogsResponse { lines, output })))
}

/// The topology carries database secrets in its environment, so it needs
/// admin access on the site.
pub async fn site_topology(
    auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    load_site_with_permission(state.store.as_ref(), &auth, id, Permission::SITE_ADMIN)?;
    let orchestrator = Arc::clone(&state.orchestrator);
    let content = blocking(move || orchestrator.topology(id)).await?;
    Ok::<_, ApiError>(Json(ApiResponse::success(TopologyResponse {
        site_id: id,
        content,
    })))
}
