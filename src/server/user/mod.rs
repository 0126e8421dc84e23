pub mod access;
mod actions;
mod sites;

use std::sync::Arc;

use axum::{
    Router,
    routing::{delete, get, patch, post},
};

use crate::server::AppState;

pub fn user_router() -> Router<Arc<AppState>> {
    Router::new()
        // Sites
        .route("/sites", get(sites::list_sites))
        .route("/sites", post(sites::create_site))
        .route("/sites/{id}", get(sites::get_site))
        .route("/sites/{id}", patch(sites::update_site))
        .route("/sites/{id}", delete(sites::delete_site))
        // Lifecycle
        .route("/sites/{id}/start", post(actions::start_site))
        .route("/sites/{id}/stop", post(actions::stop_site))
        .route("/sites/{id}/restart", post(actions::restart_site))
        .route("/sites/{id}/rebuild", post(actions::rebuild_site))
        .route("/sites/{id}/deploy", post(actions::deploy_site))
        // Inspection
        .route("/sites/{id}/status", get(actions::site_status))
        .route("/sites/{id}/stats", get(actions::site_stats))
        .route("/sites/{id}/logs", get(actions::site_logs))
        .route("/sites/{id}/topology", get(actions::site_topology))
}
