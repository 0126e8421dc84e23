mod grants;
mod settings;
mod tokens;
mod users;

use std::sync::Arc;

use axum::{
    Router,
    routing::{delete, get, patch, post, put},
};

use crate::server::AppState;

pub fn admin_router() -> Router<Arc<AppState>> {
    Router::new()
        // User routes
        .route("/users", post(users::create_user))
        .route("/users", get(users::list_users))
        .route("/users/{id}", get(users::get_user))
        .route("/users/{id}", patch(users::update_user))
        .route("/users/{id}", delete(users::delete_user))
        .route("/users/{id}/tokens", get(users::list_user_tokens))
        .route("/users/{id}/tokens", post(users::create_user_token))
        // Site grant routes
        .route("/users/{id}/site-grants", post(grants::create_site_grant))
        .route("/users/{id}/site-grants", get(grants::list_site_grants))
        .route(
            "/users/{id}/site-grants/{site_id}",
            get(grants::get_site_grant),
        )
        .route(
            "/users/{id}/site-grants/{site_id}",
            delete(grants::delete_site_grant),
        )
        // Token routes
        .route("/tokens", get(tokens::list_tokens))
        .route("/tokens/{id}", get(tokens::get_token))
        .route("/tokens/{id}", delete(tokens::delete_token))
        // Settings
        .route("/settings", get(settings::list_settings))
        .route("/settings/{key}", get(settings::get_setting))
        .route("/settings/{key}", put(settings::put_setting))
        .route("/settings/{key}", delete(settings::delete_setting))
}
