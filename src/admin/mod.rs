//! Admin API.
//!
//! # Responsibilities
//! - Report engine status and the live binding table as JSON
//! - Require a bearer token on every route

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use axum::{middleware, routing::get, Router};
use tower_http::trace::TraceLayer;

use crate::net::connection::ConnectionTracker;
use crate::vhost::ResolutionEngine;

use self::auth::admin_auth_middleware;
use self::handlers::{get_bindings, get_status};

/// State shared by admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub engine: Arc<ResolutionEngine>,
    pub tracker: ConnectionTracker,
    pub api_key: Arc<str>,
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/bindings", get(get_bindings))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
