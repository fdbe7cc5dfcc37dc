use axum::{extract::State, Json};
use serde::Serialize;

use crate::admin::AdminState;
use crate::vhost::BindingSnapshot;

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub engine_enabled: bool,
    pub template: Option<String>,
    pub log: Option<String>,
    pub primary_server: String,
    pub bindings: usize,
    pub active_connections: u64,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let engine = state.engine.state();
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        engine_enabled: engine.enabled(),
        template: engine.template().map(|t| t.to_string()),
        log: engine.log().path().map(|p| p.display().to_string()),
        primary_server: engine.primary().name.clone(),
        bindings: engine.table().len(),
        active_connections: state.tracker.active_count(),
    })
}

pub async fn get_bindings(State(state): State<AdminState>) -> Json<Vec<BindingSnapshot>> {
    Json(state.engine.state().table().snapshot())
}
