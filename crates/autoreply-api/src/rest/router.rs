//! Axum router configuration

use crate::{
    rest::{automations, dashboard},
    AppState,
};
use axum::{routing::get, Router};
use std::sync::Arc;

/// Create the management API router
pub fn create_router(state: AppState) -> Router {
    let state = Arc::new(state);

    let automation_routes = Router::new()
        .route(
            "/api/automations",
            get(automations::list_automations).post(automations::create_automation),
        )
        .route(
            "/api/automations/:id",
            get(automations::get_automation)
                .put(automations::update_automation)
                .delete(automations::delete_automation),
        );

    let dashboard_routes = Router::new()
        .route("/api/dashboard/metrics", get(dashboard::get_metrics))
        .route(
            "/api/dashboard/automations",
            get(dashboard::list_automation_summaries),
        )
        .route("/api/dashboard/dispatches", get(dashboard::list_dispatches));

    automation_routes.merge(dashboard_routes).with_state(state)
}
