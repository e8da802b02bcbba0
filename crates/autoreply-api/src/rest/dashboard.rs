//! Dashboard read handlers

use autoreply_core::{
    AutomationId, AutomationStatus, DispatchResult, ListenerType, MetricsSnapshot, TriggerType,
};
use axum::{
    extract::{rejection::QueryRejection, Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::{AppState, Result};

const DEFAULT_DISPATCH_LIMIT: usize = 50;
const MAX_DISPATCH_LIMIT: usize = 500;

/// Flat automation row for the dashboard table
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationSummary {
    pub id: AutomationId,
    pub name: String,
    pub status: AutomationStatus,
    pub trigger_type: TriggerType,
    pub listener_type: ListenerType,
    pub keywords: Vec<String>,
    pub last_triggered_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DispatchQuery {
    pub limit: Option<usize>,
}

impl DispatchQuery {
    fn limit(&self) -> usize {
        self.limit
            .unwrap_or(DEFAULT_DISPATCH_LIMIT)
            .min(MAX_DISPATCH_LIMIT)
    }
}

pub async fn get_metrics(State(state): State<Arc<AppState>>) -> Json<MetricsSnapshot> {
    Json(state.engine.metrics().snapshot())
}

pub async fn list_automation_summaries(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<AutomationSummary>>> {
    let automations = state.engine.repository().list().await?;
    let summaries = automations
        .into_iter()
        .map(|a| AutomationSummary {
            id: a.id,
            listener_type: a.listener_type(),
            name: a.name,
            status: a.status,
            trigger_type: a.trigger_type,
            keywords: a.keywords,
            last_triggered_at: a.last_triggered_at,
        })
        .collect();
    Ok(Json(summaries))
}

pub async fn list_dispatches(
    State(state): State<Arc<AppState>>,
    query: std::result::Result<Query<DispatchQuery>, QueryRejection>,
) -> Result<Json<Vec<DispatchResult>>> {
    let Query(query) = query?;
    Ok(Json(state.engine.dispatcher().recent(query.limit())))
}
