use crate::api::AppState;
use crate::error::{AppError, Result};
use crate::metrics;
use crate::search::{FilterSpec, PageRequest, SearchResponse, SuggestField};
use crate::sync::{SourceHealth, SyncCheckpoint, LISTENER_SOURCE, REFRESHER_SOURCE};
use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use validator::Validate;

/// Health check endpoint
pub async fn health_check() -> Result<Json<HealthResponse>> {
    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    }))
}

/// Readiness: unhealthy while a sync source has exhausted its retries
pub async fn readiness_check(State(state): State<AppState>) -> Result<Json<HealthResponse>> {
    if !state.health.all_healthy() {
        return Err(AppError::Unavailable(
            "sync pipeline is unhealthy".to_string(),
        ));
    }
    Ok(Json(HealthResponse {
        status: "ready".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    }))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Filtered prospect search
pub async fn search_prospects(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>> {
    let page = request
        .page
        .unwrap_or(PageRequest::Numbered { size: 25, number: 1 });
    validate_page(&page)?;

    let response = state.search.search(&request.filters, &page).await?;
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    #[serde(default)]
    pub filters: FilterSpec,

    pub page: Option<PageRequest>,
}

fn validate_page(page: &PageRequest) -> Result<()> {
    if page.size() == 0 {
        return Err(AppError::Validation("page size must be at least 1".to_string()));
    }
    if let PageRequest::Numbered { number, .. } = page {
        if *number == 0 {
            return Err(AppError::Validation(
                "page number must be at least 1".to_string(),
            ));
        }
    }
    Ok(())
}

/// Per-field value suggestions
pub async fn suggest_values(
    State(state): State<AppState>,
    Query(params): Query<SuggestQuery>,
) -> Result<Json<SuggestResponse>> {
    params.validate()?;

    let query = params.query.trim();
    if query.is_empty() {
        return Err(AppError::Validation(
            "query must be at least 1 character".to_string(),
        ));
    }

    let limit = params.limit.unwrap_or(10);

    let field = SuggestField::from_str(&params.field).map_err(|_| {
        AppError::Validation(format!(
            "unknown suggestion field '{}'; expected one of company, location, jobTitle, industry",
            params.field
        ))
    })?;

    let suggestions = state.suggestions.suggest(field, query, limit).await?;
    Ok(Json(SuggestResponse { suggestions }))
}

#[derive(Debug, Deserialize, Validate)]
pub struct SuggestQuery {
    pub field: String,

    #[validate(length(min = 1))]
    pub query: String,

    #[validate(range(min = 1, max = 20))]
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct SuggestResponse {
    pub suggestions: Vec<String>,
}

/// Sync pipeline status: checkpoints, health, index stats
pub async fn sync_status(State(state): State<AppState>) -> Result<Json<SyncStatusResponse>> {
    let mut checkpoints = BTreeMap::new();
    for source in [LISTENER_SOURCE, REFRESHER_SOURCE] {
        checkpoints.insert(source.to_string(), state.checkpoints.load(source).await?);
    }

    let stats = state.index.stats()?;

    Ok(Json(SyncStatusResponse {
        checkpoints,
        health: state.health.snapshot(),
        index: IndexStatus {
            total_documents: stats.total_documents,
            index_size_bytes: stats.index_size_bytes,
            num_segments: stats.num_segments,
        },
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatusResponse {
    pub checkpoints: BTreeMap<String, SyncCheckpoint>,
    pub health: BTreeMap<String, SourceHealth>,
    pub index: IndexStatus,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStatus {
    pub total_documents: u64,
    pub index_size_bytes: u64,
    pub num_segments: usize,
}

/// Explicit full re-sync: reset checkpoints and rebuild the index
pub async fn trigger_resync(State(state): State<AppState>) -> Result<Json<ResyncResponse>> {
    let documents = state.refresher.full_resync().await?;
    Ok(Json(ResyncResponse { documents }))
}

#[derive(Debug, Serialize)]
pub struct ResyncResponse {
    pub documents: usize,
}

/// Prometheus metrics in text format
pub async fn metrics_endpoint() -> String {
    metrics::render()
}
