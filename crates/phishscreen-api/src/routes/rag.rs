//! `/api/rag/status` — retrieval/detective subsystem health and counters.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use utoipa::ToSchema;

use crate::api_error::ApiError;
use crate::state::ApiState;

pub fn router() -> Router<Arc<ApiState>> {
    Router::new().route("/api/rag/status", get(rag_status))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RagStatistics {
    pub latest_model_performance: Option<phishscreen_core::model::ModelPerformanceRecord>,
    pub pipeline_stats: phishscreen_core::pipeline::ScanCountersSnapshot,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RagStatusResponse {
    pub status: &'static str,
    pub statistics: RagStatistics,
}

#[utoipa::path(
    get,
    path = "/api/rag/status",
    responses((status = 200, description = "Retrieval/detective subsystem status", body = RagStatusResponse)),
    tag = "rag"
)]
pub(crate) async fn rag_status(State(state): State<Arc<ApiState>>) -> Result<Json<RagStatusResponse>, ApiError> {
    let latest_model_performance = state.screen.store.latest_performance().await?;
    Ok(Json(RagStatusResponse {
        status: "operational",
        statistics: RagStatistics {
            latest_model_performance,
            pipeline_stats: state.screen.pipeline.counters(),
        },
    }))
}
