//! `/api/model/training/{start,status,stop}`.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use phishscreen_core::error::ScreenError;
use phishscreen_core::training::TrainingReport;
use serde::Serialize;
use utoipa::ToSchema;

use crate::api_error::ApiError;
use crate::state::ApiState;

pub fn router() -> Router<Arc<ApiState>> {
    Router::new()
        .route("/api/model/training/start", post(start_training))
        .route("/api/model/training/status", get(training_status))
        .route("/api/model/training/stop", post(stop_training))
}

#[derive(Debug, Serialize, ToSchema)]
#[schema(as = training::StatusResponse)]
pub struct StatusResponse {
    pub status: &'static str,
}

#[utoipa::path(
    post,
    path = "/api/model/training/start",
    responses(
        (status = 200, description = "Training run started or completed inline", body = StatusResponse),
        (status = 412, description = "Readiness preconditions not met")
    ),
    tag = "training"
)]
pub(crate) async fn start_training(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<StatusResponse>, ApiError> {
    let report = state.screen.training.train_and_maybe_swap().await?;
    match report {
        TrainingReport::NotReady { reason } => {
            Err(ApiError(ScreenError::PreconditionNotMet(reason)))
        }
        TrainingReport::NotPromoted { .. } | TrainingReport::Promoted { .. } => {
            Ok(Json(StatusResponse { status: "success" }))
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TrainingStatistics {
    pub labeled_sample_count: usize,
    pub positive_count: usize,
    pub negative_count: usize,
    pub latest_model_version: Option<String>,
    pub latest_f1_score: Option<f64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TrainingStatusResponse {
    pub status: &'static str,
    pub statistics: TrainingStatistics,
    pub readiness: phishscreen_core::training::Readiness,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub training_status: Option<phishscreen_core::training::TrainingStatusSnapshot>,
    pub training_in_progress: bool,
}

#[utoipa::path(
    get,
    path = "/api/model/training/status",
    responses((status = 200, description = "Current readiness and training status", body = TrainingStatusResponse)),
    tag = "training"
)]
pub(crate) async fn training_status(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<TrainingStatusResponse>, ApiError> {
    let readiness = state.screen.training.check_readiness().await?;
    let latest = state.screen.store.latest_performance().await?;
    let statistics = TrainingStatistics {
        labeled_sample_count: readiness.labeled_sample_count,
        positive_count: readiness.positive_count,
        negative_count: readiness.negative_count,
        latest_model_version: latest.as_ref().map(|r| r.model_version.clone()),
        latest_f1_score: latest.as_ref().map(|r| r.f1_score),
    };
    Ok(Json(TrainingStatusResponse {
        status: "ok",
        statistics,
        training_in_progress: state.screen.training_registry.is_in_progress(),
        training_status: state.screen.training_registry.current_status(),
        readiness,
    }))
}

#[utoipa::path(
    post,
    path = "/api/model/training/stop",
    responses(
        (status = 200, description = "Training run stopped", body = StatusResponse),
        (status = 404, description = "No training run in progress")
    ),
    tag = "training"
)]
pub(crate) async fn stop_training(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<StatusResponse>, ApiError> {
    state.screen.training_registry.stop()?;
    Ok(Json(StatusResponse { status: "success" }))
}
