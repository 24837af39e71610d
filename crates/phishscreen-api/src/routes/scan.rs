//! `/api/scan` and `/api/scan-history/{user_id}`.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use phishscreen_core::model::{EmailInput, ScanRecord};
use phishscreen_core::normalize;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api_error::ApiError;
use crate::state::ApiState;

pub fn router() -> Router<Arc<ApiState>> {
    Router::new()
        .route("/api/scan", post(submit_scan))
        .route("/api/scan-history/:user_id", get(scan_history))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ScanRequest {
    pub email_data: EmailInput,
    pub user_id: String,
    #[serde(default)]
    pub scan_type: Option<String>,
}

#[utoipa::path(
    post,
    path = "/api/scan",
    request_body = ScanRequest,
    responses(
        (status = 200, description = "Scan completed", body = ScanRecord),
        (status = 400, description = "Missing or malformed email fields")
    ),
    tag = "scan"
)]
pub(crate) async fn submit_scan(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<ScanRequest>,
) -> Result<Json<ScanRecord>, ApiError> {
    // Validated at the boundary so missing-field input surfaces as 400 and is
    // never stored, per the adapter contract; `Pipeline::scan` still carries
    // its own fallback to a degraded `unknown` record for direct core callers.
    normalize::validate_required(&request.email_data)?;

    let record = state
        .screen
        .pipeline
        .scan(&request.user_id, request.email_data)
        .await?;
    Ok(Json(record))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ScanHistoryParams {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    20
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ScanHistoryResponse {
    pub scans: Vec<ScanRecord>,
    pub total: usize,
}

#[utoipa::path(
    get,
    path = "/api/scan-history/{user_id}",
    params(("user_id" = String, Path, description = "User to fetch scan history for")),
    responses((status = 200, description = "Paginated scan history", body = ScanHistoryResponse)),
    tag = "scan"
)]
pub(crate) async fn scan_history(
    State(state): State<Arc<ApiState>>,
    Path(user_id): Path<String>,
    Query(params): Query<ScanHistoryParams>,
) -> Result<Json<ScanHistoryResponse>, ApiError> {
    let (scans, total) = state
        .screen
        .store
        .list_scans(&user_id, params.limit, params.offset)
        .await?;
    Ok(Json(ScanHistoryResponse { scans, total }))
}
