//! `/api/feedback`.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use phishscreen_core::feedback::FeedbackAction;
use phishscreen_core::model::UserVerdict;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api_error::ApiError;
use crate::state::ApiState;

pub fn router() -> Router<Arc<ApiState>> {
    Router::new().route("/api/feedback", post(submit_feedback))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct FeedbackRequest {
    pub scan_id: String,
    pub user_verdict: UserVerdict,
    #[serde(default)]
    pub user_action: Option<String>,
    #[serde(default)]
    pub scan_results: Option<serde_json::Value>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct FeedbackResponse {
    pub status: &'static str,
}

#[utoipa::path(
    post,
    path = "/api/feedback",
    request_body = FeedbackRequest,
    responses(
        (status = 200, description = "Feedback recorded", body = FeedbackResponse),
        (status = 404, description = "Scan id not found")
    ),
    tag = "feedback"
)]
pub(crate) async fn submit_feedback(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<FeedbackRequest>,
) -> Result<Json<FeedbackResponse>, ApiError> {
    let action = match request.user_action.as_deref() {
        Some("block_sender") => FeedbackAction::BlockSender,
        Some("trust_sender") => FeedbackAction::TrustSender,
        _ => FeedbackAction::None,
    };

    state
        .feedback
        .submit(&request.scan_id, request.user_verdict, action, request.scan_results)
        .await?;

    Ok(Json(FeedbackResponse { status: "success" }))
}
