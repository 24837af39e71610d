//! `/api/user/{user_id}/...` profile, contacts, organizations, and dashboard.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use phishscreen_core::model::{Contact, Organization, ProfilePatch, UserProfile};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api_error::ApiError;
use crate::state::ApiState;

pub fn router() -> Router<Arc<ApiState>> {
    Router::new()
        .route("/api/user/:user_id/experience", get(experience))
        .route("/api/user/:user_id/profile", post(patch_profile))
        .route("/api/user/:user_id/contacts", post(add_contacts))
        .route("/api/user/:user_id/organizations", post(add_organizations))
        .route("/api/user/:user_id/dashboard", get(dashboard))
}

#[utoipa::path(
    get,
    path = "/api/user/{user_id}/experience",
    params(("user_id" = String, Path, description = "User to fetch the profile for")),
    responses((status = 200, description = "Profile, created lazily if absent", body = UserProfile)),
    tag = "user"
)]
pub(crate) async fn experience(
    State(state): State<Arc<ApiState>>,
    Path(user_id): Path<String>,
) -> Result<Json<UserProfile>, ApiError> {
    let profile = state.screen.store.get_profile(&user_id).await?;
    Ok(Json(profile))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StatusResponse {
    pub status: &'static str,
}

#[utoipa::path(
    post,
    path = "/api/user/{user_id}/profile",
    params(("user_id" = String, Path, description = "User whose profile is patched")),
    request_body = ProfilePatch,
    responses((status = 200, description = "Profile patched", body = StatusResponse)),
    tag = "user"
)]
pub(crate) async fn patch_profile(
    State(state): State<Arc<ApiState>>,
    Path(user_id): Path<String>,
    Json(patch): Json<ProfilePatch>,
) -> Result<Json<StatusResponse>, ApiError> {
    let mut profile = state.screen.store.get_profile(&user_id).await?;
    if let Some(personal_info) = patch.personal_info {
        profile.personal_info = personal_info;
    }
    if let Some(risk_profile) = patch.risk_profile {
        profile.risk_profile = risk_profile;
    }
    if let Some(preferences) = patch.preferences {
        profile.preferences = preferences;
    }
    state.screen.store.replace_profile(profile).await?;
    Ok(Json(StatusResponse { status: "success" }))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ContactsRequest {
    pub contacts: Vec<Contact>,
}

#[utoipa::path(
    post,
    path = "/api/user/{user_id}/contacts",
    params(("user_id" = String, Path, description = "User whose contact list is extended")),
    request_body = ContactsRequest,
    responses(
        (status = 200, description = "Contacts added", body = StatusResponse),
        (status = 400, description = "A contact has an invalid email address")
    ),
    tag = "user"
)]
pub(crate) async fn add_contacts(
    State(state): State<Arc<ApiState>>,
    Path(user_id): Path<String>,
    Json(request): Json<ContactsRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    for contact in &request.contacts {
        if !contact.email.contains('@') {
            return Err(phishscreen_core::error::ScreenError::InputError(format!(
                "invalid email: {}",
                contact.email
            ))
            .into());
        }
    }
    let mut profile = state.screen.store.get_profile(&user_id).await?;
    profile.contacts.extend(request.contacts);
    state.screen.store.replace_profile(profile).await?;
    Ok(Json(StatusResponse { status: "success" }))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct OrganizationsRequest {
    pub organizations: Vec<Organization>,
}

#[utoipa::path(
    post,
    path = "/api/user/{user_id}/organizations",
    params(("user_id" = String, Path, description = "User whose organization list is extended")),
    request_body = OrganizationsRequest,
    responses(
        (status = 200, description = "Organizations added", body = StatusResponse),
        (status = 400, description = "An organization has an invalid domain")
    ),
    tag = "user"
)]
pub(crate) async fn add_organizations(
    State(state): State<Arc<ApiState>>,
    Path(user_id): Path<String>,
    Json(request): Json<OrganizationsRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    for org in &request.organizations {
        if org.domain.trim().is_empty() || !org.domain.contains('.') {
            return Err(phishscreen_core::error::ScreenError::InputError(format!(
                "invalid domain: {}",
                org.domain
            ))
            .into());
        }
    }
    let mut profile = state.screen.store.get_profile(&user_id).await?;
    profile.organizations.extend(request.organizations);
    state.screen.store.replace_profile(profile).await?;
    Ok(Json(StatusResponse { status: "success" }))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DashboardResponse {
    pub total_scans: usize,
    pub recent_scans: Vec<phishscreen_core::model::ScanRecord>,
    pub recent_threats: Vec<phishscreen_core::model::ScanRecord>,
    pub pipeline_stats: phishscreen_core::pipeline::ScanCountersSnapshot,
}

#[utoipa::path(
    get,
    path = "/api/user/{user_id}/dashboard",
    params(("user_id" = String, Path, description = "User to summarize scan activity for")),
    responses((status = 200, description = "Aggregated scan history and pipeline counters", body = DashboardResponse)),
    tag = "user"
)]
pub(crate) async fn dashboard(
    State(state): State<Arc<ApiState>>,
    Path(user_id): Path<String>,
) -> Result<Json<DashboardResponse>, ApiError> {
    let (scans, total) = state.screen.store.list_scans(&user_id, 50, 0).await?;
    let recent_threats = scans
        .iter()
        .filter(|s| s.final_verdict != phishscreen_core::model::FinalVerdict::Safe)
        .take(10)
        .cloned()
        .collect();
    let recent_scans = scans.into_iter().take(10).collect();

    Ok(Json(DashboardResponse {
        total_scans: total,
        recent_scans,
        recent_threats,
        pipeline_stats: state.screen.pipeline.counters(),
    }))
}
