//! HTTP surface for the cascaded phishing detection pipeline: axum routes,
//! CORS/tracing middleware, and OpenAPI docs layered around the core
//! `PhishScreen` composition root. Kept as a library so integration tests
//! can drive the router in-process via `tower::ServiceExt::oneshot`.

pub mod api_error;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub use state::ApiState;

/// OpenAPI documentation for the scan, feedback, profile, training, and RAG
/// surfaces.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "PhishScreen API",
        version = "0.1.0",
        description = "Cascaded phishing and social-engineering scan pipeline"
    ),
    paths(
        routes::health::health,
        routes::scan::submit_scan,
        routes::scan::scan_history,
        routes::feedback::submit_feedback,
        routes::user::experience,
        routes::user::patch_profile,
        routes::user::add_contacts,
        routes::user::add_organizations,
        routes::user::dashboard,
        routes::training::start_training,
        routes::training::training_status,
        routes::training::stop_training,
        routes::rag::rag_status,
    ),
    components(
        schemas(
            routes::health::HealthResponse,
            routes::scan::ScanRequest,
            routes::scan::ScanHistoryResponse,
            routes::feedback::FeedbackRequest,
            routes::feedback::FeedbackResponse,
            routes::user::StatusResponse,
            routes::user::ContactsRequest,
            routes::user::OrganizationsRequest,
            routes::user::DashboardResponse,
            routes::training::StatusResponse,
            routes::training::TrainingStatistics,
            routes::training::TrainingStatusResponse,
            routes::rag::RagStatistics,
            routes::rag::RagStatusResponse,
            phishscreen_core::model::EmailInput,
            phishscreen_core::model::FinalVerdict,
            phishscreen_core::model::ThreatLevel,
            phishscreen_core::model::StagePrediction,
            phishscreen_core::model::ScanRecord,
            phishscreen_core::model::Contact,
            phishscreen_core::model::Organization,
            phishscreen_core::model::BlockedSender,
            phishscreen_core::model::SecurityLevel,
            phishscreen_core::model::PersonalInfo,
            phishscreen_core::model::UserPreferences,
            phishscreen_core::model::UserProfile,
            phishscreen_core::model::ProfilePatch,
            phishscreen_core::model::ModelPerformanceRecord,
            phishscreen_core::model::UserVerdict,
            phishscreen_core::pipeline::ScanCountersSnapshot,
            phishscreen_core::training::Readiness,
            phishscreen_core::training::TrainingStatusSnapshot,
            phishscreen_core::training::TrainingPhase,
        )
    ),
    tags(
        (name = "health", description = "Liveness probe"),
        (name = "scan", description = "Email scan submission and history"),
        (name = "feedback", description = "User-verdict feedback intake"),
        (name = "user", description = "User profile, contacts, organizations, dashboard"),
        (name = "training", description = "Stage-2 model training pipeline"),
        (name = "rag", description = "Retrieval/detective subsystem status")
    )
)]
pub struct ApiDoc;

/// Builds the full router. Shared between `main` and integration tests so
/// the middleware stack under test always matches production.
pub fn build_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .merge(routes::health::router())
        .merge(routes::scan::router())
        .merge(routes::feedback::router())
        .merge(routes::user::router())
        .merge(routes::training::router())
        .merge(routes::rag::router())
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .with_state(state)
}
