//! In-process integration tests against the axum router, exercising it the
//! way a real HTTP client would without binding a socket.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use phishscreen_api::{build_router, ApiState};
use phishscreen_core::config::PipelineConfig;
use phishscreen_core::PhishScreen;
use tower::ServiceExt;

fn test_state() -> Arc<ApiState> {
    Arc::new(ApiState::new(PhishScreen::new(PipelineConfig::default())))
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_endpoint_reports_ok() {
    let app = build_router(test_state());
    let response = app
        .oneshot(Request::builder().uri("/api/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn known_blocklist_scenario_short_circuits_to_threat() {
    let app = build_router(test_state());
    let scan_body = serde_json::json!({
        "email_data": {
            "sender": "agent@irs-verify.net",
            "subject": "IRS: Verify your SSN within 24 hours",
            "body": "Please provide your social security number immediately."
        },
        "user_id": "u1"
    });
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/scan")
                .header("content-type", "application/json")
                .body(Body::from(scan_body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let record = body_json(response).await;
    assert_eq!(record["final_verdict"], "threat");
    assert_eq!(record["confidence_score"], 0.95);
    assert!(record["stage3"].is_null());
}

#[tokio::test]
async fn scan_with_missing_sender_is_rejected_and_never_stored() {
    let app = build_router(test_state());
    let scan_body = serde_json::json!({
        "email_data": {
            "sender": "",
            "subject": "hi",
            "body": "body"
        },
        "user_id": "u1"
    });
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/scan")
                .header("content-type", "application/json")
                .body(Body::from(scan_body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/scan-history/u1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let history = body_json(response).await;
    assert_eq!(history["total"], 0);
}

#[tokio::test]
async fn scan_then_history_round_trips_through_the_router() {
    let app = build_router(test_state());

    let scan_body = serde_json::json!({
        "email_data": {
            "sender": "friend@gmail.com",
            "subject": "Lunch tomorrow?",
            "body": "Want to grab lunch at noon?"
        },
        "user_id": "u1"
    });
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/scan")
                .header("content-type", "application/json")
                .body(Body::from(scan_body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let record = body_json(response).await;
    let scan_id = record["scan_id"].as_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/scan-history/u1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let history = body_json(response).await;
    assert_eq!(history["total"], 1);
    assert_eq!(history["scans"][0]["scan_id"], scan_id);
}

#[tokio::test]
async fn feedback_for_unknown_scan_is_not_found() {
    let app = build_router(test_state());
    let body = serde_json::json!({"scan_id": "missing", "user_verdict": "safe"});
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/feedback")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn feedback_round_trip_labels_the_training_sample() {
    let app = build_router(test_state());

    let scan_body = serde_json::json!({
        "email_data": {
            "sender": "maybe@example.com",
            "subject": "quick question",
            "body": "urgent, limited time, act now"
        },
        "user_id": "u1"
    });
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/scan")
                .header("content-type", "application/json")
                .body(Body::from(scan_body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let record = body_json(response).await;
    let scan_id = record["scan_id"].as_str().unwrap().to_string();

    let feedback_body = serde_json::json!({
        "scan_id": scan_id,
        "user_verdict": "false_positive",
    });
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/feedback")
                .header("content-type", "application/json")
                .body(Body::from(feedback_body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "success");
}

#[tokio::test]
async fn user_profile_is_created_lazily_and_round_trips_a_patch() {
    let app = build_router(test_state());

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/user/u1/experience")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let profile = body_json(response).await;
    assert_eq!(profile["user_id"], "u1");

    let patch = serde_json::json!({"risk_profile": "low"});
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/user/u1/profile")
                .header("content-type", "application/json")
                .body(Body::from(patch.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/user/u1/experience")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let profile = body_json(response).await;
    assert_eq!(profile["risk_profile"], "low");
}

#[tokio::test]
async fn adding_a_contact_with_an_invalid_email_is_rejected() {
    let app = build_router(test_state());
    let body = serde_json::json!({"contacts": [{"name": "Bad", "email": "not-an-email", "relation": "friend"}]});
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/user/u1/contacts")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn training_start_is_refused_before_preconditions_are_met() {
    let app = build_router(test_state());
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/model/training/start")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);
}

#[tokio::test]
async fn training_stop_with_no_run_in_progress_is_not_found() {
    let app = build_router(test_state());
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/model/training/stop")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn rag_status_reports_operational() {
    let app = build_router(test_state());
    let response = app
        .oneshot(Request::builder().uri("/api/rag/status").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "operational");
}
