//! Binary entry point: loads configuration, wires the composition root, and
//! serves the axum router built in `lib.rs`.

use std::sync::Arc;

use phishscreen_api::{build_router, ApiState};
use phishscreen_core::config::PipelineConfig;
use phishscreen_core::PhishScreen;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = PipelineConfig::from_env();
    let screen = PhishScreen::new(config);
    let state = Arc::new(ApiState::new(screen));

    let app = build_router(state);

    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    tracing::info!(%addr, "phishscreen-api listening");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind listener");
    axum::serve(listener, app).await.expect("server error");
}
