//! Shared application state threaded through every axum handler.

use std::sync::Arc;

use phishscreen_core::feedback::FeedbackIntake;
use phishscreen_core::PhishScreen;

pub struct ApiState {
    pub screen: PhishScreen,
    pub feedback: FeedbackIntake,
}

impl ApiState {
    pub fn new(screen: PhishScreen) -> Self {
        let feedback = FeedbackIntake::new(screen.store.clone());
        Self { screen, feedback }
    }
}

pub type SharedState = Arc<ApiState>;
