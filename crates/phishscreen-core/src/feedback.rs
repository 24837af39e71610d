//! Feedback intake: binds a user's verdict to a prior scan's training sample
//! and, when the user blocks or trusts a sender, updates their profile.

use std::sync::Arc;

use chrono::Utc;

use crate::error::{ScreenError, ScreenResult};
use crate::model::{BlockedSender, UserVerdict};
use crate::store::PersistenceStore;

/// Action accompanying a feedback submission, distinct from the verdict
/// itself: a user can mark an email phishing without necessarily blocking
/// the sender, or vice versa.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackAction {
    None,
    BlockSender,
    TrustSender,
}

pub struct FeedbackIntake {
    store: Arc<dyn PersistenceStore>,
}

impl FeedbackIntake {
    pub fn new(store: Arc<dyn PersistenceStore>) -> Self {
        Self { store }
    }

    pub async fn submit(
        &self,
        scan_id: &str,
        user_verdict: UserVerdict,
        action: FeedbackAction,
        feedback_blob: Option<serde_json::Value>,
    ) -> ScreenResult<()> {
        let scan = self
            .store
            .get_scan(scan_id)
            .await?
            .ok_or_else(|| ScreenError::NotFound(format!("scan {scan_id}")))?;

        let actual_label = user_verdict.actual_label();
        self.store
            .label_training_sample(&scan.email_fingerprint, actual_label, feedback_blob)
            .await?;

        match action {
            FeedbackAction::BlockSender => {
                let mut profile = self.store.get_profile(&scan.user_id).await?;
                if !profile
                    .blocked_senders
                    .iter()
                    .any(|b| b.email.eq_ignore_ascii_case(&scan.email_sender))
                {
                    profile.blocked_senders.push(BlockedSender {
                        email: scan.email_sender.clone(),
                        reason: format!("{user_verdict:?}"),
                        added_at: Utc::now(),
                    });
                    self.store.replace_profile(profile).await?;
                }
            }
            FeedbackAction::TrustSender => {
                let mut profile = self.store.get_profile(&scan.user_id).await?;
                if !profile
                    .contacts
                    .iter()
                    .any(|c| c.email.eq_ignore_ascii_case(&scan.email_sender))
                {
                    profile.contacts.push(crate::model::Contact {
                        name: scan.email_sender.clone(),
                        email: scan.email_sender.clone(),
                        relation: "trusted_by_feedback".to_string(),
                    });
                    self.store.replace_profile(profile).await?;
                }
            }
            FeedbackAction::None => {}
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FinalVerdict, ScanRecord, ThreatLevel, TrainingSample};
    use crate::store::InMemoryStore;

    async fn seeded_store() -> Arc<dyn PersistenceStore> {
        let store: Arc<dyn PersistenceStore> = Arc::new(InMemoryStore::new());
        store
            .put_scan(ScanRecord {
                scan_id: "scan_1".to_string(),
                user_id: "u1".to_string(),
                email_fingerprint: "fp1".to_string(),
                email_sender: "maybe@example.com".to_string(),
                email_subject: "hi".to_string(),
                final_verdict: FinalVerdict::Suspicious,
                threat_level: ThreatLevel::Low,
                confidence_score: 0.6,
                stage1: None,
                stage2: None,
                stage3: None,
                processing_time_seconds: 0.1,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        store
            .put_training_sample(TrainingSample {
                email_fingerprint: "fp1".to_string(),
                email_text: "text".to_string(),
                predicted_label: 1,
                predicted_confidence: 0.6,
                actual_label: None,
                user_feedback: None,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn feedback_labels_the_matching_training_sample() {
        let store = seeded_store().await;
        let intake = FeedbackIntake::new(store.clone());
        intake
            .submit("scan_1", UserVerdict::FalsePositive, FeedbackAction::None, None)
            .await
            .unwrap();

        let labeled = store.labeled_training_samples().await.unwrap();
        assert_eq!(labeled.len(), 1);
        assert_eq!(labeled[0].actual_label, Some(0));
    }

    #[tokio::test]
    async fn blocking_a_sender_updates_profile_once() {
        let store = seeded_store().await;
        let intake = FeedbackIntake::new(store.clone());
        intake
            .submit("scan_1", UserVerdict::Phishing, FeedbackAction::BlockSender, None)
            .await
            .unwrap();
        intake
            .submit("scan_1", UserVerdict::Phishing, FeedbackAction::BlockSender, None)
            .await
            .unwrap();

        let profile = store.get_profile("u1").await.unwrap();
        assert_eq!(profile.blocked_senders.len(), 1);
    }

    #[tokio::test]
    async fn unknown_scan_id_is_rejected() {
        let store: Arc<dyn PersistenceStore> = Arc::new(InMemoryStore::new());
        let intake = FeedbackIntake::new(store);
        let err = intake
            .submit("missing", UserVerdict::Safe, FeedbackAction::None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ScreenError::NotFound(_)));
    }
}
