//! Retrieval context builder: assembles the bounded bundle of user profile,
//! recent conversations, prior suspect record, and similar past scans that
//! the stage-3 detective consults.

use std::sync::Arc;
use std::time::Duration;

use crate::error::ScreenResult;
use crate::model::RetrievalContext;
use crate::store::PersistenceStore;

const MAX_SIMILAR_SCANS: usize = 5;
const MAX_RELEVANT_CONTACTS: usize = 3;

fn domain_of(email: &str) -> Option<&str> {
    email.rsplit('@').next().filter(|d| !d.is_empty())
}

pub struct ContextBuilder {
    store: Arc<dyn PersistenceStore>,
    conversation_retention: Duration,
}

impl ContextBuilder {
    pub fn new(store: Arc<dyn PersistenceStore>, conversation_retention: Duration) -> Self {
        Self {
            store,
            conversation_retention,
        }
    }

    pub async fn build(&self, user_id: &str, sender_identity: &str) -> ScreenResult<RetrievalContext> {
        let profile = self.store.get_profile(user_id).await?;
        let recent_conversations = self
            .store
            .recent_conversations(user_id, sender_identity, self.conversation_retention)
            .await?;
        let prior_suspect = self.store.get_suspect(sender_identity).await?;

        let (scans, _total) = self.store.list_scans(user_id, 50, 0).await?;
        let similar_past_scans = scans
            .into_iter()
            .filter(|s| s.email_sender.eq_ignore_ascii_case(sender_identity))
            .take(MAX_SIMILAR_SCANS)
            .collect();

        let contact_count = profile.contacts.len();
        let org_count = profile.organizations.len();
        let sender_domain = domain_of(sender_identity);
        let relevant_contacts: Vec<&str> = profile
            .contacts
            .iter()
            .filter(|c| sender_domain.is_some() && domain_of(&c.email) == sender_domain)
            .map(|c| c.email.as_str())
            .take(MAX_RELEVANT_CONTACTS)
            .collect();
        let user_summary = format!(
            "user_id={} security_level={:?} contacts={} organizations={} risk_profile={} \
             age_group={} occupation={} tech_savviness={} primary_email_usage={} \
             contacts_relevant_to_sender_domain={}",
            profile.user_id,
            profile.preferences.security_level,
            contact_count,
            org_count,
            profile.risk_profile,
            profile.personal_info.age_group,
            profile.personal_info.occupation,
            profile.personal_info.tech_savviness,
            profile.personal_info.primary_email_usage,
            relevant_contacts.join(","),
        );

        Ok(RetrievalContext {
            user_summary,
            recent_conversations,
            prior_suspect,
            similar_past_scans,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ConversationEntry, ThreatLevel};
    use crate::store::InMemoryStore;
    use chrono::Utc;

    #[tokio::test]
    async fn context_includes_recent_conversations_and_prior_suspect() {
        let store: Arc<dyn PersistenceStore> = Arc::new(InMemoryStore::new());
        store
            .append_conversation(ConversationEntry {
                user_id: "u1".to_string(),
                sender_identity: "bad@evil.com".to_string(),
                subject: "hi".to_string(),
                body_snippet: "snippet".to_string(),
                timestamp: Utc::now(),
                thread_id: None,
            })
            .await
            .unwrap();
        store
            .upsert_suspect("bad@evil.com", ThreatLevel::High, vec!["urgency".into()])
            .await
            .unwrap();

        let builder = ContextBuilder::new(store, Duration::from_secs(36000));
        let ctx = builder.build("u1", "bad@evil.com").await.unwrap();
        assert_eq!(ctx.recent_conversations.len(), 1);
        assert!(ctx.prior_suspect.is_some());
    }

    #[tokio::test]
    async fn user_summary_surfaces_personal_info_and_domain_relevant_contacts() {
        use crate::model::{Contact, PersonalInfo};

        let store: Arc<dyn PersistenceStore> = Arc::new(InMemoryStore::new());
        let mut profile = store.get_profile("u1").await.unwrap();
        profile.personal_info = PersonalInfo {
            age_group: "55-64".to_string(),
            occupation: "retiree".to_string(),
            tech_savviness: "low".to_string(),
            primary_email_usage: "personal".to_string(),
        };
        profile.contacts = vec![
            Contact {
                name: "Pat".to_string(),
                email: "pat@acmebank.com".to_string(),
                relation: "bank manager".to_string(),
            },
            Contact {
                name: "Sam".to_string(),
                email: "sam@unrelated.org".to_string(),
                relation: "friend".to_string(),
            },
        ];
        store.replace_profile(profile).await.unwrap();

        let builder = ContextBuilder::new(store, Duration::from_secs(36000));
        let ctx = builder.build("u1", "alerts@acmebank.com").await.unwrap();

        assert!(ctx.user_summary.contains("age_group=55-64"));
        assert!(ctx.user_summary.contains("occupation=retiree"));
        assert!(ctx.user_summary.contains("pat@acmebank.com"));
        assert!(!ctx.user_summary.contains("sam@unrelated.org"));
    }
}
