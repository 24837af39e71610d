//! Persistence store: one concurrent collection per durable entity, indexed
//! the way a relational store's indexes would be, built on `dashmap` and
//! `parking_lot` rather than an external database crate.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;

use crate::error::{ScreenError, ScreenResult};
use crate::model::{
    ConversationEntry, ModelPerformanceRecord, ScanRecord, SuspectRecord, ThreatLevel,
    TrainingSample, UserProfile,
};

/// Storage contract consumed by every component that reads or writes durable
/// state. An `Arc<dyn PersistenceStore>` is threaded through the pipeline by
/// construction; there are no module-level singletons.
#[async_trait::async_trait]
pub trait PersistenceStore: Send + Sync {
    async fn put_scan(&self, record: ScanRecord) -> ScreenResult<()>;
    async fn get_scan(&self, scan_id: &str) -> ScreenResult<Option<ScanRecord>>;
    async fn list_scans(&self, user_id: &str, limit: usize, offset: usize) -> ScreenResult<(Vec<ScanRecord>, usize)>;

    async fn upsert_suspect(
        &self,
        sender_identity: &str,
        threat_level: ThreatLevel,
        tactics: Vec<String>,
    ) -> ScreenResult<SuspectRecord>;
    async fn get_suspect(&self, sender_identity: &str) -> ScreenResult<Option<SuspectRecord>>;

    async fn append_conversation(&self, entry: ConversationEntry) -> ScreenResult<()>;
    async fn recent_conversations(
        &self,
        user_id: &str,
        sender_identity: &str,
        window: Duration,
    ) -> ScreenResult<Vec<ConversationEntry>>;

    async fn get_profile(&self, user_id: &str) -> ScreenResult<UserProfile>;
    async fn replace_profile(&self, profile: UserProfile) -> ScreenResult<()>;

    async fn put_training_sample(&self, sample: TrainingSample) -> ScreenResult<()>;
    async fn label_training_sample(
        &self,
        email_fingerprint: &str,
        actual_label: u8,
        feedback: Option<serde_json::Value>,
    ) -> ScreenResult<bool>;
    async fn labeled_training_samples(&self) -> ScreenResult<Vec<TrainingSample>>;
    async fn class_counts(&self) -> ScreenResult<(usize, usize)>;

    async fn append_performance(&self, record: ModelPerformanceRecord) -> ScreenResult<()>;
    async fn latest_performance(&self) -> ScreenResult<Option<ModelPerformanceRecord>>;
}

struct ConversationBucket {
    entries: RwLock<Vec<ConversationEntry>>,
}

/// Default, in-process implementation of [`PersistenceStore`]. Per-key
/// concurrent maps mirror the reputation and blocklist caches this system is
/// modeled on; the training-sample and performance logs are append-only
/// vectors behind a single lock each.
pub struct InMemoryStore {
    scans_by_user: DashMap<String, Vec<ScanRecord>>,
    scans_by_id: DashMap<String, ScanRecord>,
    suspects: DashMap<String, SuspectRecord>,
    conversations: DashMap<(String, String), ConversationBucket>,
    profiles: DashMap<String, UserProfile>,
    training_samples: RwLock<Vec<TrainingSample>>,
    performance_log: RwLock<Vec<ModelPerformanceRecord>>,
    labeled_count: AtomicU64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            scans_by_user: DashMap::new(),
            scans_by_id: DashMap::new(),
            suspects: DashMap::new(),
            conversations: DashMap::new(),
            profiles: DashMap::new(),
            training_samples: RwLock::new(Vec::new()),
            performance_log: RwLock::new(Vec::new()),
            labeled_count: AtomicU64::new(0),
        }
    }

    pub fn labeled_sample_count(&self) -> u64 {
        self.labeled_count.load(Ordering::Relaxed)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl PersistenceStore for InMemoryStore {
    async fn put_scan(&self, record: ScanRecord) -> ScreenResult<()> {
        if self.scans_by_id.contains_key(&record.scan_id) {
            return Err(ScreenError::StoreError(format!(
                "duplicate scan_id: {}",
                record.scan_id
            )));
        }
        self.scans_by_id
            .insert(record.scan_id.clone(), record.clone());
        let mut bucket = self.scans_by_user.entry(record.user_id.clone()).or_default();
        bucket.insert(0, record);
        Ok(())
    }

    async fn get_scan(&self, scan_id: &str) -> ScreenResult<Option<ScanRecord>> {
        Ok(self.scans_by_id.get(scan_id).map(|r| r.clone()))
    }

    async fn list_scans(
        &self,
        user_id: &str,
        limit: usize,
        offset: usize,
    ) -> ScreenResult<(Vec<ScanRecord>, usize)> {
        let bucket = self.scans_by_user.get(user_id);
        let Some(bucket) = bucket else {
            return Ok((Vec::new(), 0));
        };
        let total = bucket.len();
        let page = bucket
            .iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect();
        Ok((page, total))
    }

    async fn upsert_suspect(
        &self,
        sender_identity: &str,
        threat_level: ThreatLevel,
        tactics: Vec<String>,
    ) -> ScreenResult<SuspectRecord> {
        let now = Utc::now();
        let mut entry = self
            .suspects
            .entry(sender_identity.to_string())
            .or_insert_with(|| SuspectRecord {
                sender_identity: sender_identity.to_string(),
                tactics_used: Vec::new(),
                threat_level,
                first_seen: now,
                last_seen: now,
                frequency_count: 0,
                target_demographics: Default::default(),
            });

        entry.last_seen = now;
        entry.frequency_count += 1;
        entry.threat_level = threat_level;
        for tactic in tactics {
            if !entry.tactics_used.contains(&tactic) {
                entry.tactics_used.push(tactic);
            }
        }
        Ok(entry.clone())
    }

    async fn get_suspect(&self, sender_identity: &str) -> ScreenResult<Option<SuspectRecord>> {
        Ok(self.suspects.get(sender_identity).map(|r| r.clone()))
    }

    async fn append_conversation(&self, entry: ConversationEntry) -> ScreenResult<()> {
        let key = (entry.user_id.clone(), entry.sender_identity.clone());
        let bucket = self
            .conversations
            .entry(key)
            .or_insert_with(|| ConversationBucket {
                entries: RwLock::new(Vec::new()),
            });
        bucket.entries.write().insert(0, entry);
        Ok(())
    }

    async fn recent_conversations(
        &self,
        user_id: &str,
        sender_identity: &str,
        window: Duration,
    ) -> ScreenResult<Vec<ConversationEntry>> {
        let key = (user_id.to_string(), sender_identity.to_string());
        let Some(bucket) = self.conversations.get(&key) else {
            return Ok(Vec::new());
        };
        let cutoff = Utc::now() - chrono::Duration::from_std(window).unwrap_or_default();
        let mut entries = bucket.entries.write();
        entries.retain(|e| e.timestamp > cutoff);
        Ok(entries.clone())
    }

    async fn get_profile(&self, user_id: &str) -> ScreenResult<UserProfile> {
        if let Some(profile) = self.profiles.get(user_id) {
            return Ok(profile.clone());
        }
        let profile = UserProfile::default_for(user_id);
        self.profiles.insert(user_id.to_string(), profile.clone());
        Ok(profile)
    }

    async fn replace_profile(&self, profile: UserProfile) -> ScreenResult<()> {
        self.profiles.insert(profile.user_id.clone(), profile);
        Ok(())
    }

    async fn put_training_sample(&self, sample: TrainingSample) -> ScreenResult<()> {
        self.training_samples.write().push(sample);
        Ok(())
    }

    async fn label_training_sample(
        &self,
        email_fingerprint: &str,
        actual_label: u8,
        feedback: Option<serde_json::Value>,
    ) -> ScreenResult<bool> {
        let mut samples = self.training_samples.write();
        let target = samples
            .iter_mut()
            .rev()
            .find(|s| s.email_fingerprint == email_fingerprint && s.actual_label.is_none());
        match target {
            Some(sample) => {
                sample.actual_label = Some(actual_label);
                sample.user_feedback = feedback;
                self.labeled_count.fetch_add(1, Ordering::Relaxed);
                Ok(true)
            }
            None => {
                let already_labeled = samples
                    .iter()
                    .any(|s| s.email_fingerprint == email_fingerprint);
                Ok(already_labeled)
            }
        }
    }

    async fn labeled_training_samples(&self) -> ScreenResult<Vec<TrainingSample>> {
        Ok(self
            .training_samples
            .read()
            .iter()
            .filter(|s| s.actual_label.is_some())
            .cloned()
            .collect())
    }

    async fn class_counts(&self) -> ScreenResult<(usize, usize)> {
        let samples = self.training_samples.read();
        let positives = samples
            .iter()
            .filter(|s| s.actual_label == Some(1))
            .count();
        let negatives = samples
            .iter()
            .filter(|s| s.actual_label == Some(0))
            .count();
        Ok((positives, negatives))
    }

    async fn append_performance(&self, record: ModelPerformanceRecord) -> ScreenResult<()> {
        self.performance_log.write().push(record);
        Ok(())
    }

    async fn latest_performance(&self) -> ScreenResult<Option<ModelPerformanceRecord>> {
        Ok(self.performance_log.read().last().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FinalVerdict, ThreatLevel};

    fn sample_scan(scan_id: &str, user_id: &str) -> ScanRecord {
        ScanRecord {
            scan_id: scan_id.to_string(),
            user_id: user_id.to_string(),
            email_fingerprint: "fp".to_string(),
            email_sender: "a@b.com".to_string(),
            email_subject: "hi".to_string(),
            final_verdict: FinalVerdict::Safe,
            threat_level: ThreatLevel::Low,
            confidence_score: 0.9,
            stage1: None,
            stage2: None,
            stage3: None,
            processing_time_seconds: 0.01,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn put_then_list_round_trips() {
        let store = InMemoryStore::new();
        store.put_scan(sample_scan("s1", "u1")).await.unwrap();
        let (scans, total) = store.list_scans("u1", 10, 0).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(scans[0].scan_id, "s1");
    }

    #[tokio::test]
    async fn duplicate_scan_id_is_rejected() {
        let store = InMemoryStore::new();
        store.put_scan(sample_scan("s1", "u1")).await.unwrap();
        let err = store.put_scan(sample_scan("s1", "u1")).await.unwrap_err();
        assert!(matches!(err, ScreenError::StoreError(_)));
    }

    #[tokio::test]
    async fn suspect_upsert_preserves_first_seen_and_increments_frequency() {
        let store = InMemoryStore::new();
        let first = store
            .upsert_suspect("bad@evil.com", ThreatLevel::High, vec!["urgency".into()])
            .await
            .unwrap();
        let second = store
            .upsert_suspect("bad@evil.com", ThreatLevel::High, vec!["impersonation".into()])
            .await
            .unwrap();
        assert_eq!(first.first_seen, second.first_seen);
        assert_eq!(second.frequency_count, 2);
        assert_eq!(second.tactics_used.len(), 2);
    }

    #[tokio::test]
    async fn label_training_sample_is_idempotent() {
        let store = InMemoryStore::new();
        store
            .put_training_sample(TrainingSample {
                email_fingerprint: "fp1".to_string(),
                email_text: "text".to_string(),
                predicted_label: 1,
                predicted_confidence: 0.7,
                actual_label: None,
                user_feedback: None,
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        let first = store
            .label_training_sample("fp1", 0, None)
            .await
            .unwrap();
        let second = store
            .label_training_sample("fp1", 0, None)
            .await
            .unwrap();
        assert!(first);
        assert!(second);
        assert_eq!(store.labeled_sample_count(), 1);
    }
}
