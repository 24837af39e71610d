//! Core data model shared by every pipeline stage and the persistence store.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Raw email data submitted for a scan, before normalization.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EmailInput {
    pub sender: String,
    pub subject: String,
    pub body: String,
    #[serde(default)]
    pub date: Option<DateTime<Utc>>,
}

/// Normalized, in-flight representation of an email for the duration of one scan.
///
/// Never persisted verbatim; only its fingerprint and truncated snippets survive
/// into a [`ScanRecord`].
#[derive(Debug, Clone)]
pub struct EmailArtifact {
    pub sender: String,
    pub subject: String,
    /// Plain text body, HTML tags stripped.
    pub body: String,
    pub date: DateTime<Utc>,
    pub fingerprint: String,
}

/// Final verdict reached by the orchestrator after fusing stage results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FinalVerdict {
    Safe,
    Suspicious,
    Threat,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ThreatLevel {
    Low,
    Medium,
    High,
}

/// Outcome of the deterministic reputation/pattern filter (stage 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage1Status {
    Clean,
    Suspicious,
    Threat,
}

/// Outcome of the transformer classifier (stage 2), after override application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage2Status {
    /// Benign, confidence below the high-confidence short-circuit threshold.
    Benign,
    /// Malicious or uncertain enough that stage 3 should be consulted.
    Suspicious,
    /// Malicious with decisive confidence or a manual override firing.
    Malicious,
}

/// Stage 3's own verdict vocabulary, distinct from [`FinalVerdict`] so the
/// fusion function is the single place a string-shaped status becomes the
/// common enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage3Verdict {
    Safe,
    Suspicious,
    Threat,
    Unknown,
}

impl From<Stage3Verdict> for FinalVerdict {
    fn from(v: Stage3Verdict) -> Self {
        match v {
            Stage3Verdict::Safe => FinalVerdict::Safe,
            Stage3Verdict::Suspicious => FinalVerdict::Suspicious,
            Stage3Verdict::Threat => FinalVerdict::Threat,
            Stage3Verdict::Unknown => FinalVerdict::Unknown,
        }
    }
}

/// Per-stage prediction attached to a [`ScanRecord`].
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StagePrediction {
    pub stage: u8,
    pub status: String,
    pub confidence: f64,
    pub indicators: Vec<String>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub override_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
    /// Set when stage 2 ran against the rule-based stand-in because no
    /// model artifact was loadable, per the fallback contract in §4.C.
    #[serde(skip_serializing_if = "is_false")]
    pub fallback_mode: bool,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl StagePrediction {
    pub fn new(stage: u8, status: impl Into<String>, confidence: f64) -> Self {
        Self {
            stage,
            status: status.into(),
            confidence,
            indicators: Vec::new(),
            duration_ms: 0,
            override_reason: None,
            model_version: None,
            fallback_mode: false,
        }
    }

    pub fn with_fallback_mode(mut self, fallback_mode: bool) -> Self {
        self.fallback_mode = fallback_mode;
        self
    }

    pub fn with_indicators(mut self, indicators: Vec<String>) -> Self {
        self.indicators = indicators;
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn error(stage: u8, reason: impl Into<String>) -> Self {
        Self::new(stage, "error", 0.0).with_indicators(vec![reason.into()])
    }
}

/// Durable record of one completed scan.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ScanRecord {
    pub scan_id: String,
    pub user_id: String,
    pub email_fingerprint: String,
    pub email_sender: String,
    pub email_subject: String,
    pub final_verdict: FinalVerdict,
    pub threat_level: ThreatLevel,
    pub confidence_score: f64,
    pub stage1: Option<StagePrediction>,
    pub stage2: Option<StagePrediction>,
    pub stage3: Option<StagePrediction>,
    pub processing_time_seconds: f64,
    pub created_at: DateTime<Utc>,
}

/// Aggregate knowledge about a sender who has produced at least one non-safe scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuspectRecord {
    pub sender_identity: String,
    pub tactics_used: Vec<String>,
    pub threat_level: ThreatLevel,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub frequency_count: u64,
    pub target_demographics: HashMap<String, String>,
}

/// A single message exchanged with a sender, retained only within the
/// conversation retention window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub user_id: String,
    pub sender_identity: String,
    pub subject: String,
    pub body_snippet: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Contact {
    pub name: String,
    pub email: String,
    pub relation: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Organization {
    pub name: String,
    pub domain: String,
    #[serde(rename = "type")]
    pub org_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BlockedSender {
    pub email: String,
    pub reason: String,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SecurityLevel {
    Relaxed,
    Balanced,
    Strict,
    Paranoid,
}

impl Default for SecurityLevel {
    fn default() -> Self {
        SecurityLevel::Balanced
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct PersonalInfo {
    #[serde(default)]
    pub age_group: String,
    #[serde(default)]
    pub occupation: String,
    #[serde(default)]
    pub tech_savviness: String,
    #[serde(default)]
    pub primary_email_usage: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UserPreferences {
    #[serde(default)]
    pub security_level: SecurityLevel,
    #[serde(default = "default_true")]
    pub auto_scan: bool,
    #[serde(default)]
    pub notification_frequency: String,
    #[serde(default)]
    pub learning_mode: bool,
    #[serde(default)]
    pub share_threat_intelligence: bool,
}

fn default_true() -> bool {
    true
}

/// A user's accumulated profile, created lazily on first scan.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserProfile {
    pub user_id: String,
    pub personal_info: PersonalInfo,
    pub contacts: Vec<Contact>,
    pub organizations: Vec<Organization>,
    pub blocked_senders: Vec<BlockedSender>,
    pub risk_profile: String,
    pub preferences: UserPreferences,
}

impl UserProfile {
    pub fn default_for(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            personal_info: PersonalInfo::default(),
            contacts: Vec::new(),
            organizations: Vec::new(),
            blocked_senders: Vec::new(),
            risk_profile: "unknown".to_string(),
            preferences: UserPreferences::default(),
        }
    }
}

/// Partial profile update accepted by the profile API; merged shallowly.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct ProfilePatch {
    #[serde(default)]
    pub personal_info: Option<PersonalInfo>,
    #[serde(default)]
    pub risk_profile: Option<String>,
    #[serde(default)]
    pub preferences: Option<UserPreferences>,
}

/// A labeled (or not-yet-labeled) example for stage-2 fine-tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSample {
    pub email_fingerprint: String,
    pub email_text: String,
    pub predicted_label: u8,
    pub predicted_confidence: f64,
    pub actual_label: Option<u8>,
    pub user_feedback: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// An append-only record of one evaluation of a stage-2 model artifact.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ModelPerformanceRecord {
    pub model_version: String,
    pub accuracy: f64,
    pub precision_malicious: f64,
    pub recall_malicious: f64,
    pub f1_score: f64,
    pub evaluated_at: DateTime<Utc>,
}

/// User verdict submitted via the feedback endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum UserVerdict {
    Safe,
    Phishing,
    Spam,
    FalsePositive,
}

impl UserVerdict {
    /// Maps a user verdict to the binary label used for stage-2 training.
    pub fn actual_label(self) -> u8 {
        match self {
            UserVerdict::Phishing | UserVerdict::Spam => 1,
            UserVerdict::Safe | UserVerdict::FalsePositive => 0,
        }
    }
}

/// Bounded context assembled for the stage-3 LLM detective.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalContext {
    pub user_summary: String,
    pub recent_conversations: Vec<ConversationEntry>,
    pub prior_suspect: Option<SuspectRecord>,
    pub similar_past_scans: Vec<ScanRecord>,
}

/// Structured verdict parsed out of the stage-3 LLM response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectiveVerdict {
    pub verdict: Stage3Verdict,
    pub threat_level: ThreatLevel,
    pub confidence: f64,
    pub social_engineering_score: f64,
    pub impersonation_risk: String,
    pub personal_context: String,
    pub tactics_identified: Vec<String>,
    pub detailed_analysis: String,
    pub recommended_action: String,
}
