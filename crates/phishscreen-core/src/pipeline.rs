//! Pipeline orchestrator: drives the stage sequence, applies the
//! short-circuit/fusion policy, stamps the scan record, and writes results.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use utoipa::ToSchema;

use crate::config::PipelineConfig;
use crate::error::ScreenResult;
use crate::model::{
    ConversationEntry, EmailInput, FinalVerdict, ScanRecord, Stage2Status, StagePrediction,
    ThreatLevel,
};
use crate::normalize;
use crate::retrieval::ContextBuilder;
use crate::stage1::ReputationFilter;
use crate::stage2::TransformerClassifier;
use crate::stage3::Detective;
use crate::store::PersistenceStore;

const SUBJECT_SNIPPET_LEN: usize = 200;
const BODY_SNIPPET_LEN: usize = 300;

/// Process-wide scan counters, in the shape of the reference crate's
/// `GatewayStats`: plain atomics readers snapshot for the dashboard and
/// `/api/rag/status` rather than a mutex-guarded struct.
#[derive(Default)]
pub struct ScanCounters {
    total_scans: AtomicU64,
    stage1_short_circuits: AtomicU64,
    stage2_short_circuits: AtomicU64,
    stage3_invocations: AtomicU64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ScanCountersSnapshot {
    pub total_scans: u64,
    pub stage1_short_circuits: u64,
    pub stage2_short_circuits: u64,
    pub stage3_invocations: u64,
}

impl ScanCounters {
    pub fn snapshot(&self) -> ScanCountersSnapshot {
        ScanCountersSnapshot {
            total_scans: self.total_scans.load(Ordering::Relaxed),
            stage1_short_circuits: self.stage1_short_circuits.load(Ordering::Relaxed),
            stage2_short_circuits: self.stage2_short_circuits.load(Ordering::Relaxed),
            stage3_invocations: self.stage3_invocations.load(Ordering::Relaxed),
        }
    }
}

pub struct Pipeline {
    config: PipelineConfig,
    store: Arc<dyn PersistenceStore>,
    stage1: ReputationFilter,
    stage2: TransformerClassifier,
    context_builder: ContextBuilder,
    detective: Detective,
    counters: ScanCounters,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        store: Arc<dyn PersistenceStore>,
        stage1: ReputationFilter,
        stage2: TransformerClassifier,
        detective: Detective,
    ) -> Self {
        let context_builder = ContextBuilder::new(store.clone(), config.conversation_retention);
        Self {
            config,
            store,
            stage1,
            stage2,
            context_builder,
            detective,
            counters: ScanCounters::default(),
        }
    }

    pub fn counters(&self) -> ScanCountersSnapshot {
        self.counters.snapshot()
    }

    pub async fn scan(&self, user_id: &str, input: EmailInput) -> ScreenResult<ScanRecord> {
        self.counters.total_scans.fetch_add(1, Ordering::Relaxed);
        let scan_started = Instant::now();
        let scan_id = format!("scan_{}_{}", Utc::now().timestamp_millis(), user_id);

        let email = match normalize::normalize(input) {
            Ok(e) => e,
            Err(_) => {
                return Ok(self.unknown_record(
                    &scan_id,
                    user_id,
                    "unknown",
                    "(unavailable)",
                    vec!["input_insufficient".to_string()],
                    scan_started,
                ));
            }
        };

        let mut stage1_pred = None;
        let mut stage2_pred = None;
        let mut stage3_pred = None;
        let mut tactics_for_suspect: Vec<String> = Vec::new();

        let mut final_verdict = FinalVerdict::Unknown;
        let mut threat_level = ThreatLevel::Medium;
        let mut confidence_score = 0.0_f64;
        let mut decided = false;

        if self.config.stage1_enabled {
            let pred = self.stage1.classify(&email);
            if pred.status == "threat" {
                final_verdict = FinalVerdict::Threat;
                threat_level = ThreatLevel::High;
                confidence_score = pred.confidence;
                tactics_for_suspect.extend(pred.indicators.clone());
                decided = true;
                self.counters.stage1_short_circuits.fetch_add(1, Ordering::Relaxed);
                tracing::info!(scan_id = %scan_id, confidence = pred.confidence, "stage1 short-circuited to threat");
            }
            stage1_pred = Some(pred);
        }

        if !decided && self.config.stage2_enabled {
            let stage2 = &self.stage2;
            let outcome = tokio::time::timeout(
                self.config.stage2_timeout,
                async { stage2.classify(&email) },
            )
            .await;

            match outcome {
                Ok((pred, _label, confidence)) => {
                    self.write_training_sample(&email, &pred).await;

                    let decisive_benign =
                        pred.status == "benign" && confidence >= self.config.high_confidence_threshold;
                    let decisive_malicious =
                        pred.override_reason.is_some() || confidence >= 0.9;

                    if decisive_benign {
                        final_verdict = FinalVerdict::Safe;
                        threat_level = ThreatLevel::Low;
                        confidence_score = confidence;
                        decided = true;
                        self.counters.stage2_short_circuits.fetch_add(1, Ordering::Relaxed);
                    } else if decisive_malicious {
                        final_verdict = FinalVerdict::Threat;
                        threat_level = ThreatLevel::High;
                        confidence_score = confidence;
                        tactics_for_suspect.extend(pred.indicators.clone());
                        decided = true;
                        self.counters.stage2_short_circuits.fetch_add(1, Ordering::Relaxed);
                    }

                    stage2_pred = Some(pred);
                }
                Err(_elapsed) => {
                    stage2_pred = Some(StagePrediction::new(2, "timeout", 0.0).with_indicators(vec![
                        format!("exceeded {}ms budget", self.config.stage2_timeout.as_millis()),
                    ]));
                }
            }
        }

        if !decided && self.config.stage3_enabled {
            self.counters.stage3_invocations.fetch_add(1, Ordering::Relaxed);
            let context = self
                .context_builder
                .build(user_id, &email.sender)
                .await
                .unwrap_or_else(|_| crate::model::RetrievalContext {
                    user_summary: String::new(),
                    recent_conversations: Vec::new(),
                    prior_suspect: None,
                    similar_past_scans: Vec::new(),
                });

            match tokio::time::timeout(self.config.stage3_timeout, self.detective.analyze(&email, &context)).await {
                Ok((pred, verdict)) => {
                    if let Some(v) = verdict {
                        final_verdict = v.verdict.into();
                        threat_level = v.threat_level;
                        confidence_score = v.confidence;
                        tactics_for_suspect.extend(v.tactics_identified.clone());
                    } else {
                        final_verdict = FinalVerdict::Unknown;
                        threat_level = ThreatLevel::Medium;
                        confidence_score = 0.0;
                    }
                    stage3_pred = Some(pred);
                }
                Err(_elapsed) => {
                    stage3_pred = Some(StagePrediction::new(3, "timeout", 0.0).with_indicators(vec![format!(
                        "exceeded {}ms budget",
                        self.config.stage3_timeout.as_millis()
                    )]));
                    final_verdict = FinalVerdict::Unknown;
                    threat_level = ThreatLevel::Medium;
                    confidence_score = 0.0;
                }
            }
            decided = true;
        }

        if !decided {
            final_verdict = FinalVerdict::Unknown;
            confidence_score = 0.0;
        }

        let record = ScanRecord {
            scan_id: scan_id.clone(),
            user_id: user_id.to_string(),
            email_fingerprint: email.fingerprint.clone(),
            email_sender: email.sender.clone(),
            email_subject: truncate(&email.subject, SUBJECT_SNIPPET_LEN),
            final_verdict,
            threat_level,
            confidence_score,
            stage1: stage1_pred,
            stage2: stage2_pred,
            stage3: stage3_pred,
            processing_time_seconds: scan_started.elapsed().as_secs_f64(),
            created_at: Utc::now(),
        };

        tracing::info!(
            scan_id = %scan_id,
            user_id = %user_id,
            final_verdict = ?final_verdict,
            confidence_score,
            processing_time_seconds = record.processing_time_seconds,
            "scan complete"
        );

        self.store.put_scan(record.clone()).await?;

        if final_verdict != FinalVerdict::Safe {
            let _ = self
                .store
                .upsert_suspect(&email.sender, threat_level, tactics_for_suspect)
                .await;
        }

        let _ = self
            .store
            .append_conversation(ConversationEntry {
                user_id: user_id.to_string(),
                sender_identity: email.sender.clone(),
                subject: email.subject.clone(),
                body_snippet: truncate(&email.body, BODY_SNIPPET_LEN),
                timestamp: Utc::now(),
                thread_id: None,
            })
            .await;

        Ok(record)
    }

    async fn write_training_sample(&self, email: &crate::model::EmailArtifact, pred: &StagePrediction) {
        let predicted_label = if pred.status == "malicious" { 1 } else { 0 };
        let sample = crate::model::TrainingSample {
            email_fingerprint: email.fingerprint.clone(),
            email_text: format!("Subject: {}\nFrom: {}\n\n{}", email.subject, email.sender, email.body),
            predicted_label,
            predicted_confidence: pred.confidence,
            actual_label: None,
            user_feedback: None,
            created_at: Utc::now(),
        };
        let _ = self.store.put_training_sample(sample).await;
    }

    fn unknown_record(
        &self,
        scan_id: &str,
        user_id: &str,
        sender: &str,
        subject: &str,
        indicators: Vec<String>,
        started: Instant,
    ) -> ScanRecord {
        ScanRecord {
            scan_id: scan_id.to_string(),
            user_id: user_id.to_string(),
            email_fingerprint: String::new(),
            email_sender: sender.to_string(),
            email_subject: subject.to_string(),
            final_verdict: FinalVerdict::Unknown,
            threat_level: ThreatLevel::Medium,
            confidence_score: 0.0,
            stage1: Some(StagePrediction::new(1, "skipped", 0.0).with_indicators(indicators)),
            stage2: None,
            stage3: None,
            processing_time_seconds: started.elapsed().as_secs_f64(),
            created_at: Utc::now(),
        }
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        s.chars().take(max_chars).collect()
    }
}

/// Maps a stage-2 routing status back onto the shared vocabulary used for
/// logging/metrics; kept separate from the tagged enum so call sites never
/// compare strings across stage boundaries.
pub fn stage2_status_label(status: Stage2Status) -> &'static str {
    crate::stage2::status_str(status)
}
