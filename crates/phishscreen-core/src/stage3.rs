//! Stage 3: retrieval-augmented LLM detective. Builds a structured prompt
//! from the email and its retrieval context, asks the configured LLM client
//! for a verdict, and parses the response tolerantly — a malformed or
//! missing field degrades to a declared "unknown" value rather than failing
//! the whole stage.

use std::sync::Arc;
use std::time::Instant;

use serde::Deserialize;

use crate::llm_client::LlmClient;
use crate::model::{
    DetectiveVerdict, EmailArtifact, RetrievalContext, Stage3Verdict, StagePrediction, ThreatLevel,
};

const SYSTEM_PROMPT: &str = "You are a phishing and social-engineering detective. You receive an \
email and context about its recipient, and you must decide whether the email is safe, \
suspicious, or a threat. Respond with a single JSON object and nothing else, using exactly \
these keys: verdict (safe|suspicious|threat), threat_level (low|medium|high), confidence \
(0.0-1.0), social_engineering_score (0-100), impersonation_risk (string), personal_context \
(string), tactics_identified (array of short strings), detailed_analysis (string), \
recommended_action (string).";

#[derive(Debug, Deserialize, Default)]
struct RawVerdict {
    verdict: Option<String>,
    threat_level: Option<String>,
    confidence: Option<f64>,
    social_engineering_score: Option<f64>,
    impersonation_risk: Option<String>,
    personal_context: Option<String>,
    tactics_identified: Option<Vec<String>>,
    detailed_analysis: Option<String>,
    recommended_action: Option<String>,
}

pub struct PromptBuilder;

impl PromptBuilder {
    pub fn build(email: &EmailArtifact, context: &RetrievalContext) -> String {
        let conversations = if context.recent_conversations.is_empty() {
            "none".to_string()
        } else {
            context
                .recent_conversations
                .iter()
                .map(|c| format!("- [{}] {}: {}", c.timestamp, c.subject, c.body_snippet))
                .collect::<Vec<_>>()
                .join("\n")
        };

        let suspect = context
            .prior_suspect
            .as_ref()
            .map(|s| {
                format!(
                    "sender previously flagged {} times, threat_level={:?}, tactics seen: {}",
                    s.frequency_count,
                    s.threat_level,
                    s.tactics_used.join(", ")
                )
            })
            .unwrap_or_else(|| "no prior record for this sender".to_string());

        let similar = if context.similar_past_scans.is_empty() {
            "none".to_string()
        } else {
            context
                .similar_past_scans
                .iter()
                .map(|s| format!("- verdict={:?} confidence={:.2}", s.final_verdict, s.confidence_score))
                .collect::<Vec<_>>()
                .join("\n")
        };

        format!(
            "## Email under review\nFrom: {}\nSubject: {}\nDate: {}\n\n{}\n\n\
             ## Recipient context\n{}\n\n## Prior history with this sender\n{}\n\n\
             ## Similar past scans\n{}\n\n\
             Analyze this email for social engineering and phishing tactics. \
             Respond with the JSON object described in your instructions, nothing else.",
            email.sender,
            email.subject,
            email.date,
            email.body,
            context.user_summary,
            suspect,
            similar,
        )
    }
}

pub struct Detective {
    client: Arc<dyn LlmClient>,
    /// Retries for a response that came back but didn't parse as the
    /// expected JSON shape at all (distinct from the transport-level
    /// retries `LlmClient::complete` already performs internally).
    max_parse_retries: u32,
}

impl Detective {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self {
            client,
            max_parse_retries: 2,
        }
    }

    pub fn with_max_parse_retries(mut self, max_parse_retries: u32) -> Self {
        self.max_parse_retries = max_parse_retries;
        self
    }

    pub async fn analyze(
        &self,
        email: &EmailArtifact,
        context: &RetrievalContext,
    ) -> (StagePrediction, Option<DetectiveVerdict>) {
        let start = Instant::now();
        let prompt = PromptBuilder::build(email, context);

        for attempt in 0..=self.max_parse_retries {
            match self.client.complete(SYSTEM_PROMPT, &prompt).await {
                Ok(text) => {
                    if let Some(verdict) = parse_response(&text) {
                        let prediction = StagePrediction::new(
                            3,
                            verdict_str(verdict.verdict),
                            verdict.confidence,
                        )
                        .with_indicators(verdict.tactics_identified.clone())
                        .with_duration_ms(start.elapsed().as_millis() as u64);
                        return (prediction, Some(verdict));
                    }
                    if attempt < self.max_parse_retries {
                        tokio::time::sleep(parse_retry_backoff(attempt)).await;
                        continue;
                    }
                    let prediction = StagePrediction::new(3, "unknown", 0.0)
                        .with_indicators(vec!["llm_response_malformed_after_retries".to_string()])
                        .with_duration_ms(start.elapsed().as_millis() as u64);
                    return (prediction, None);
                }
                Err(err) => {
                    let prediction = StagePrediction::new(3, "unknown", 0.0)
                        .with_indicators(vec![format!("llm_unavailable: {err}")])
                        .with_duration_ms(start.elapsed().as_millis() as u64);
                    return (prediction, None);
                }
            }
        }

        let prediction = StagePrediction::new(3, "unknown", 0.0)
            .with_indicators(vec!["llm_response_malformed_after_retries".to_string()])
            .with_duration_ms(start.elapsed().as_millis() as u64);
        (prediction, None)
    }
}

/// Exponential backoff with full jitter, matching the shape used for
/// transport retries in `llm_client.rs` but scoped to malformed-content
/// retries, which never trip that module's circuit breaker.
fn parse_retry_backoff(attempt: u32) -> std::time::Duration {
    use rand::Rng;
    let base_ms = 200_u64;
    let cap = base_ms * (1_u64 << attempt.min(5));
    let jittered = rand::thread_rng().gen_range(0..=cap);
    std::time::Duration::from_millis(jittered)
}

/// Returns `None` only when the response could not be parsed as a JSON
/// object at all; a parsed object with missing/null fields is tolerated and
/// filled with declared defaults rather than triggering a retry.
fn parse_response(text: &str) -> Option<DetectiveVerdict> {
    let json_slice = extract_json_object(text)?;
    let raw: RawVerdict = serde_json::from_str(json_slice).ok()?;
    Some(finalize(raw))
}

fn finalize(raw: RawVerdict) -> DetectiveVerdict {
    let verdict = match raw.verdict.as_deref() {
        Some("safe") => Stage3Verdict::Safe,
        Some("suspicious") => Stage3Verdict::Suspicious,
        Some("threat") => Stage3Verdict::Threat,
        _ => Stage3Verdict::Unknown,
    };

    let threat_level = match raw.threat_level.as_deref() {
        Some("high") => ThreatLevel::High,
        Some("low") => ThreatLevel::Low,
        _ => ThreatLevel::Medium,
    };

    let tactics: Vec<String> = raw
        .tactics_identified
        .unwrap_or_default()
        .into_iter()
        .filter(|t| !t.trim().is_empty() && !looks_like_section_header(t))
        .collect();

    let raw_score = raw.social_engineering_score.unwrap_or(0.0).clamp(0.0, 100.0);
    let derived_score = (tactics.len() as f64 * 9.0).min(100.0);
    let social_engineering_score = raw_score.max(derived_score);

    DetectiveVerdict {
        verdict,
        threat_level,
        confidence: raw.confidence.unwrap_or(0.0).clamp(0.0, 1.0),
        social_engineering_score,
        impersonation_risk: raw.impersonation_risk.unwrap_or_else(|| "unknown".to_string()),
        personal_context: raw.personal_context.unwrap_or_default(),
        tactics_identified: tactics,
        detailed_analysis: raw.detailed_analysis.unwrap_or_default(),
        recommended_action: raw.recommended_action.unwrap_or_else(|| "review manually".to_string()),
    }
}

fn looks_like_section_header(tactic: &str) -> bool {
    tactic.starts_with('#') || tactic.ends_with(':')
}

fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end > start {
        Some(&text[start..=end])
    } else {
        None
    }
}

fn verdict_str(verdict: Stage3Verdict) -> &'static str {
    match verdict {
        Stage3Verdict::Safe => "safe",
        Stage3Verdict::Suspicious => "suspicious",
        Stage3Verdict::Threat => "threat",
        Stage3Verdict::Unknown => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScreenResult;
    use async_trait::async_trait;
    use chrono::Utc;

    struct CannedClient(String);

    #[async_trait]
    impl LlmClient for CannedClient {
        async fn complete(&self, _system: &str, _user: &str) -> ScreenResult<String> {
            Ok(self.0.clone())
        }
    }

    fn email() -> EmailArtifact {
        EmailArtifact {
            sender: "a@b.com".to_string(),
            subject: "hi".to_string(),
            body: "body".to_string(),
            date: Utc::now(),
            fingerprint: "fp".to_string(),
        }
    }

    fn context() -> RetrievalContext {
        RetrievalContext {
            user_summary: "summary".to_string(),
            recent_conversations: Vec::new(),
            prior_suspect: None,
            similar_past_scans: Vec::new(),
        }
    }

    #[tokio::test]
    async fn well_formed_response_parses_into_verdict() {
        let client = Arc::new(CannedClient(
            r#"{"verdict":"suspicious","threat_level":"low","confidence":0.6,
               "social_engineering_score":35,"impersonation_risk":"none",
               "personal_context":"","tactics_identified":["urgency framing"],
               "detailed_analysis":"...","recommended_action":"verify sender"}"#
                .to_string(),
        ));
        let detective = Detective::new(client);
        let (pred, verdict) = detective.analyze(&email(), &context()).await;
        assert_eq!(pred.status, "suspicious");
        let verdict = verdict.unwrap();
        assert_eq!(verdict.tactics_identified, vec!["urgency framing"]);
    }

    #[tokio::test]
    async fn score_is_raised_to_derived_when_more_tactics_than_raw_score_implies() {
        let client = Arc::new(CannedClient(
            r#"{"verdict":"threat","threat_level":"high","confidence":0.9,
               "social_engineering_score":10,
               "tactics_identified":["urgency","authority","scarcity","fear"]}"#
                .to_string(),
        ));
        let detective = Detective::new(client);
        let (_pred, verdict) = detective.analyze(&email(), &context()).await;
        let verdict = verdict.unwrap();
        assert_eq!(verdict.social_engineering_score, 36.0);
    }

    #[tokio::test]
    async fn malformed_json_degrades_to_unknown_without_panicking() {
        let client = Arc::new(CannedClient("not json at all".to_string()));
        let detective = Detective::new(client).with_max_parse_retries(0);
        let (pred, verdict) = detective.analyze(&email(), &context()).await;
        assert_eq!(pred.status, "unknown");
        assert!(verdict.is_none());
        assert!(pred.indicators.contains(&"llm_response_malformed_after_retries".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_response_is_retried_before_degrading() {
        let call_count = Arc::new(std::sync::atomic::AtomicU32::new(0));

        struct CountingThenValidClient {
            calls: Arc<std::sync::atomic::AtomicU32>,
        }

        #[async_trait]
        impl LlmClient for CountingThenValidClient {
            async fn complete(&self, _system: &str, _user: &str) -> ScreenResult<String> {
                let n = self.calls.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                if n == 0 {
                    Ok("garbled, no json here".to_string())
                } else {
                    Ok(r#"{"verdict":"safe","threat_level":"low","confidence":0.8}"#.to_string())
                }
            }
        }

        let client = Arc::new(CountingThenValidClient {
            calls: call_count.clone(),
        });
        let detective = Detective::new(client);
        let (pred, verdict) = detective.analyze(&email(), &context()).await;
        assert_eq!(pred.status, "safe");
        assert!(verdict.is_some());
        assert_eq!(call_count.load(std::sync::atomic::Ordering::Relaxed), 2);
    }
}
