//! Stage 1: deterministic reputation/pattern filter.
//!
//! Hash/blocklist lookup plus a declared list of regex patterns. Must stay
//! O(len(body)) and must never perform network I/O, so a scan can short
//! circuit here cheaply before any model or LLM cost is paid.

use std::collections::HashSet;
use std::time::Instant;

use regex::RegexSet;

use crate::model::{EmailArtifact, Stage1Status, StagePrediction};

const THREAT_INDICATOR_THRESHOLD: usize = 3;

/// Deterministic first-pass filter. Cheap to construct; holds no async state.
pub struct ReputationFilter {
    known_threat_fingerprints: HashSet<String>,
    patterns: RegexSet,
    pattern_labels: Vec<&'static str>,
}

impl ReputationFilter {
    pub fn new() -> Self {
        let (patterns, pattern_labels) = default_patterns();
        Self {
            known_threat_fingerprints: HashSet::new(),
            patterns,
            pattern_labels,
        }
    }

    /// Seeds the known-threat fingerprint set, e.g. from a feed or prior scans.
    pub fn with_known_threats(mut self, fingerprints: impl IntoIterator<Item = String>) -> Self {
        self.known_threat_fingerprints.extend(fingerprints);
        self
    }

    pub fn block_fingerprint(&mut self, fingerprint: String) {
        self.known_threat_fingerprints.insert(fingerprint);
    }

    pub fn classify(&self, email: &EmailArtifact) -> StagePrediction {
        let start = Instant::now();

        if self.known_threat_fingerprints.contains(&email.fingerprint) {
            return StagePrediction::new(1, status_str(Stage1Status::Threat), 1.0)
                .with_indicators(vec!["known_threat_fingerprint".to_string()])
                .with_duration_ms(start.elapsed().as_millis() as u64);
        }

        let haystack = format!("{}\n{}\n{}", email.sender, email.subject, email.body);
        let matches: Vec<&'static str> = self
            .patterns
            .matches(&haystack)
            .into_iter()
            .map(|idx| self.pattern_labels[idx])
            .collect();

        let count = matches.len();
        let status = if count >= THREAT_INDICATOR_THRESHOLD {
            Stage1Status::Threat
        } else if count >= 1 {
            Stage1Status::Suspicious
        } else {
            Stage1Status::Clean
        };

        // Monotonic, saturating confidence: more indicators, more confident.
        let confidence = (count as f64 / THREAT_INDICATOR_THRESHOLD as f64).min(1.0);

        StagePrediction::new(1, status_str(status), confidence)
            .with_indicators(matches.into_iter().map(str::to_string).collect())
            .with_duration_ms(start.elapsed().as_millis() as u64)
    }
}

impl Default for ReputationFilter {
    fn default() -> Self {
        Self::new()
    }
}

fn status_str(status: Stage1Status) -> &'static str {
    match status {
        Stage1Status::Clean => "clean",
        Stage1Status::Suspicious => "suspicious",
        Stage1Status::Threat => "threat",
    }
}

fn default_patterns() -> (RegexSet, Vec<&'static str>) {
    let raw: Vec<(&str, &str)> = vec![
        (r"(?i)verify your account", "account_verification_lure"),
        (r"(?i)suspended? (your|the) account", "account_suspension_threat"),
        (r"(?i)click here (immediately|now|to)", "urgent_click_lure"),
        (r"(?i)(wire transfer|bank transfer) (urgent|immediately)", "urgent_wire_request"),
        (r"(?i)your (package|parcel) (could not|failed to)", "delivery_scam"),
        (r"(?i)(unusual|suspicious) (sign[- ]?in|login) attempt", "fake_security_alert"),
        (r"(?i)update your (payment|billing) (information|details)", "payment_update_lure"),
        (r"(?i)(lottery|prize|winner).{0,20}(claim|collect)", "lottery_scam"),
        (r"(?i)this is not a (scam|phishing)", "scam_disclaimer_tell"),
        (r"https?://[\w.-]+\.(?:tk|ml|ga|cf|gq|xyz|top|work|click|link)\b", "suspicious_tld_link"),
        (r"(?i)enter your (password|pin|ssn|social security)", "credential_harvest_request"),
        (r"(?i)dear (valued )?customer", "generic_salutation"),
    ];
    let patterns: Vec<&str> = raw.iter().map(|(p, _)| *p).collect();
    let labels: Vec<&'static str> = raw.iter().map(|(_, l)| *l).collect();
    (RegexSet::new(patterns).expect("default stage-1 patterns must compile"), labels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn email(sender: &str, subject: &str, body: &str) -> EmailArtifact {
        EmailArtifact {
            sender: sender.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
            date: Utc::now(),
            fingerprint: "fp-test".to_string(),
        }
    }

    #[test]
    fn clean_email_has_no_indicators() {
        let filter = ReputationFilter::new();
        let pred = filter.classify(&email("friend@gmail.com", "Lunch tomorrow?", "Want to grab lunch?"));
        assert_eq!(pred.status, "clean");
        assert_eq!(pred.confidence, 0.0);
    }

    #[test]
    fn multiple_lures_cross_threat_threshold() {
        let filter = ReputationFilter::new();
        let pred = filter.classify(&email(
            "agent@irs-verify.net",
            "Your account will be suspended",
            "Click here immediately to verify your account and enter your password.",
        ));
        assert_eq!(pred.status, "threat");
        assert!(pred.confidence >= 1.0 - f64::EPSILON * 10.0 || pred.confidence >= 1.0);
    }

    #[test]
    fn known_fingerprint_short_circuits_to_threat() {
        let filter = ReputationFilter::new().with_known_threats(["known-bad".to_string()]);
        let mut e = email("phish@known-bad.example", "Verify your account", "Click here");
        e.fingerprint = "known-bad".to_string();
        let pred = filter.classify(&e);
        assert_eq!(pred.status, "threat");
        assert_eq!(pred.confidence, 1.0);
        assert!(pred.indicators.contains(&"known_threat_fingerprint".to_string()));
    }
}
