//! Stage 2: fine-tuned transformer classifier with a manual-override regex
//! scanner and adaptive routing between short-circuit and escalation.
//!
//! The "transformer" here is a pluggable [`ModelArtifact`] behind an atomic
//! reference so a training-pipeline swap (see `training.rs`) is visible to
//! new scans without ever locking across a scan. The default artifact is a
//! weighted lexical scorer standing in for a loaded neural network; it
//! implements the same contract a real tokenizer+model pair would.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use regex::RegexSet;

use crate::model::{EmailArtifact, Stage2Status, StagePrediction};

/// A loadable stage-2 model. `score` returns `(p_benign, p_malicious)`,
/// softmax-normalized.
pub trait ModelArtifact: Send + Sync {
    fn version(&self) -> &str;
    fn score(&self, prepared_text: &str) -> (f64, f64);
    fn is_fallback(&self) -> bool {
        false
    }
}

/// Lexical stand-in for a fine-tuned transformer: a weighted bag-of-phrases
/// scorer. Real deployments swap this for a loaded tokenizer+model pair via
/// [`ModelRegistry::swap`]; the contract is identical either way.
pub struct LexicalModel {
    version: String,
    malicious_phrases: Vec<(&'static str, f64)>,
    fallback: bool,
}

impl LexicalModel {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            malicious_phrases: default_weighted_phrases(),
            fallback: false,
        }
    }

    pub fn fallback(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            malicious_phrases: default_weighted_phrases(),
            fallback: true,
        }
    }
}

impl ModelArtifact for LexicalModel {
    fn version(&self) -> &str {
        &self.version
    }

    fn score(&self, prepared_text: &str) -> (f64, f64) {
        let lower = prepared_text.to_lowercase();
        let mut raw = 0.0_f64;
        for (phrase, weight) in &self.malicious_phrases {
            if lower.contains(phrase) {
                raw += weight;
            }
        }
        // Logistic squash, then clamp so a fallback model never looks fully
        // confident — that bias is what sends borderline mail to stage 3.
        let p_malicious = 1.0 / (1.0 + (-raw).exp());
        let p_malicious = if self.fallback {
            p_malicious.min(0.7)
        } else {
            p_malicious
        };
        (1.0 - p_malicious, p_malicious)
    }

    fn is_fallback(&self) -> bool {
        self.fallback
    }
}

fn default_weighted_phrases() -> Vec<(&'static str, f64)> {
    vec![
        ("verify your account", 0.9),
        ("suspended", 0.7),
        ("click here", 0.4),
        ("urgent", 0.5),
        ("wire transfer", 1.1),
        ("gift card", 1.0),
        ("social security", 1.3),
        ("password", 0.8),
        ("confidential", 0.5),
        ("act now", 0.7),
        ("limited time", 0.4),
        ("bank account", 0.6),
    ]
}

/// Holds the currently-active model behind a read-write lock, so a swap from
/// the training pipeline publishes atomically and in-flight scans complete
/// against whichever artifact they already captured.
pub struct ModelRegistry {
    current: RwLock<Arc<dyn ModelArtifact>>,
}

impl ModelRegistry {
    pub fn new(initial: Arc<dyn ModelArtifact>) -> Self {
        Self {
            current: RwLock::new(initial),
        }
    }

    pub fn current(&self) -> Arc<dyn ModelArtifact> {
        self.current.read().clone()
    }

    pub fn swap(&self, new_model: Arc<dyn ModelArtifact>) {
        *self.current.write() = new_model;
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new(Arc::new(LexicalModel::new("v0-lexical")))
    }
}

/// Attempts to load the configured custom model artifact at startup; falls
/// back to the rule-based [`LexicalModel::fallback`] path when
/// `use_custom_model` is set but no artifact exists at `custom_model_path`,
/// per the stage-2 fallback contract in §4.C. A real deployment would swap
/// this for an actual tokenizer+weights load.
pub fn load_initial_model(
    use_custom_model: bool,
    custom_model_path: Option<&str>,
    custom_model_version: Option<&str>,
) -> Arc<dyn ModelArtifact> {
    if !use_custom_model {
        return Arc::new(LexicalModel::new("v0-lexical"));
    }

    let loadable = custom_model_path
        .map(|path| std::path::Path::new(path).exists())
        .unwrap_or(false);

    let version = custom_model_version.unwrap_or("custom").to_string();
    if loadable {
        Arc::new(LexicalModel::new(version))
    } else {
        Arc::new(LexicalModel::fallback(format!("{version}-fallback")))
    }
}

/// Critical patterns that force a malicious classification regardless of the
/// model's own score: requests for sensitive personal data, urgency paired
/// with a personal-info request, or impersonation of a named authority from
/// an unlisted domain.
pub struct OverrideScanner {
    sensitive_request: RegexSet,
    sensitive_labels: Vec<&'static str>,
    authority_whitelist: Vec<&'static str>,
}

impl OverrideScanner {
    pub fn new() -> Self {
        let raw: Vec<(&str, &str)> = vec![
            (r"(?i)(social security|ssn) number", "requests_ssn"),
            (r"(?i)tax (id|identification) number", "requests_tax_id"),
            (r"(?i)(bank account|routing) number", "requests_bank_details"),
            (r"(?i)credit card number", "requests_card_number"),
            (r"(?i)\bpin\b.{0,10}(code|number)", "requests_pin"),
            (r"(?i)(enter|confirm|provide) your password", "requests_password"),
            (r"(?i)(irs|internal revenue service)", "irs_impersonation"),
            (r"(?i)(social security administration|ssa)", "ssa_impersonation"),
            (r"(?i)(within 24 hours|immediately or).{0,30}(suspend|close|freeze)", "urgency_with_personal_request"),
        ];
        let patterns: Vec<&str> = raw.iter().map(|(p, _)| *p).collect();
        let labels: Vec<&'static str> = raw.iter().map(|(_, l)| *l).collect();
        Self {
            sensitive_request: RegexSet::new(patterns)
                .expect("default override patterns must compile"),
            sensitive_labels: labels,
            authority_whitelist: vec!["irs.gov", "ssa.gov"],
        }
    }

    /// Returns the override indicators that fired, if any.
    fn scan(&self, email: &EmailArtifact) -> Vec<String> {
        let haystack = format!("{}\n{}", email.subject, email.body);
        let mut indicators: Vec<String> = self
            .sensitive_request
            .matches(&haystack)
            .into_iter()
            .map(|idx| self.sensitive_labels[idx].to_string())
            .collect();

        let impersonates_authority = indicators
            .iter()
            .any(|i| i == "irs_impersonation" || i == "ssa_impersonation");
        if impersonates_authority {
            let sender_domain = email
                .sender
                .rsplit('@')
                .next()
                .unwrap_or("")
                .to_lowercase();
            let whitelisted = self
                .authority_whitelist
                .iter()
                .any(|d| sender_domain == *d || sender_domain.ends_with(&format!(".{d}")));
            if !whitelisted {
                indicators.push("authority_impersonation_unofficial_domain".to_string());
            } else {
                indicators.retain(|i| i != "irs_impersonation" && i != "ssa_impersonation");
            }
        }

        indicators
    }
}

impl Default for OverrideScanner {
    fn default() -> Self {
        Self::new()
    }
}

/// Stage-2 classifier: prepares text, runs the model, applies the override,
/// and derives the routing status F relies on for short-circuit decisions.
pub struct TransformerClassifier {
    pub registry: Arc<ModelRegistry>,
    overrides: OverrideScanner,
    confidence_threshold: f64,
    high_confidence_threshold: f64,
    max_input_chars: usize,
}

impl TransformerClassifier {
    pub fn new(
        registry: Arc<ModelRegistry>,
        confidence_threshold: f64,
        high_confidence_threshold: f64,
    ) -> Self {
        Self {
            registry,
            overrides: OverrideScanner::new(),
            confidence_threshold,
            high_confidence_threshold,
            max_input_chars: 4000,
        }
    }

    /// Returns the stage prediction plus the binary predicted label, which
    /// the caller writes into a [`crate::model::TrainingSample`].
    pub fn classify(&self, email: &EmailArtifact) -> (StagePrediction, u8, f64) {
        let start = Instant::now();

        let mut prepared = format!(
            "Subject: {}\nFrom: {}\n\n{}",
            email.subject, email.sender, email.body
        );
        if prepared.len() > self.max_input_chars {
            prepared.truncate(self.max_input_chars);
        }

        let model = self.registry.current();
        let (p_benign, p_malicious) = model.score(&prepared);
        let mut predicted_label = if p_malicious >= p_benign { 1_u8 } else { 0_u8 };
        let mut confidence = p_benign.max(p_malicious);

        let override_indicators = self.overrides.scan(email);
        let mut indicators = Vec::new();
        let mut override_reason = None;

        if !override_indicators.is_empty() {
            predicted_label = 1;
            confidence = 0.95;
            override_reason = Some(format!(
                "manual_override:{}",
                override_indicators.join(",")
            ));
            indicators.extend(override_indicators);
        }

        let status = self.route(predicted_label, confidence);

        let mut prediction = StagePrediction::new(2, status_str(status), confidence)
            .with_indicators(indicators)
            .with_duration_ms(start.elapsed().as_millis() as u64)
            .with_fallback_mode(model.is_fallback());
        prediction.override_reason = override_reason;
        prediction.model_version = Some(model.version().to_string());

        (prediction, predicted_label, confidence)
    }

    fn route(&self, predicted_label: u8, confidence: f64) -> Stage2Status {
        match predicted_label {
            1 => {
                if confidence >= self.confidence_threshold {
                    Stage2Status::Suspicious
                } else {
                    Stage2Status::Benign
                }
            }
            _ => {
                if confidence >= self.high_confidence_threshold {
                    Stage2Status::Benign
                } else {
                    Stage2Status::Suspicious
                }
            }
        }
    }
}

pub fn status_str(status: Stage2Status) -> &'static str {
    match status {
        Stage2Status::Benign => "benign",
        Stage2Status::Suspicious => "suspicious",
        Stage2Status::Malicious => "malicious",
    }
}
