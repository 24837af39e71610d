//! Runtime configuration, loaded from the process environment with defaults
//! for every field so the pipeline runs standalone against the in-memory
//! store and a stub LLM fallback.

use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub stage1_enabled: bool,
    pub stage2_enabled: bool,
    pub stage3_enabled: bool,

    pub confidence_threshold: f64,
    pub high_confidence_threshold: f64,

    pub conversation_retention: Duration,

    /// Soft per-stage budgets (§5): exceeding one marks that stage
    /// `timeout` and the orchestrator continues to fusion rather than
    /// failing the whole scan.
    pub stage2_timeout: Duration,
    pub stage3_timeout: Duration,

    pub use_custom_model: bool,
    pub custom_model_path: Option<String>,
    pub custom_model_version: Option<String>,

    pub llm_api_key: Option<String>,
    pub llm_base_url: String,
    pub llm_model: String,
    pub llm_timeout_secs: u64,
    pub llm_max_retries: u32,
    pub llm_circuit_breaker_threshold: u32,
    pub llm_circuit_breaker_window: Duration,
    /// Retries for a stage-3 response that came back but didn't parse as
    /// the expected JSON shape at all (§4.E), distinct from the
    /// transport-level retries above.
    pub llm_max_parse_retries: u32,

    pub scan_deadline: Duration,

    pub training_delta: f64,
    pub training_min_samples: usize,
    pub training_min_per_class: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stage1_enabled: true,
            stage2_enabled: true,
            stage3_enabled: true,
            confidence_threshold: 0.5,
            high_confidence_threshold: 0.8,
            conversation_retention: Duration::from_secs(10 * 3600),
            stage2_timeout: Duration::from_secs(5),
            stage3_timeout: Duration::from_secs(45),
            use_custom_model: false,
            custom_model_path: None,
            custom_model_version: None,
            llm_api_key: None,
            llm_base_url: "https://api.anthropic.com".to_string(),
            llm_model: "claude-detective".to_string(),
            llm_timeout_secs: 30,
            llm_max_retries: 3,
            llm_circuit_breaker_threshold: 5,
            llm_circuit_breaker_window: Duration::from_secs(60),
            llm_max_parse_retries: 2,
            scan_deadline: Duration::from_secs(120),
            training_delta: 0.02,
            training_min_samples: 100,
            training_min_per_class: 20,
        }
    }
}

impl PipelineConfig {
    /// Loads configuration from the process environment, falling back to
    /// [`Default`] for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            stage1_enabled: env_bool("STAGE1_ENABLED", defaults.stage1_enabled),
            stage2_enabled: env_bool("STAGE2_ENABLED", defaults.stage2_enabled),
            stage3_enabled: env_bool("STAGE3_ENABLED", defaults.stage3_enabled),
            confidence_threshold: env_f64("CONFIDENCE_THRESHOLD", defaults.confidence_threshold),
            high_confidence_threshold: env_f64(
                "HIGH_CONFIDENCE_THRESHOLD",
                defaults.high_confidence_threshold,
            ),
            conversation_retention: Duration::from_secs(
                env_u64("CONVERSATION_RETENTION_HOURS", 10) * 3600,
            ),
            stage2_timeout: Duration::from_secs(env_u64(
                "STAGE2_TIMEOUT_SECS",
                defaults.stage2_timeout.as_secs(),
            )),
            stage3_timeout: Duration::from_secs(env_u64(
                "STAGE3_TIMEOUT_SECS",
                defaults.stage3_timeout.as_secs(),
            )),
            use_custom_model: env_bool("USE_CUSTOM_MODEL", defaults.use_custom_model),
            custom_model_path: env::var("CUSTOM_MODEL_PATH").ok(),
            custom_model_version: env::var("CUSTOM_MODEL_VERSION").ok(),
            llm_api_key: env::var("LLM_API_KEY").ok(),
            llm_base_url: env::var("LLM_BASE_URL").unwrap_or(defaults.llm_base_url),
            llm_model: env::var("LLM_MODEL").unwrap_or(defaults.llm_model),
            llm_timeout_secs: env_u64("LLM_TIMEOUT_SECS", defaults.llm_timeout_secs),
            llm_max_retries: env_u64("LLM_MAX_RETRIES", defaults.llm_max_retries as u64) as u32,
            llm_circuit_breaker_threshold: env_u64(
                "LLM_CIRCUIT_BREAKER_THRESHOLD",
                defaults.llm_circuit_breaker_threshold as u64,
            ) as u32,
            llm_circuit_breaker_window: Duration::from_secs(env_u64(
                "LLM_CIRCUIT_BREAKER_WINDOW_SECS",
                defaults.llm_circuit_breaker_window.as_secs(),
            )),
            llm_max_parse_retries: env_u64(
                "LLM_MAX_PARSE_RETRIES",
                defaults.llm_max_parse_retries as u64,
            ) as u32,
            scan_deadline: Duration::from_secs(env_u64(
                "SCAN_DEADLINE_SECS",
                defaults.scan_deadline.as_secs(),
            )),
            training_delta: env_f64("TRAINING_DELTA", defaults.training_delta),
            training_min_samples: env_u64(
                "TRAINING_MIN_SAMPLES",
                defaults.training_min_samples as u64,
            ) as usize,
            training_min_per_class: env_u64(
                "TRAINING_MIN_PER_CLASS",
                defaults.training_min_per_class as u64,
            ) as usize,
        }
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<bool>().ok())
        .unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<f64>().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_internally_consistent() {
        let cfg = PipelineConfig::default();
        assert!(cfg.confidence_threshold < cfg.high_confidence_threshold);
        assert!(cfg.training_min_samples >= cfg.training_min_per_class * 2);
    }
}
