//! External LLM adapter: a thin HTTP client plus a retry-then-circuit-breaker
//! policy, following the same reconnect/backoff shape used elsewhere in this
//! codebase for recovering transport connections.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{ScreenError, ScreenResult};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

/// Minimal contract for a completion-style LLM call. Swappable so tests can
/// substitute a canned responder without touching the network.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> ScreenResult<String>;
}

#[derive(Debug, Clone)]
pub struct LlmClientConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
    pub max_retries: u32,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_window: Duration,
}

impl Default for LlmClientConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: "claude-detective".to_string(),
            timeout: Duration::from_secs(30),
            max_retries: 3,
            circuit_breaker_threshold: 5,
            circuit_breaker_window: Duration::from_secs(60),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Tracks consecutive failures within a rolling window and trips to `Open`
/// once they exceed the configured threshold, matching the reconnect
/// bookkeeping pattern used by this codebase's connection manager.
struct CircuitBreaker {
    state: RwLock<BreakerState>,
    consecutive_failures: AtomicU32,
    window_start: RwLock<Instant>,
    threshold: u32,
    window: Duration,
}

impl CircuitBreaker {
    fn new(threshold: u32, window: Duration) -> Self {
        Self {
            state: RwLock::new(BreakerState::Closed),
            consecutive_failures: AtomicU32::new(0),
            window_start: RwLock::new(Instant::now()),
            threshold,
            window,
        }
    }

    fn allow(&self) -> bool {
        let mut state = self.state.write();
        match *state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                if self.window_start.read().elapsed() >= self.window {
                    *state = BreakerState::HalfOpen;
                    true
                } else {
                    false
                }
            }
            BreakerState::HalfOpen => true,
        }
    }

    fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        *self.state.write() = BreakerState::Closed;
    }

    fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= self.threshold {
            *self.state.write() = BreakerState::Open;
            *self.window_start.write() = Instant::now();
            tracing::warn!(consecutive_failures = failures, "llm circuit breaker tripped open");
        }
    }

    /// Exponential backoff with full jitter: the returned delay is uniformly
    /// sampled from `[0, cap]` rather than fixed, so retries from concurrent
    /// scans against the same upstream don't all wake up in lockstep.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        use rand::Rng;
        let base_ms = 250_u64;
        let cap = base_ms * (1_u64 << attempt.min(5));
        let jittered = rand::thread_rng().gen_range(0..=cap);
        Duration::from_millis(jittered)
    }
}

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<AnthropicMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
}

#[derive(Debug, Deserialize)]
struct AnthropicContent {
    #[serde(default)]
    text: String,
}

/// HTTP-backed LLM client with retry and circuit-breaker protection. Falls
/// back to returning [`ScreenError::LlmUnavailable`] once the breaker trips,
/// so stage 3 can degrade to an `unknown` verdict instead of blocking.
pub struct HttpLlmClient {
    config: LlmClientConfig,
    http: reqwest::Client,
    breaker: CircuitBreaker,
}

impl HttpLlmClient {
    pub fn new(config: LlmClientConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        let breaker = CircuitBreaker::new(config.circuit_breaker_threshold, config.circuit_breaker_window);
        Self {
            config,
            http,
            breaker,
        }
    }

    async fn call_once(&self, system_prompt: &str, user_prompt: &str) -> ScreenResult<String> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or_else(|| ScreenError::LlmUnavailable("no api key configured".to_string()))?;

        let request = AnthropicRequest {
            model: &self.config.model,
            max_tokens: 2048,
            system: system_prompt,
            messages: vec![AnthropicMessage {
                role: "user",
                content: user_prompt,
            }],
        };

        let response = self
            .http
            .post(format!("{}/v1/messages", self.config.base_url))
            .header("x-api-key", api_key)
            .header("anthropic-version", API_VERSION)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ScreenError::LlmUnavailable(format!(
                "llm returned status {}",
                response.status()
            )));
        }

        let parsed: AnthropicResponse = response.json().await?;
        let text = parsed
            .content
            .into_iter()
            .map(|c| c.text)
            .collect::<Vec<_>>()
            .join("");
        Ok(text)
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> ScreenResult<String> {
        if !self.breaker.allow() {
            return Err(ScreenError::LlmUnavailable(
                "circuit breaker open".to_string(),
            ));
        }

        let mut last_err = None;
        for attempt in 0..=self.config.max_retries {
            match self.call_once(system_prompt, user_prompt).await {
                Ok(text) => {
                    self.breaker.record_success();
                    return Ok(text);
                }
                Err(err) => {
                    last_err = Some(err);
                    if attempt < self.config.max_retries {
                        tokio::time::sleep(self.breaker.backoff_delay(attempt)).await;
                    }
                }
            }
        }

        self.breaker.record_failure();
        Err(last_err.unwrap_or_else(|| ScreenError::LlmUnavailable("exhausted retries".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_cap_grows_exponentially_then_caps() {
        let breaker = CircuitBreaker::new(5, Duration::from_secs(60));
        for _ in 0..20 {
            assert!(breaker.backoff_delay(0) <= Duration::from_millis(250));
            assert!(breaker.backoff_delay(1) <= Duration::from_millis(500));
            assert!(breaker.backoff_delay(5) <= Duration::from_millis(8000));
            assert!(breaker.backoff_delay(9) <= Duration::from_millis(8000));
        }
    }

    #[test]
    fn breaker_opens_after_threshold_failures() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        assert!(breaker.allow());
        breaker.record_failure();
        breaker.record_failure();
        assert!(breaker.allow());
        breaker.record_failure();
        assert!(!breaker.allow());
    }

    #[test]
    fn breaker_closes_on_success() {
        let breaker = CircuitBreaker::new(2, Duration::from_secs(60));
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        assert!(breaker.allow());
    }
}
