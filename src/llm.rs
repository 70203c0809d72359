//! Retry-and-fallback transport over [`LlmProvider`] adapters.
//!
//! [`LlmService`] wraps one required primary provider and one optional
//! fallback. A logical `call` tries the primary up to the configured retry
//! count with a fixed delay between attempts, then moves to the fallback.
//! Every attempt -- successful or failed -- is recorded in an ordered
//! [`AttemptRecord`] log that survives even total failure, so callers can
//! always account for what was tried.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::providers::{duration_to_ms, LlmProvider, LlmRequest, LlmResponse};
use crate::types::AttemptRecord;

/// Default attempts per provider before moving on.
pub const DEFAULT_MAX_RETRIES_PER_PROVIDER: u32 = 3;

/// Default fixed delay between attempts within a provider.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(1000);

/// Retry knobs for the service. Fixed delay, no exponential backoff.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// Attempts per provider (≥ 1).
    pub max_retries_per_provider: u32,
    /// Sleep between attempts within one provider.
    pub retry_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries_per_provider: DEFAULT_MAX_RETRIES_PER_PROVIDER,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl RetryConfig {
    /// At least one attempt per provider, whatever the config says.
    fn attempts_per_provider(&self) -> u32 {
        self.max_retries_per_provider.max(1)
    }
}

/// Outcome of a successful logical call: the winning response plus the
/// full attempt log that led to it.
#[derive(Debug, Clone)]
pub struct ServiceCall {
    /// The first successful provider response.
    pub response: LlmResponse,
    /// Every attempt made, in order, including the successful one.
    pub attempts: Vec<AttemptRecord>,
}

/// Running totals across the logical LLM calls of one pipeline run.
///
/// `llm_calls` counts invocations (one per [`LlmService::call`]), never
/// individual attempts. Token and latency totals sum only the successful
/// attempt of each invocation; the attempt log keeps everything, failures
/// included.
#[derive(Debug, Clone, Default)]
pub struct CallTotals {
    /// Logical LLM invocations made.
    pub llm_calls: u64,
    /// Prompt tokens across successful attempts.
    pub input_tokens: u64,
    /// Completion tokens across successful attempts.
    pub output_tokens: u64,
    /// Latency across successful attempts, in milliseconds.
    pub latency_ms: u64,
    /// Every provider attempt, in order.
    pub attempts: Vec<AttemptRecord>,
}

impl CallTotals {
    /// Record one logical invocation.
    ///
    /// `attempts` is the invocation's full attempt log; the usage arguments
    /// are zero for invocations that never succeeded. An empty attempt log
    /// (an expert that short-circuited) records nothing.
    pub fn record(
        &mut self,
        attempts: &[AttemptRecord],
        input_tokens: u64,
        output_tokens: u64,
        latency_ms: u64,
    ) {
        if attempts.is_empty() {
            return;
        }
        self.llm_calls = self.llm_calls.saturating_add(1);
        self.input_tokens = self.input_tokens.saturating_add(input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(output_tokens);
        self.latency_ms = self.latency_ms.saturating_add(latency_ms);
        self.attempts.extend_from_slice(attempts);
    }

    /// Fold another total into this one.
    pub fn merge(&mut self, other: CallTotals) {
        self.llm_calls = self.llm_calls.saturating_add(other.llm_calls);
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
        self.latency_ms = self.latency_ms.saturating_add(other.latency_ms);
        self.attempts.extend(other.attempts);
    }
}

/// Errors returned by the LLM service.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Every attempt against every configured provider failed.
    #[error("all providers exhausted: {message}")]
    AllProvidersExhausted {
        /// The final attempt's error.
        message: String,
        /// The complete attempt log.
        attempts: Vec<AttemptRecord>,
    },
}

impl ServiceError {
    /// The attempt log carried by the error.
    pub fn attempts(&self) -> &[AttemptRecord] {
        match self {
            Self::AllProvidersExhausted { attempts, .. } => attempts,
        }
    }
}

/// Stateless retry/fallback wrapper around the configured providers.
///
/// Safe to share (`Arc`) across experts and concurrent pipeline
/// invocations; a single `call` never invokes providers in parallel.
#[derive(Clone)]
pub struct LlmService {
    primary: Arc<dyn LlmProvider>,
    fallback: Option<Arc<dyn LlmProvider>>,
    retry: RetryConfig,
}

impl LlmService {
    /// Create a service over a primary and an optional fallback provider.
    pub fn new(
        primary: Arc<dyn LlmProvider>,
        fallback: Option<Arc<dyn LlmProvider>>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            primary,
            fallback,
            retry,
        }
    }

    /// Number of configured providers (1 or 2).
    pub fn provider_count(&self) -> usize {
        if self.fallback.is_some() {
            2
        } else {
            1
        }
    }

    /// Name of the primary provider.
    pub fn primary_name(&self) -> &str {
        self.primary.name()
    }

    /// Model identifier of the primary provider.
    pub fn primary_model(&self) -> &str {
        self.primary.model_id()
    }

    /// Make one logical LLM call with retries and fallback.
    ///
    /// The primary is attempted exactly `max_retries_per_provider` times
    /// (with the fixed delay between attempts) before the fallback is
    /// touched; the first success returns immediately.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::AllProvidersExhausted`] -- carrying the full
    /// attempt log -- when no attempt succeeds.
    pub async fn call(&self, request: &LlmRequest) -> Result<ServiceCall, ServiceError> {
        let mut attempts: Vec<AttemptRecord> = Vec::new();
        let mut last_error = String::from("no providers attempted");

        let providers = std::iter::once(&self.primary).chain(self.fallback.iter());
        for provider in providers {
            for attempt in 0..self.retry.attempts_per_provider() {
                if attempt > 0 {
                    tokio::time::sleep(self.retry.retry_delay).await;
                }

                let started = std::time::Instant::now();
                match provider.call(request).await {
                    Ok(response) => {
                        attempts.push(AttemptRecord {
                            provider: response.provider.clone(),
                            model: response.model.clone(),
                            latency_ms: response.latency_ms,
                            success: true,
                            error: None,
                        });
                        debug!(
                            provider = provider.name(),
                            attempt = attempt.saturating_add(1),
                            latency_ms = response.latency_ms,
                            "llm call succeeded"
                        );
                        return Ok(ServiceCall { response, attempts });
                    }
                    Err(e) => {
                        let message = e.to_string();
                        warn!(
                            provider = provider.name(),
                            attempt = attempt.saturating_add(1),
                            error = %message,
                            "llm call attempt failed"
                        );
                        attempts.push(AttemptRecord {
                            provider: provider.name().to_owned(),
                            model: provider.model_id().to_owned(),
                            latency_ms: duration_to_ms(started.elapsed()),
                            success: false,
                            error: Some(message.clone()),
                        });
                        last_error = message;
                    }
                }
            }
        }

        Err(ServiceError::AllProvidersExhausted {
            message: last_error,
            attempts,
        })
    }
}
