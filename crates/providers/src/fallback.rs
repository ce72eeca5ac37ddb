//! Provider fallback: ordered chain with per-provider retries and timeouts.
//!
//! Each provider in the chain is tried in order:
//! - authentication / not-configured failures skip straight to the next provider
//! - a context-length failure also moves on (a later model may have a larger window)
//! - transient failures (rate limits, 5xx, timeouts, network) are retried on the
//!   same provider up to `max_retries` attempts with exponential backoff
//! - waits never exceed `max_backoff`; a `Retry-After` longer than that moves
//!   on to the next provider
//!
//! When every provider is exhausted a single aggregated error is returned.
//! A chain of one provider is just retry-with-backoff.

use async_trait::async_trait;
use forgeloop_core::provider::*;
use forgeloop_core::{LlmError, LlmErrorKind};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Default attempts per provider.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Longest single wait between attempts. A `Retry-After` above this moves on
/// to the next provider instead of sleeping.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(60);

/// A provider that wraps an ordered list of providers and falls back on failure.
pub struct FallbackProvider {
    name: String,
    chain: Vec<FallbackEntry>,
    max_retries: u32,
    backoff: Duration,
    max_backoff: Duration,
}

/// A single entry in the fallback chain.
struct FallbackEntry {
    provider: Arc<dyn Provider>,
    timeout: Duration,
}

impl FallbackProvider {
    /// Create a new fallback provider with no entries.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            chain: Vec::new(),
            max_retries: DEFAULT_MAX_RETRIES,
            backoff: Duration::from_millis(500),
            max_backoff: DEFAULT_MAX_BACKOFF,
        }
    }

    /// Add a provider to the fallback chain with a custom timeout.
    pub fn add(mut self, provider: Arc<dyn Provider>, timeout: Duration) -> Self {
        self.chain.push(FallbackEntry { provider, timeout });
        self
    }

    /// Add a provider with the default timeout (120s).
    pub fn add_default(self, provider: Arc<dyn Provider>) -> Self {
        self.add(provider, Duration::from_secs(120))
    }

    /// Attempts per provider for transient failures (minimum 1).
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    /// Base delay between retries; doubled after each attempt.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Upper bound on any single wait between attempts.
    pub fn with_max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = max_backoff;
        self
    }

    /// Number of providers in the chain.
    pub fn len(&self) -> usize {
        self.chain.len()
    }

    /// Whether the chain is empty.
    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    /// Wait before the next attempt, or `None` when the provider asks for
    /// longer than `max_backoff`.
    fn delay_for(&self, attempt: u32, err: &LlmError) -> Option<Duration> {
        if let LlmError::RateLimited {
            retry_after_secs: Some(secs),
        } = err
        {
            let requested = Duration::from_secs(*secs);
            return (requested <= self.max_backoff).then_some(requested);
        }
        Some(self.backoff.saturating_mul(1 << (attempt - 1).min(6)).min(self.max_backoff))
    }

    /// Run one provider until success, a non-retryable error, or retries run out.
    async fn try_entry(
        &self,
        entry: &FallbackEntry,
        request: &ChatRequest,
    ) -> Result<ChatResponse, LlmError> {
        let provider_name = entry.provider.name();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let call = entry.provider.chat(request.clone());
            let err = match tokio::time::timeout(entry.timeout, call).await {
                Ok(Ok(response)) => return Ok(response),
                Ok(Err(e)) => e,
                Err(_) => LlmError::Timeout(format!(
                    "Provider '{}' timed out after {}s",
                    provider_name,
                    entry.timeout.as_secs()
                )),
            };

            match err.kind() {
                LlmErrorKind::Authentication => {
                    warn!(
                        provider = %provider_name,
                        error = %err,
                        "Fallback: authentication failed, skipping provider"
                    );
                    return Err(err);
                }
                LlmErrorKind::ContextLength => {
                    warn!(
                        provider = %provider_name,
                        error = %err,
                        "Fallback: context too long for provider, trying next"
                    );
                    return Err(err);
                }
                _ if err.is_transient() && attempt < self.max_retries => {
                    let Some(delay) = self.delay_for(attempt, &err) else {
                        warn!(
                            provider = %provider_name,
                            max_backoff_secs = self.max_backoff.as_secs(),
                            error = %err,
                            "Fallback: retry-after exceeds limit, trying next"
                        );
                        return Err(err);
                    };
                    warn!(
                        provider = %provider_name,
                        attempt,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Fallback: transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                _ => {
                    warn!(
                        provider = %provider_name,
                        attempt,
                        error = %err,
                        "Fallback: provider failed, trying next"
                    );
                    return Err(err);
                }
            }
        }
    }
}

#[async_trait]
impl Provider for FallbackProvider {
    fn name(&self) -> &str {
        &self.name
    }

    /// The primary provider's model.
    fn model(&self) -> &str {
        self.chain.first().map(|e| e.provider.model()).unwrap_or("")
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
        if self.chain.is_empty() {
            return Err(LlmError::NotConfigured("No providers in fallback chain".into()));
        }

        let mut errors = Vec::with_capacity(self.chain.len());

        for (i, entry) in self.chain.iter().enumerate() {
            info!(
                provider = %entry.provider.name(),
                model = %entry.provider.model(),
                attempt = i + 1,
                total = self.chain.len(),
                "Fallback: trying provider"
            );

            match self.try_entry(entry, &request).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    let (name, model) = (entry.provider.name(), entry.provider.model());
                    errors.push(format!("{name} ({model}): {e}"));
                }
            }
        }

        Err(LlmError::AllProvidersFailed { errors })
    }
}
