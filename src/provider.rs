//! InvestigationProvider: the LLM client boundary. Modeled abstractly per
//! §1 — given a structured prompt, returns analysis text. No concrete HTTP
//! client is implemented (out of scope); grounded on `logic/ai_bridge.rs`'s
//! guarded optional-model-call shape and
//! `other_examples/…claude-commander…/security_monitor/mod.rs`'s
//! `LLMAnalyzer`-optional pattern.

use async_trait::async_trait;

#[derive(Debug)]
pub struct ProviderError(pub String);

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "provider error: {}", self.0)
    }
}
impl std::error::Error for ProviderError {}

#[async_trait]
pub trait InvestigationProvider: Send + Sync {
    async fn investigate(&self, prompt: &str) -> Result<String, ProviderError>;
}

/// Wraps any provider with the §5 investigation timeout (default 120s). On
/// timeout the call is treated as failed: logged, the event dropped from the
/// queue, nothing cached.
pub struct TimeoutProvider<P> {
    inner: P,
    timeout: std::time::Duration,
}

impl<P: InvestigationProvider> TimeoutProvider<P> {
    pub fn new(inner: P, timeout: std::time::Duration) -> Self {
        TimeoutProvider { inner, timeout }
    }
}

#[async_trait]
impl<P: InvestigationProvider> InvestigationProvider for TimeoutProvider<P> {
    async fn investigate(&self, prompt: &str) -> Result<String, ProviderError> {
        match tokio::time::timeout(self.timeout, self.inner.investigate(prompt)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError(format!(
                "investigation timed out after {:?}",
                self.timeout
            ))),
        }
    }
}

/// Test/offline double: never calls out, always returns a canned analysis.
pub struct NoopProvider {
    pub canned_analysis: String,
}

impl NoopProvider {
    pub fn new(canned_analysis: impl Into<String>) -> Self {
        NoopProvider {
            canned_analysis: canned_analysis.into(),
        }
    }
}

#[async_trait]
impl InvestigationProvider for NoopProvider {
    async fn investigate(&self, _prompt: &str) -> Result<String, ProviderError> {
        Ok(self.canned_analysis.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SlowProvider;

    #[async_trait]
    impl InvestigationProvider for SlowProvider {
        async fn investigate(&self, _prompt: &str) -> Result<String, ProviderError> {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            Ok("too slow".to_string())
        }
    }

    #[tokio::test]
    async fn noop_provider_returns_canned_analysis() {
        let provider = NoopProvider::new("looks fine");
        assert_eq!(provider.investigate("anything").await.unwrap(), "looks fine");
    }

    #[tokio::test]
    async fn timeout_wrapper_fails_slow_calls() {
        let provider = TimeoutProvider::new(SlowProvider, std::time::Duration::from_millis(5));
        assert!(provider.investigate("anything").await.is_err());
    }

    #[tokio::test]
    async fn timeout_wrapper_passes_through_fast_calls() {
        let provider = TimeoutProvider::new(NoopProvider::new("ok"), std::time::Duration::from_secs(5));
        assert_eq!(provider.investigate("anything").await.unwrap(), "ok");
    }
}
