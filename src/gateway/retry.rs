use crate::config::RetryConfig;
use crate::error::ProviderError;
use crate::gateway::{Completion, CompletionRequest, ModelGateway, TextSink};
use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based): the initial backoff doubled
    /// per retry, capped, plus up to 25% random jitter.
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(16);
        let base = self
            .initial_backoff
            .saturating_mul(1 << exponent)
            .min(self.max_backoff);
        let jitter_ms = (base.as_millis() as u64) / 4;
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ms)
        };
        base + Duration::from_millis(jitter)
    }
}

/// Streamed in place of the rest of a reply that broke off, before the retry
/// starts over.
pub const RETRY_NOTICE: &str = "\n[connection lost, retrying]\n";

/// Retries transient failures of the wrapped gateway. Permanent failures are
/// returned at once.
///
/// A retry starts the reply from scratch. If the failed attempt already
/// streamed text, [`RETRY_NOTICE`] goes to the sink first so the repeat is
/// visible as such.
pub struct RetryingGateway {
    inner: Arc<dyn ModelGateway>,
    policy: RetryPolicy,
}

impl RetryingGateway {
    pub fn new(inner: Arc<dyn ModelGateway>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl ModelGateway for RetryingGateway {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
        on_text: TextSink<'_>,
    ) -> Result<Completion, ProviderError> {
        let mut attempt = 1;
        loop {
            let streamed = AtomicBool::new(false);
            let sink = |text: &str| {
                streamed.store(true, Ordering::Relaxed);
                on_text(text);
            };
            match self.inner.complete(request, &sink).await {
                Ok(completion) => return Ok(completion),
                Err(e) if e.is_transient() && attempt < self.policy.max_attempts => {
                    if streamed.load(Ordering::Relaxed) {
                        on_text(RETRY_NOTICE);
                    }
                    let delay = self.policy.backoff(attempt);
                    tracing::warn!(
                        provider = self.inner.name(),
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient provider error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(provider = self.inner.name(), attempt, error = %e, "provider call failed");
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PermanentKind;
    use crate::gateway::ModelResponse;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails with the queued errors first, then answers. Every attempt
    /// streams `partial` before it fails.
    struct FlakyGateway {
        errors: Mutex<Vec<ProviderError>>,
        calls: AtomicU32,
        partial: &'static str,
    }

    impl FlakyGateway {
        fn new(errors: Vec<ProviderError>) -> Arc<Self> {
            Self::streaming(errors, "")
        }

        fn streaming(mut errors: Vec<ProviderError>, partial: &'static str) -> Arc<Self> {
            errors.reverse();
            Arc::new(Self {
                errors: Mutex::new(errors),
                calls: AtomicU32::new(0),
                partial,
            })
        }
    }

    #[async_trait]
    impl ModelGateway for FlakyGateway {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn complete(
            &self,
            _request: &CompletionRequest,
            on_text: TextSink<'_>,
        ) -> Result<Completion, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.errors.lock().unwrap().pop();
            match next {
                Some(e) => {
                    if !self.partial.is_empty() {
                        on_text(self.partial);
                    }
                    Err(e)
                }
                None => {
                    on_text("ok");
                    Ok(ModelResponse::Text("ok".to_string()).into())
                }
            }
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
        }
    }

    fn request() -> CompletionRequest {
        CompletionRequest {
            model: "m".to_string(),
            messages: Vec::new(),
            tools: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let inner = FlakyGateway::new(vec![
            ProviderError::from_status(429, "slow down"),
            ProviderError::transient("connection reset"),
        ]);
        let gateway = RetryingGateway::new(inner.clone(), fast_policy(3));

        let response = gateway.complete(&request(), &|_: &str| {}).await.unwrap();

        assert_eq!(response.response, ModelResponse::Text("ok".to_string()));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_after_partial_text_is_announced() {
        let inner = FlakyGateway::streaming(vec![ProviderError::transient("reset")], "o");
        let gateway = RetryingGateway::new(inner.clone(), fast_policy(3));
        let streamed = Mutex::new(String::new());

        gateway
            .complete(&request(), &|t: &str| streamed.lock().unwrap().push_str(t))
            .await
            .unwrap();

        assert_eq!(
            streamed.into_inner().unwrap(),
            format!("o{RETRY_NOTICE}ok")
        );
    }

    #[tokio::test]
    async fn test_retry_without_partial_text_is_silent() {
        let inner = FlakyGateway::new(vec![ProviderError::transient("reset")]);
        let gateway = RetryingGateway::new(inner.clone(), fast_policy(3));
        let streamed = Mutex::new(String::new());

        gateway
            .complete(&request(), &|t: &str| streamed.lock().unwrap().push_str(t))
            .await
            .unwrap();

        assert_eq!(streamed.into_inner().unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let inner = FlakyGateway::new(vec![ProviderError::from_status(503, "down"); 5]);
        let gateway = RetryingGateway::new(inner.clone(), fast_policy(3));

        let err = gateway.complete(&request(), &|_: &str| {}).await.unwrap_err();

        assert!(err.is_transient());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let inner = FlakyGateway::new(vec![ProviderError::from_status(401, "bad key")]);
        let gateway = RetryingGateway::new(inner.clone(), fast_policy(3));

        let err = gateway.complete(&request(), &|_: &str| {}).await.unwrap_err();

        assert!(matches!(
            err,
            ProviderError::Permanent {
                kind: PermanentKind::Auth,
                ..
            }
        ));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(300),
        };
        let first = policy.backoff(1);
        assert!(first >= Duration::from_millis(100) && first <= Duration::from_millis(125));
        let second = policy.backoff(2);
        assert!(second >= Duration::from_millis(200) && second <= Duration::from_millis(250));
        let capped = policy.backoff(6);
        assert!(capped >= Duration::from_millis(300) && capped <= Duration::from_millis(375));
    }
}
