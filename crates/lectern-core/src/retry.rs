//! Bounded retry with exponential backoff for external calls.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::defaults;
use crate::error::{Error, Result};

/// Model name fragments that mark slow reasoning-class models.
const REASONING_MODEL_MARKERS: &[&str] = &["o1", "o3", "r1", "reasoner", "thinking"];

/// How many times, and how patiently, to retry a failing operation.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Zero is treated as one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Delay growth per attempt; `1.0` gives a fixed delay.
    pub multiplier: f64,
    /// Retry every error, not just transient ones.
    pub retry_all_errors: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: defaults::RETRY_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(defaults::RETRY_BASE_DELAY_MS),
            max_delay: Duration::from_millis(defaults::RETRY_MAX_DELAY_MS),
            multiplier: defaults::RETRY_MULTIPLIER,
            retry_all_errors: false,
        }
    }
}

impl RetryPolicy {
    /// Fixed-delay policy that retries any error.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            max_delay: delay,
            multiplier: 1.0,
            retry_all_errors: true,
        }
    }

    /// Backoff tuned to the model: reasoning models answer slowly and get
    /// rate-limited for longer, so they wait longer between attempts.
    pub fn for_model(model: &str) -> Self {
        if is_reasoning_model(model) {
            Self {
                base_delay: Duration::from_millis(defaults::RETRY_REASONING_BASE_DELAY_MS),
                max_delay: Duration::from_millis(defaults::RETRY_REASONING_MAX_DELAY_MS),
                ..Self::default()
            }
        } else {
            Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Delay to wait after the given 1-based attempt failed.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(30) as i32;
        let factor = self.multiplier.max(1.0).powi(exponent);
        let millis = (self.base_delay.as_millis() as f64 * factor)
            .min(self.max_delay.as_millis() as f64);
        Duration::from_millis(millis as u64)
    }

    pub fn should_retry(&self, error: &Error) -> bool {
        self.retry_all_errors || error.is_transient()
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Whether a model name looks like a reasoning-class model.
pub fn is_reasoning_model(model: &str) -> bool {
    let lower = model.to_ascii_lowercase();
    lower
        .split(|c: char| !c.is_ascii_alphanumeric())
        .any(|part| REASONING_MODEL_MARKERS.contains(&part))
        || lower.contains("reasoner")
        || lower.contains("thinking")
}

/// Run `f` until it succeeds, the error is not retryable, or attempts run out.
///
/// `f` receives the 1-based attempt number. The last error is returned as-is.
pub async fn retry_async<T, F, Fut>(policy: &RetryPolicy, op: &str, mut f: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = policy.attempts();
    let mut attempt = 1;
    loop {
        match f(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(op, attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if attempt < attempts && policy.should_retry(&e) => {
                let delay = policy.delay_for(attempt);
                warn!(
                    op,
                    attempt,
                    max_attempts = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_default_policy() {
        let p = RetryPolicy::default();
        assert_eq!(p.max_attempts, defaults::RETRY_MAX_ATTEMPTS);
        assert!(!p.retry_all_errors);
    }

    #[test]
    fn test_delay_grows_and_caps() {
        let p = RetryPolicy::default()
            .with_base_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(350));
        assert_eq!(p.delay_for(1), Duration::from_millis(100));
        assert_eq!(p.delay_for(2), Duration::from_millis(200));
        assert_eq!(p.delay_for(3), Duration::from_millis(350));
        assert_eq!(p.delay_for(40), Duration::from_millis(350));
    }

    #[test]
    fn test_fixed_policy_has_constant_delay() {
        let p = RetryPolicy::fixed(3, Duration::from_millis(500));
        assert_eq!(p.delay_for(1), Duration::from_millis(500));
        assert_eq!(p.delay_for(2), Duration::from_millis(500));
        assert!(p.should_retry(&Error::Generation("bad".into())));
    }

    #[test]
    fn test_reasoning_models_wait_longer() {
        for model in ["o1-preview", "o3-mini", "deepseek-r1", "deepseek-reasoner", "claude-thinking"] {
            assert!(is_reasoning_model(model), "{model}");
            assert!(RetryPolicy::for_model(model).base_delay > RetryPolicy::default().base_delay);
        }
        for model in ["gpt-4o-mini", "llama3.1", "mistral-large"] {
            assert!(!is_reasoning_model(model), "{model}");
            assert_eq!(RetryPolicy::for_model(model), RetryPolicy::default());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_async_recovers_from_transient() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::default().with_max_attempts(3);
        let c = calls.clone();
        let result = retry_async(&policy, "test", move |_| {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(Error::Transient("429".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_async_gives_up_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::default().with_max_attempts(2);
        let c = calls.clone();
        let result: Result<()> = retry_async(&policy, "test", move |_| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(Error::Transient("503".into()))
            }
        })
        .await;
        assert!(matches!(result, Err(Error::Transient(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_async_does_not_retry_permanent_errors() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::default();
        let c = calls.clone();
        let result: Result<()> = retry_async(&policy, "test", move |_| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(Error::Config("missing key".into()))
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_async_passes_attempt_number() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let policy = RetryPolicy::fixed(3, Duration::from_millis(10));
        let s = seen.clone();
        let _: Result<()> = retry_async(&policy, "test", move |attempt| {
            s.lock().unwrap().push(attempt);
            async { Err(Error::Generation("no".into())) }
        })
        .await;
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
    }
}
