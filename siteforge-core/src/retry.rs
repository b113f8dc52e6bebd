use crate::error::{ForgeError, Result};
use std::future::Future;
use std::time::Duration;

/// Bounded exponential backoff shared by every provider call site.
///
/// The base delay doubles per attempt. Retries happen at the granularity of
/// a single HTTP call, never a whole deployment.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt)
    }
}

/// Run `operation` under the policy, re-attempting only retryable failures.
///
/// `operation` receives the zero-based attempt number. The last error is
/// returned once attempts are exhausted.
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, op_name: &str, operation: F) -> Result<T>
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_error = None;

    for attempt in 0..policy.max_attempts {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if !error.is_retryable() {
                    return Err(error);
                }

                tracing::warn!(
                    "{} failed (attempt {}/{}): {}",
                    op_name,
                    attempt + 1,
                    policy.max_attempts,
                    error
                );
                last_error = Some(error);

                if attempt + 1 < policy.max_attempts {
                    tokio::time::sleep(policy.delay_for(attempt)).await;
                }
            }
        }
    }

    Err(last_error
        .unwrap_or_else(|| ForgeError::Internal(format!("{} failed with no attempts", op_name))))
}
