//! Retry wrapper for outbound model calls.
//!
//! Only quota / rate-limit failures are retried, with a plain exponential delay
//! (`base_delay * 2^attempt`). Every other error, and the last quota error once attempts
//! run out, goes straight back to the caller. Each call site owns its policy.

use std::future::Future;
use std::time::Duration;

use serde::Deserialize;
use tracing::{error, info, warn};

use crate::error::AiError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt (0 = single attempt).
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub const fn new(max_retries: u32, base_delay_ms: u64) -> Self {
        Self { max_retries, base_delay: Duration::from_millis(base_delay_ms) }
    }

    /// Delay before retry number `attempt + 1`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor)
    }
}

/// Policies per call site. Values mirror what each flow has historically tolerated:
/// workshop generation is long-running, chat waits longer for quota to recover,
/// insight extraction is best-effort.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicies {
    pub generation: RetryPolicy,
    pub chat: RetryPolicy,
    pub insight: RetryPolicy,
    pub grading: RetryPolicy,
    pub report: RetryPolicy,
}

impl Default for RetryPolicies {
    fn default() -> Self {
        Self {
            generation: RetryPolicy::new(3, 4_000),
            chat: RetryPolicy::new(3, 10_000),
            insight: RetryPolicy::new(1, 1_000),
            grading: RetryPolicy::new(2, 3_000),
            report: RetryPolicy::new(3, 10_000),
        }
    }
}

/// TOML shape for one policy override.
#[derive(Clone, Copy, Debug, Deserialize)]
pub struct RetryPolicyCfg {
    pub max_retries: u32,
    pub base_delay_ms: u64,
}

impl From<RetryPolicyCfg> for RetryPolicy {
    fn from(c: RetryPolicyCfg) -> Self {
        RetryPolicy::new(c.max_retries, c.base_delay_ms)
    }
}

/// Run `operation` under `policy`.
pub async fn with_backoff<T, F, Fut>(policy: RetryPolicy, operation_name: &str, mut operation: F) -> Result<T, AiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AiError>>,
{
    let mut attempt: u32 = 0;
    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    info!(target: "gemini", operation = operation_name, attempt = attempt + 1, "Model call succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if e.is_quota() && attempt < policy.max_retries => {
                let delay = policy.delay_for(attempt);
                warn!(
                    target: "gemini",
                    operation = operation_name,
                    attempt = attempt + 1,
                    max_attempts = policy.max_retries + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Quota exceeded, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                error!(target: "gemini", operation = operation_name, attempts = attempt + 1, error = %e, "Model call failed");
                return Err(e);
            }
        }
    }
}
