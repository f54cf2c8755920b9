//! Retry backoff policy shared by the gateway, fetcher, sampler and uploader.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How the wait grows between attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// `base * (attempt + 1)`
    Linear,
    /// `base * 2^attempt`
    #[default]
    Exponential,
}

/// Base delay plus growth strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub strategy: BackoffStrategy,
}

impl BackoffPolicy {
    pub fn new(base: Duration, strategy: BackoffStrategy) -> Self {
        Self { base, strategy }
    }

    pub fn exponential(base: Duration) -> Self {
        Self::new(base, BackoffStrategy::Exponential)
    }

    pub fn linear(base: Duration) -> Self {
        Self::new(base, BackoffStrategy::Linear)
    }

    /// Delay to wait after the zero-based `attempt` failed.
    pub fn delay(&self, attempt: u32) -> Duration {
        match self.strategy {
            BackoffStrategy::Linear => self.base.saturating_mul(attempt.saturating_add(1)),
            // Shift is capped so absurd retry counts can't overflow.
            BackoffStrategy::Exponential => self.base.saturating_mul(1u32 << attempt.min(16)),
        }
    }

    /// Suspend the current task for [`delay`](Self::delay).
    pub async fn wait(&self, attempt: u32) {
        let delay = self.delay(attempt);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_doubles() {
        let policy = BackoffPolicy::exponential(Duration::from_millis(500));
        assert_eq!(policy.delay(0), Duration::from_millis(500));
        assert_eq!(policy.delay(1), Duration::from_millis(1000));
        assert_eq!(policy.delay(3), Duration::from_millis(4000));
    }

    #[test]
    fn linear_grows_by_base() {
        let policy = BackoffPolicy::linear(Duration::from_secs(30));
        assert_eq!(policy.delay(0), Duration::from_secs(30));
        assert_eq!(policy.delay(2), Duration::from_secs(90));
    }

    #[test]
    fn huge_attempts_saturate() {
        let policy = BackoffPolicy::exponential(Duration::from_secs(1));
        assert_eq!(policy.delay(200), Duration::from_secs(1 << 16));
    }
}
