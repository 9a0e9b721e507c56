//! Configuration for the synchronizer.

use rand::Rng;
use std::time::Duration;

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Downloaded records accumulated before a batch is applied.
    pub download_batch_size: usize,
    /// Commits uploaded per signed batch.
    pub upload_batch_size: usize,
    /// Deadline of every individual remote call.
    pub timeout: Duration,
    /// Retry configuration for transient failures.
    pub retry: RetryConfig,
    /// Whether a dropped watch is re-opened from the persisted cursor.
    pub watch_reconnect: bool,
}

impl SyncConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self {
            download_batch_size: 64,
            upload_batch_size: 16,
            timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
            watch_reconnect: true,
        }
    }

    /// Sets the download batch threshold.
    #[must_use]
    pub fn with_download_batch_size(mut self, size: usize) -> Self {
        self.download_batch_size = size.max(1);
        self
    }

    /// Sets the upload batch size.
    #[must_use]
    pub fn with_upload_batch_size(mut self, size: usize) -> Self {
        self.upload_batch_size = size.max(1);
        self
    }

    /// Sets the retry configuration.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the per-call timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets whether dropped watches are re-opened.
    #[must_use]
    pub fn with_watch_reconnect(mut self, reconnect: bool) -> Self {
        self.watch_reconnect = reconnect;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first one included.
    pub max_attempts: u32,
    /// Initial delay between retries.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    #[must_use]
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Creates a configuration with no retries.
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.add_jitter = jitter;
        self
    }

    /// Returns true if another attempt may follow attempt `attempt`
    /// (0-indexed).
    #[must_use]
    pub fn allows_retry_after(&self, attempt: u32) -> bool {
        attempt + 1 < self.max_attempts
    }

    /// Calculates the delay before a given attempt (0-indexed).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let base_delay = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let delay_secs = base_delay.min(self.max_delay.as_secs_f64());

        if self.add_jitter && delay_secs > 0.0 {
            // up to 25%
            let jitter = delay_secs * 0.25 * rand::thread_rng().gen_range(0.0..1.0);
            Duration::from_secs_f64(delay_secs + jitter)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_config_builder() {
        let config = SyncConfig::new()
            .with_download_batch_size(8)
            .with_upload_batch_size(4)
            .with_timeout(Duration::from_secs(5))
            .with_watch_reconnect(false);

        assert_eq!(config.download_batch_size, 8);
        assert_eq!(config.upload_batch_size, 4);
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert!(!config.watch_reconnect);
    }

    #[test]
    fn default_download_batch() {
        assert_eq!(SyncConfig::default().download_batch_size, 64);
        assert_eq!(SyncConfig::new().with_download_batch_size(0).download_batch_size, 1);
    }

    #[test]
    fn retry_config_no_retry() {
        let config = RetryConfig::no_retry();
        assert_eq!(config.max_attempts, 1);
        assert!(!config.allows_retry_after(0));
    }

    #[test]
    fn retry_delay_calculation() {
        let config = RetryConfig::new(5)
            .with_initial_delay(Duration::from_millis(100))
            .with_backoff_multiplier(2.0);

        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);

        let delay1 = config.delay_for_attempt(1);
        assert!(delay1 >= Duration::from_millis(100));
        assert!(delay1 <= Duration::from_millis(125));

        let delay2 = config.delay_for_attempt(2);
        assert!(delay2 >= Duration::from_millis(200));
        assert!(config.allows_retry_after(3));
        assert!(!config.allows_retry_after(4));
    }

    #[test]
    fn retry_delay_respects_max() {
        let config = RetryConfig::new(10)
            .with_initial_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(5))
            .with_backoff_multiplier(10.0);

        let delay = config.delay_for_attempt(5);
        assert!(delay <= Duration::from_millis(6250));
    }

    #[test]
    fn without_jitter_delays_are_exact() {
        let config = RetryConfig::new(3)
            .with_initial_delay(Duration::from_millis(10))
            .with_jitter(false);
        let close = |actual: Duration, millis: u64| {
            actual.as_micros().abs_diff(u128::from(millis) * 1000) <= 1
        };
        assert!(close(config.delay_for_attempt(1), 10));
        assert!(close(config.delay_for_attempt(2), 20));
    }
}
