use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use fluvio_protocol::{Decoder, Encoder};
use http::StatusCode;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::client_config::ConnectorClientConfig;
use crate::config::ClientDefaults;
use crate::error::ConnectorError;

/// Shape of the delay between two attempts of a failed remote call
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Encoder, Decoder)]
#[derive(Serialize, Deserialize)]
#[fluvio(encode_discriminant)]
#[repr(u8)]
#[serde(try_from = "String", into = "String")]
pub enum RetryBackoffPolicy {
    #[default]
    Constant = 0,
    ExponentialEqualJitter = 1,
    ExponentialFullJitter = 2,
}

impl RetryBackoffPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Constant => "constant",
            Self::ExponentialEqualJitter => "exponential_equal_jitter",
            Self::ExponentialFullJitter => "exponential_full_jitter",
        }
    }
}

impl FromStr for RetryBackoffPolicy {
    type Err = ConnectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "constant" => Ok(Self::Constant),
            "exponential_equal_jitter" => Ok(Self::ExponentialEqualJitter),
            "exponential_full_jitter" => Ok(Self::ExponentialFullJitter),
            _ => Err(ConnectorError::UnsupportedRetryPolicy(s.to_owned())),
        }
    }
}

impl TryFrom<String> for RetryBackoffPolicy {
    type Error = ConnectorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RetryBackoffPolicy> for String {
    fn from(policy: RetryBackoffPolicy) -> Self {
        policy.as_str().to_owned()
    }
}

impl fmt::Display for RetryBackoffPolicy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Only throttled calls are worth repeating, anything else fails the same way again
pub fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
}

/// Effective retry schedule of one connector, absent client config fields resolved
/// against the caller defaults
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryBackoff {
    policy: RetryBackoffPolicy,
    base: Duration,
    timeout: Duration,
    max_retry_times: i32,
}

impl RetryBackoff {
    pub fn new(
        policy: RetryBackoffPolicy,
        base: Duration,
        timeout: Duration,
        max_retry_times: i32,
    ) -> Self {
        Self {
            policy,
            base,
            timeout,
            max_retry_times,
        }
    }

    pub fn from_config(config: Option<&ConnectorClientConfig>, defaults: &ClientDefaults) -> Self {
        let config = config.cloned().unwrap_or_default();
        let backoff_millis = config
            .retry_backoff_millis
            .unwrap_or(defaults.retry_backoff_millis)
            .max(0);
        let timeout_seconds = config
            .retry_timeout_seconds
            .unwrap_or(defaults.retry_timeout_seconds)
            .max(0);
        Self {
            policy: config
                .retry_backoff_policy
                .unwrap_or(defaults.retry_backoff_policy),
            base: Duration::from_millis(backoff_millis as u64),
            timeout: Duration::from_secs(timeout_seconds as u64),
            max_retry_times: config.max_retry_times.unwrap_or(defaults.max_retry_times),
        }
    }

    pub fn policy(&self) -> RetryBackoffPolicy {
        self.policy
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// whether retry number `attempt` (zero based) is still permitted, negative
    /// `max_retry_times` means unlimited
    pub fn allows_attempt(&self, attempt: u32) -> bool {
        self.max_retry_times < 0 || attempt < self.max_retry_times as u32
    }

    /// Delay before retry number `attempt`
    pub fn delay(&self, attempt: u32) -> Duration {
        self.delay_with(attempt, &mut rand::thread_rng())
    }

    pub fn delay_with<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let base = self.base.as_millis() as u64;
        let exponential = 1u64
            .checked_shl(attempt)
            .map(|factor| base.saturating_mul(factor))
            .unwrap_or(u64::MAX);
        let millis = match self.policy {
            RetryBackoffPolicy::Constant => base,
            RetryBackoffPolicy::ExponentialEqualJitter => {
                let half = exponential / 2;
                half.saturating_add(rng.gen_range(0..=half))
            }
            RetryBackoffPolicy::ExponentialFullJitter => rng.gen_range(0..=exponential),
        };
        Duration::from_millis(millis).min(self.timeout)
    }

    /// Decide whether a failed call is retried and how long to wait first.
    ///
    /// `elapsed` is the time spent since the first attempt, the wait never pushes
    /// past the retry timeout.
    pub fn next_delay(
        &self,
        attempt: u32,
        elapsed: Duration,
        status: StatusCode,
    ) -> Option<Duration> {
        if !is_retryable_status(status) {
            debug!(%status, "status is not retryable");
            return None;
        }
        if !self.allows_attempt(attempt) {
            debug!(attempt, max = self.max_retry_times, "retry attempts exhausted");
            return None;
        }
        let remaining = self.timeout.checked_sub(elapsed).filter(|d| !d.is_zero())?;
        let delay = self.delay(attempt).min(remaining);
        debug!(
            attempt,
            policy = %self.policy,
            delay_ms = delay.as_millis() as u64,
            "scheduling retry"
        );
        Some(delay)
    }
}
