use core::time::Duration;

use crate::error::{Error, Result};

/// Ids reserved per segment unless configured otherwise.
pub const DEFAULT_BATCH_SIZE: u64 = 5000;

/// How long a swap waits on an in-flight background refill.
pub const DEFAULT_SWAP_TIMEOUT: Duration = Duration::from_millis(1500);

/// Repository attempts per segment load.
pub const DEFAULT_LOAD_ATTEMPTS: u32 = 20;

/// Load attempts the swap fallback makes before giving up.
pub const DEFAULT_FILL_ATTEMPTS: u32 = 50;

/// Pause between attempts of either retry loop.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// A bounded retry budget with a fixed delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Pause between consecutive attempts.
    pub delay: Duration,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }
}

/// Tuning for a [`SegmentAllocator`].
///
/// The defaults reserve 5000 ids per segment, wait up to 1.5 s for a
/// background refill at swap time, retry a repository load 20 times and the
/// swap fallback 50 times, pausing 1 s between attempts.
///
/// # Example
/// ```
/// use core::time::Duration;
/// use segid::{AllocatorConfig, RetryPolicy};
///
/// let config = AllocatorConfig::default()
///     .with_batch_size(1000)
///     .with_load_retry(RetryPolicy::new(5, Duration::from_millis(200)));
/// assert!(config.validate().is_ok());
/// ```
///
/// [`SegmentAllocator`]: crate::SegmentAllocator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct AllocatorConfig {
    /// Ids reserved per segment.
    pub batch_size: u64,
    /// Upper bound on waiting for an in-flight background refill at swap time.
    pub swap_timeout: Duration,
    /// Retry budget around a single repository refill.
    pub load_retry: RetryPolicy,
    /// Retry budget of the swap-time fallback that force-fills the standby
    /// segment.
    pub fill_retry: RetryPolicy,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            swap_timeout: DEFAULT_SWAP_TIMEOUT,
            load_retry: RetryPolicy::new(DEFAULT_LOAD_ATTEMPTS, DEFAULT_RETRY_DELAY),
            fill_retry: RetryPolicy::new(DEFAULT_FILL_ATTEMPTS, DEFAULT_RETRY_DELAY),
        }
    }
}

impl AllocatorConfig {
    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: u64) -> Self {
        self.batch_size = batch_size;
        self
    }

    #[must_use]
    pub const fn with_swap_timeout(mut self, swap_timeout: Duration) -> Self {
        self.swap_timeout = swap_timeout;
        self
    }

    #[must_use]
    pub const fn with_load_retry(mut self, load_retry: RetryPolicy) -> Self {
        self.load_retry = load_retry;
        self
    }

    #[must_use]
    pub const fn with_fill_retry(mut self, fill_retry: RetryPolicy) -> Self {
        self.fill_retry = fill_retry;
        self
    }

    /// Checks that every budget allows at least one unit of progress.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for a zero batch size or a retry policy
    /// with zero attempts.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::InvalidConfig {
                reason: "batch_size must be greater than 0".into(),
            });
        }
        if self.load_retry.max_attempts == 0 {
            return Err(Error::InvalidConfig {
                reason: "load_retry.max_attempts must be greater than 0".into(),
            });
        }
        if self.fill_retry.max_attempts == 0 {
            return Err(Error::InvalidConfig {
                reason: "fill_retry.max_attempts must be greater than 0".into(),
            });
        }
        Ok(())
    }
}
