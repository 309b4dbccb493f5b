use alloc::sync::Arc;

use crate::repository::RepositoryError;

/// A result type defaulting to the crate [`Error`].
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// All errors that can escape a `segid` allocator.
///
/// Transient repository failures and optimistic-update conflicts are retried
/// inside [`SegmentLoader`] and never show up here. Everything in this enum is
/// fatal for the call that produced it: the allocator cannot hand out an id
/// without risking a duplicate, so it refuses instead.
///
/// [`SegmentLoader`]: crate::refill::SegmentLoader
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A segment was built without a usable `max_id`/`step` pair.
    ///
    /// This points at a repository that violates its contract (for example a
    /// sequence generator that returned zero).
    #[error("invalid segment: max_id={max_id:?}, step={step:?}")]
    InvalidSegment {
        max_id: Option<u64>,
        step: Option<u64>,
    },

    /// The repository retry loop ran out of attempts.
    #[error("failed to load a segment for `{tag}` after {attempts} attempts")]
    RefillLoad { tag: Arc<str>, attempts: u32 },

    /// The fallback loop could not fill the standby segment before a swap.
    #[error("failed to fill the standby segment for `{tag}` after {attempts} attempts")]
    RefillExhausted { tag: Arc<str>, attempts: u32 },

    /// Reserving the next range would overflow `u64`.
    #[error("sequence for `{tag}` overflowed")]
    SequenceOverflow { tag: Arc<str> },

    /// The repository reported a failure it does not consider retryable.
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    /// A refill task panicked on the background pool.
    #[error("refill task for `{tag}` failed: {reason}")]
    RefillTask { tag: Arc<str>, reason: String },

    /// The allocator, registry, or refill pool was shut down.
    #[error("operation cancelled")]
    Cancelled,

    /// An [`AllocatorConfig`] value is out of range.
    ///
    /// [`AllocatorConfig`]: crate::AllocatorConfig
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}

impl Error {
    /// Returns `true` if the error came from a shutdown rather than from the
    /// repository.
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
