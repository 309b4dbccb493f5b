use core::{fmt, future::Future};

use crate::{
    error::Error,
    repository::{RepositoryError, SequenceRepository},
    segment::Segment,
};

/// Why a single refill attempt did not produce a segment.
#[derive(Debug)]
pub enum RefillError {
    /// Another writer moved the counter between the read and the conditional
    /// update.
    Conflict {
        /// The counter value the update expected.
        expected: u64,
    },
    /// The repository failed in a way that may go away on retry.
    Transient(RepositoryError),
    /// Retrying cannot help.
    Fatal(Error),
}

impl RefillError {
    /// Returns `true` if the attempt should be repeated.
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::Transient(_))
    }
}

impl From<RepositoryError> for RefillError {
    fn from(err: RepositoryError) -> Self {
        if err.is_transient() {
            Self::Transient(err)
        } else {
            Self::Fatal(Error::Repository(err))
        }
    }
}

impl fmt::Display for RefillError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Conflict { expected } => {
                write!(f, "sequence moved away from {expected} before the update")
            }
            Self::Transient(err) => write!(f, "{err}"),
            Self::Fatal(err) => write!(f, "{err}"),
        }
    }
}

/// Computes the next [`Segment`] for a tag from the backing store.
///
/// A strategy performs exactly one attempt; retries belong to
/// [`SegmentLoader`]. Strategies are stateless and cheap to clone so every
/// allocator created by a registry gets its own copy.
///
/// [`SegmentLoader`]: crate::refill::SegmentLoader
pub trait RefillStrategy: Clone + Send + Sync + 'static {
    /// Reserves the next range of `batch_size` ids for `tag`.
    fn next_segment<R>(
        &self,
        repository: &R,
        tag: &str,
        batch_size: u64,
    ) -> impl Future<Output = Result<Segment, RefillError>> + Send
    where
        R: SequenceRepository;
}
