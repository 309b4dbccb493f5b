use alloc::boxed::Box;
use core::future::Future;

/// A boxed error from a repository backend.
pub type BoxError = Box<dyn core::error::Error + Send + Sync + 'static>;

/// Failure reported by a [`SequenceRepository`].
///
/// The split decides what the allocator does next: transient failures are
/// retried by the bounded loader loop, fatal ones abort the refill at once.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    /// The call may succeed if repeated (I/O error, timeout, lost connection).
    #[error("transient repository failure: {0}")]
    Transient(#[source] BoxError),

    /// The call will not succeed by repeating it (missing row, bad schema).
    #[error("repository failure: {0}")]
    Fatal(#[source] BoxError),
}

impl RepositoryError {
    /// Wraps `err` as a retryable failure.
    pub fn transient(err: impl Into<BoxError>) -> Self {
        Self::Transient(err.into())
    }

    /// Wraps `err` as a non-retryable failure.
    pub fn fatal(err: impl Into<BoxError>) -> Self {
        Self::Fatal(err.into())
    }

    /// Returns `true` if the failed call is worth repeating.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// The backing store holding one counter per tag.
///
/// Global uniqueness across processes rests entirely on
/// [`Self::increase_sequence`] being an atomic conditional update; allocators
/// treat the repository as that opaque primitive and add no locking of their
/// own around it.
pub trait SequenceRepository: Send + Sync + 'static {
    /// Returns the counter currently stored for `tag`.
    ///
    /// Row-style stores have no side effect here. Pure sequence generators
    /// (used with [`MultiplySequenceRefill`]) advance on every read.
    ///
    /// [`MultiplySequenceRefill`]: crate::refill::MultiplySequenceRefill
    fn current_sequence(&self, tag: &str)
    -> impl Future<Output = Result<u64, RepositoryError>> + Send;

    /// Sets the counter for `tag` to `expected + increment` iff it still
    /// equals `expected`, returning whether the update applied.
    ///
    /// Must be atomic with respect to every concurrent caller, in any process,
    /// and must leave no partial effect when it returns `false` or fails.
    fn increase_sequence(
        &self,
        tag: &str,
        increment: u64,
        expected: u64,
    ) -> impl Future<Output = Result<bool, RepositoryError>> + Send;
}
