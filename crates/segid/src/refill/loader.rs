use alloc::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::{RefillError, RefillStrategy};
use crate::{
    config::RetryPolicy,
    error::{Error, Result},
    repository::SequenceRepository,
    segment::Segment,
};

/// Runs a [`RefillStrategy`] against a repository with a bounded retry budget.
///
/// Conflicts and transient repository failures are absorbed here, pausing
/// `policy.delay` between attempts. Exhausting the budget yields
/// [`Error::RefillLoad`]; a fatal strategy error is returned immediately.
pub struct SegmentLoader<R, S> {
    repository: Arc<R>,
    strategy: S,
    batch_size: u64,
    policy: RetryPolicy,
}

impl<R, S> SegmentLoader<R, S>
where
    R: SequenceRepository,
    S: RefillStrategy,
{
    pub const fn new(repository: Arc<R>, strategy: S, batch_size: u64, policy: RetryPolicy) -> Self {
        Self {
            repository,
            strategy,
            batch_size,
            policy,
        }
    }

    pub const fn batch_size(&self) -> u64 {
        self.batch_size
    }

    pub fn repository(&self) -> &Arc<R> {
        &self.repository
    }

    /// Loads the next segment for `tag`.
    ///
    /// # Errors
    ///
    /// - [`Error::RefillLoad`] once every attempt failed recoverably.
    /// - [`Error::Cancelled`] if `shutdown` fires while pausing between
    ///   attempts.
    /// - Any fatal error reported by the strategy.
    pub async fn load(&self, tag: &Arc<str>, shutdown: &CancellationToken) -> Result<Segment> {
        let attempts = self.policy.max_attempts;
        for attempt in 1..=attempts {
            let _err = match self
                .strategy
                .next_segment(self.repository.as_ref(), tag, self.batch_size)
                .await
            {
                Ok(segment) => return Ok(segment),
                Err(RefillError::Fatal(err)) => return Err(err),
                Err(err) => err,
            };

            #[cfg(feature = "tracing")]
            tracing::warn!(%tag, attempt, attempts, error = %_err, "segment load failed, retrying");

            if attempt < attempts {
                tokio::select! {
                    () = shutdown.cancelled() => return Err(Error::Cancelled),
                    () = tokio::time::sleep(self.policy.delay) => {}
                }
            }
        }

        #[cfg(feature = "tracing")]
        tracing::error!(%tag, attempts, "segment load exhausted its retry budget");

        Err(Error::RefillLoad {
            tag: Arc::clone(tag),
            attempts,
        })
    }
}
