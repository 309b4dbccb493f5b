#[cfg(feature = "tracing")]
use tracing::instrument;

use super::{RefillError, RefillStrategy};
use crate::{error::Error, repository::SequenceRepository, segment::Segment};

/// Reserves ranges with an optimistic conditional update.
///
/// Reads the stored counter `current`, then asks the repository to move it to
/// `current + batch_size` only if nobody else moved it first. On success the
/// range `(current, current + batch_size]` belongs to this allocator. A lost
/// race is reported as [`RefillError::Conflict`] and retried by the loader.
///
/// This is the default strategy and the right one for a row-per-tag table.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompareAndSwapRefill;

impl RefillStrategy for CompareAndSwapRefill {
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self, repository)))]
    async fn next_segment<R>(
        &self,
        repository: &R,
        tag: &str,
        batch_size: u64,
    ) -> Result<Segment, RefillError>
    where
        R: SequenceRepository,
    {
        let current = repository.current_sequence(tag).await?;
        let max_id = current
            .checked_add(batch_size)
            .ok_or_else(|| RefillError::Fatal(Error::SequenceOverflow { tag: tag.into() }))?;

        if !repository
            .increase_sequence(tag, batch_size, current)
            .await?
        {
            return Err(RefillError::Conflict { expected: current });
        }

        let segment = Segment::new(max_id, batch_size).map_err(RefillError::Fatal)?;

        #[cfg(feature = "tracing")]
        tracing::debug!(tag, %segment, "reserved segment");

        Ok(segment)
    }
}
