#[cfg(feature = "tracing")]
use tracing::instrument;

use super::{RefillError, RefillStrategy};
use crate::{error::Error, repository::SequenceRepository, segment::Segment};

/// Derives ranges from a pure sequence generator.
///
/// Each read returns a fresh sequence value `n` and the segment is
/// `(n * batch_size - batch_size, n * batch_size]`. There is no conditional
/// update: the generator itself guarantees that no two readers see the same
/// `n`. Use this when the backing store is a database `SEQUENCE` rather than a
/// row with a comparable counter.
#[derive(Debug, Clone, Copy, Default)]
pub struct MultiplySequenceRefill;

impl RefillStrategy for MultiplySequenceRefill {
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
        let sequence = repository.current_sequence(tag).await?;
        let max_id = sequence
            .checked_mul(batch_size)
            .ok_or_else(|| RefillError::Fatal(Error::SequenceOverflow { tag: tag.into() }))?;
        let segment = Segment::new(max_id, batch_size).map_err(RefillError::Fatal)?;

        #[cfg(feature = "tracing")]
        tracing::debug!(tag, sequence, %segment, "derived segment from sequence");

        Ok(segment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{InMemorySequenceGenerator, InMemorySequenceRepository};

    #[tokio::test]
    async fn successive_reads_yield_adjacent_segments() {
        let generator = InMemorySequenceGenerator::new();
        let strategy = MultiplySequenceRefill;

        let mut segments = Vec::new();
        for _ in 0..3 {
            segments.push(strategy.next_segment(&generator, "t", 20).await.unwrap());
        }

        assert_eq!(
            segments,
            [
                Segment::new(20, 20).unwrap(),
                Segment::new(40, 20).unwrap(),
                Segment::new(60, 20).unwrap(),
            ]
        );
    }

    #[tokio::test]
    async fn zero_sequence_is_an_invalid_segment() {
        // A row-style store reads 0 for a fresh tag and never advances.
        let repository = InMemorySequenceRepository::new();

        let err = MultiplySequenceRefill
            .next_segment(&repository, "t", 20)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            RefillError::Fatal(Error::InvalidSegment {
                max_id: Some(0),
                step: Some(20)
            })
        ));
    }
}
