use std::collections::HashMap;

use parking_lot::Mutex;

use super::{RepositoryError, SequenceRepository};

/// An in-process, row-style sequence store.
///
/// Each tag maps to a counter updated with a compare-and-set, mirroring a
/// `UPDATE .. SET current = current + ? WHERE name = ? AND current = ?`
/// statement. Unknown tags start at zero.
///
/// Useful for tests and single-process deployments; it gives no durability.
#[derive(Debug, Default)]
pub struct InMemorySequenceRepository {
    sequences: Mutex<HashMap<String, u64>>,
}

impl InMemorySequenceRepository {
    /// Creates an empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds `tag` with a starting counter value.
    #[must_use]
    pub fn with_sequence(self, tag: impl Into<String>, value: u64) -> Self {
        self.set_sequence(tag, value);
        self
    }

    /// Overwrites the counter for `tag`.
    pub fn set_sequence(&self, tag: impl Into<String>, value: u64) {
        self.sequences.lock().insert(tag.into(), value);
    }

    /// Returns the stored counter for `tag`, or zero if it was never touched.
    pub fn sequence(&self, tag: &str) -> u64 {
        self.sequences.lock().get(tag).copied().unwrap_or(0)
    }
}

impl SequenceRepository for InMemorySequenceRepository {
    async fn current_sequence(&self, tag: &str) -> Result<u64, RepositoryError> {
        Ok(self.sequence(tag))
    }

    async fn increase_sequence(
        &self,
        tag: &str,
        increment: u64,
        expected: u64,
    ) -> Result<bool, RepositoryError> {
        let mut sequences = self.sequences.lock();
        let current = sequences.entry(tag.to_owned()).or_insert(0);
        if *current != expected {
            return Ok(false);
        }
        *current = expected
            .checked_add(increment)
            .ok_or_else(|| RepositoryError::fatal(format!("sequence `{tag}` overflowed")))?;
        Ok(true)
    }
}

/// An in-process sequence generator, in the style of a database `SEQUENCE`.
///
/// Every read of [`SequenceRepository::current_sequence`] advances the tag's
/// sequence by one and returns the new value, so the first read yields `1`.
/// Conditional updates are not supported and always report `false`.
#[derive(Debug, Default)]
pub struct InMemorySequenceGenerator {
    sequences: Mutex<HashMap<String, u64>>,
}

impl InMemorySequenceGenerator {
    /// Creates a generator with every sequence at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the last value handed out for `tag`.
    pub fn last_value(&self, tag: &str) -> u64 {
        self.sequences.lock().get(tag).copied().unwrap_or(0)
    }
}

impl SequenceRepository for InMemorySequenceGenerator {
    async fn current_sequence(&self, tag: &str) -> Result<u64, RepositoryError> {
        let mut sequences = self.sequences.lock();
        let value = sequences.entry(tag.to_owned()).or_insert(0);
        *value = value
            .checked_add(1)
            .ok_or_else(|| RepositoryError::fatal(format!("sequence `{tag}` overflowed")))?;
        Ok(*value)
    }

    async fn increase_sequence(
        &self,
        _tag: &str,
        _increment: u64,
        _expected: u64,
    ) -> Result<bool, RepositoryError> {
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn conditional_update_applies_only_on_match() {
        let repository = InMemorySequenceRepository::new().with_sequence("orders", 40);
        assert_eq!(repository.current_sequence("orders").await.unwrap(), 40);

        assert!(!repository.increase_sequence("orders", 10, 30).await.unwrap());
        assert_eq!(repository.sequence("orders"), 40);

        assert!(repository.increase_sequence("orders", 10, 40).await.unwrap());
        assert_eq!(repository.sequence("orders"), 50);
    }

    #[tokio::test]
    async fn unknown_tags_start_at_zero() {
        let repository = InMemorySequenceRepository::new();
        assert_eq!(repository.current_sequence("users").await.unwrap(), 0);
        assert!(repository.increase_sequence("users", 5, 0).await.unwrap());
        assert_eq!(repository.sequence("users"), 5);
    }

    #[tokio::test]
    async fn overflow_is_fatal() {
        let repository = InMemorySequenceRepository::new().with_sequence("t", u64::MAX - 1);
        let err = repository.increase_sequence("t", 5, u64::MAX - 1).await.unwrap_err();
        assert!(!err.is_transient());
        assert_eq!(repository.sequence("t"), u64::MAX - 1);
    }

    #[tokio::test]
    async fn generator_advances_on_every_read() {
        let generator = InMemorySequenceGenerator::new();
        assert_eq!(generator.current_sequence("t").await.unwrap(), 1);
        assert_eq!(generator.current_sequence("t").await.unwrap(), 2);
        assert_eq!(generator.current_sequence("other").await.unwrap(), 1);
        assert_eq!(generator.last_value("t"), 2);
        assert!(!generator.increase_sequence("t", 20, 2).await.unwrap());
    }
}
