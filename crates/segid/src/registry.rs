//! Lazily created allocators keyed by tag.

use alloc::sync::Arc;
use core::time::Duration;
use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

use crate::{
    allocator::{AllocatorStatus, RefillPool, SegmentAllocator},
    config::AllocatorConfig,
    error::{Error, Result},
    refill::{CompareAndSwapRefill, RefillStrategy},
    repository::SequenceRepository,
};

type Slot<R, S> = Arc<OnceCell<Arc<SegmentAllocator<R, S>>>>;

/// One [`SegmentAllocator`] per tag, all sharing a repository, a strategy, a
/// config and (optionally) a [`RefillPool`].
///
/// The first request for a tag loads its initial segment; concurrent first
/// requests for the same tag wait on a single load. A failed load leaves the
/// tag uninitialized so the next request tries again.
///
/// # Example
/// ```
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// use std::sync::Arc;
/// use segid::{AllocatorConfig, InMemorySequenceRepository, SegmentRegistry};
///
/// let repository = Arc::new(InMemorySequenceRepository::new());
/// let registry = SegmentRegistry::new(repository, AllocatorConfig::default()).unwrap();
///
/// assert_eq!(registry.next_id("orders").await.unwrap(), 1);
/// assert_eq!(registry.next_id("users").await.unwrap(), 1);
/// assert_eq!(registry.next_id("orders").await.unwrap(), 2);
/// # });
/// ```
pub struct SegmentRegistry<R, S = CompareAndSwapRefill> {
    repository: Arc<R>,
    strategy: S,
    config: AllocatorConfig,
    pool: Option<RefillPool>,
    allocators: Mutex<HashMap<Arc<str>, Slot<R, S>>>,
    shutdown_token: CancellationToken,
}

impl<R> SegmentRegistry<R, CompareAndSwapRefill>
where
    R: SequenceRepository,
{
    /// A registry whose allocators refill inline.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `config` does not validate.
    pub fn new(repository: Arc<R>, config: AllocatorConfig) -> Result<Self> {
        Self::from_components(repository, CompareAndSwapRefill, config, None)
    }

    /// A registry whose allocators refill on `pool`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `config` does not validate.
    pub fn with_pool(repository: Arc<R>, config: AllocatorConfig, pool: RefillPool) -> Result<Self> {
        Self::from_components(repository, CompareAndSwapRefill, config, Some(pool))
    }
}

impl<R, S> SegmentRegistry<R, S>
where
    R: SequenceRepository,
    S: RefillStrategy,
{
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `config` does not validate.
    pub fn from_components(
        repository: Arc<R>,
        strategy: S,
        config: AllocatorConfig,
        pool: Option<RefillPool>,
    ) -> Result<Self> {
        config.validate()?;
        let shutdown_token = pool
            .as_ref()
            .map_or_else(CancellationToken::new, RefillPool::child_token);
        Ok(Self {
            repository,
            strategy,
            config,
            pool,
            allocators: Mutex::new(HashMap::new()),
            shutdown_token,
        })
    }

    pub const fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    /// Returns the allocator for `tag`, creating it on first use.
    ///
    /// # Errors
    ///
    /// - [`Error::Cancelled`] after [`Self::shutdown`], including when the
    ///   shutdown lands while the allocator is being created.
    /// - Any error from creating the allocator, typically
    ///   [`Error::RefillLoad`].
    pub async fn allocator(&self, tag: &str) -> Result<Arc<SegmentAllocator<R, S>>> {
        if self.shutdown_token.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let slot = {
            let mut allocators = self.allocators.lock();
            match allocators.get(tag) {
                Some(slot) => Arc::clone(slot),
                None => {
                    let slot: Slot<R, S> = Arc::default();
                    allocators.insert(Arc::from(tag), Arc::clone(&slot));
                    slot
                }
            }
        };

        let allocator = slot
            .get_or_try_init(|| async {
                #[cfg(feature = "tracing")]
                tracing::debug!(%tag, "creating allocator");

                SegmentAllocator::with_shutdown_token(
                    tag,
                    Arc::clone(&self.repository),
                    self.strategy.clone(),
                    self.config,
                    self.pool.clone(),
                    self.shutdown_token.child_token(),
                )
                .await
                .map(Arc::new)
            })
            .await?;

        // Shutdown drained the map before this slot was filled.
        if self.shutdown_token.is_cancelled() {
            allocator.close();
            return Err(Error::Cancelled);
        }
        Ok(Arc::clone(allocator))
    }

    /// Returns the next id for `tag`.
    ///
    /// # Errors
    ///
    /// See [`Self::allocator`] and [`SegmentAllocator::next_id`].
    pub async fn next_id(&self, tag: &str) -> Result<u64> {
        self.allocator(tag).await?.next_id().await
    }

    /// Returns `count` consecutive ids for `tag`.
    ///
    /// # Errors
    ///
    /// See [`Self::allocator`] and [`SegmentAllocator::next_ids`].
    pub async fn next_ids(&self, tag: &str, count: usize) -> Result<Vec<u64>> {
        self.allocator(tag).await?.next_ids(count).await
    }

    /// Tags with an initialized allocator, sorted.
    pub fn tags(&self) -> Vec<Arc<str>> {
        let mut tags: Vec<_> = self
            .allocators
            .lock()
            .iter()
            .filter(|(_, slot)| slot.initialized())
            .map(|(tag, _)| Arc::clone(tag))
            .collect();
        tags.sort_unstable();
        tags
    }

    /// Status of the allocator for `tag`, or `None` if it was never created.
    pub async fn status(&self, tag: &str) -> Option<AllocatorStatus> {
        let allocator = self
            .allocators
            .lock()
            .get(tag)
            .and_then(|slot| slot.get().cloned())?;
        Some(allocator.status().await)
    }

    /// Closes every allocator and, if present, shuts the refill pool down,
    /// waiting up to `timeout` for running refills.
    ///
    /// Allocators still being created are cancelled through the registry's
    /// token and never handed out.
    pub async fn shutdown(&self, timeout: Duration) {
        self.shutdown_token.cancel();

        let allocators: Vec<_> = self.allocators.lock().drain().collect();

        #[cfg(feature = "tracing")]
        tracing::info!(allocators = allocators.len(), "Shutting down segment registry");

        for (_, slot) in allocators {
            if let Some(allocator) = slot.get() {
                allocator.close();
            }
        }
        if let Some(pool) = &self.pool {
            pool.shutdown(timeout).await;
        }
    }
}

impl<R, S> core::fmt::Debug for SegmentRegistry<R, S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SegmentRegistry")
            .field("config", &self.config)
            .field("pool", &self.pool)
            .field("tags", &self.allocators.lock().len())
            .finish_non_exhaustive()
    }
}
