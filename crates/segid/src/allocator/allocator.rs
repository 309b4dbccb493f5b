use alloc::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
#[cfg(feature = "tracing")]
use tracing::instrument;

use super::{
    coordinator::{self, Executor, PendingRefill},
    pool::RefillPool,
    status::AllocatorStatus,
};
use crate::{
    buffer::{Install, RefillTicket, SegmentBuffer},
    config::AllocatorConfig,
    error::{Error, Result},
    refill::{CompareAndSwapRefill, RefillStrategy, SegmentLoader},
    repository::SequenceRepository,
    segment::Segment,
};

struct State {
    buffer: SegmentBuffer,
    cursor: u64,
    pending: Option<PendingRefill>,
    swaps: u64,
}

/// A double-buffered id allocator for a single tag.
///
/// Ids are served from the active [`Segment`] by bumping a cursor. Once the
/// cursor passes the middle of the active segment, the standby slot is
/// refilled from the repository; once the active segment is exhausted, the
/// allocator swaps to the standby one. Every step runs under one async lock,
/// so callers on any number of tasks observe strictly increasing ids within a
/// segment and never a duplicate across segments (given a repository that
/// never hands out overlapping ranges).
///
/// ## Modes
///
/// - **Inline** ([`Self::new`]): the refill is awaited inside the critical
///   section. Simple, but the caller that crosses the middle pays the
///   repository latency.
/// - **Background** ([`Self::with_pool`]): the refill runs on a shared
///   [`RefillPool`]. Only the caller that triggers a swap may wait, for at
///   most [`AllocatorConfig::swap_timeout`], after which a bounded fallback
///   loop force-fills the standby segment.
///
/// ## Example
/// ```
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// use std::sync::Arc;
/// use segid::{AllocatorConfig, InMemorySequenceRepository, SegmentAllocator};
///
/// let repository = Arc::new(InMemorySequenceRepository::new());
/// let config = AllocatorConfig::default().with_batch_size(10);
/// let allocator = SegmentAllocator::new("orders", Arc::clone(&repository), config)
///     .await
///     .unwrap();
///
/// let mut ids = Vec::new();
/// for _ in 0..25 {
///     ids.push(allocator.next_id().await.unwrap());
/// }
/// assert_eq!(ids, (1..=25).collect::<Vec<_>>());
/// assert_eq!(repository.sequence("orders"), 30);
/// # });
/// ```
pub struct SegmentAllocator<R, S = CompareAndSwapRefill> {
    tag: Arc<str>,
    loader: Arc<SegmentLoader<R, S>>,
    config: AllocatorConfig,
    pool: Option<RefillPool>,
    shutdown_token: CancellationToken,
    state: Mutex<State>,
}

impl<R> SegmentAllocator<R, CompareAndSwapRefill>
where
    R: SequenceRepository,
{
    /// Creates an allocator that refills inline, using
    /// [`CompareAndSwapRefill`].
    ///
    /// # Errors
    ///
    /// Fails if `config` is invalid or the initial segment cannot be loaded.
    pub async fn new(tag: impl Into<Arc<str>>, repository: Arc<R>, config: AllocatorConfig) -> Result<Self> {
        Self::from_components(tag, repository, CompareAndSwapRefill, config, None).await
    }

    /// Creates an allocator that refills on `pool`, using
    /// [`CompareAndSwapRefill`].
    ///
    /// # Errors
    ///
    /// Fails if `config` is invalid or the initial segment cannot be loaded.
    pub async fn with_pool(
        tag: impl Into<Arc<str>>,
        repository: Arc<R>,
        config: AllocatorConfig,
        pool: RefillPool,
    ) -> Result<Self> {
        Self::from_components(tag, repository, CompareAndSwapRefill, config, Some(pool)).await
    }
}

impl<R, S> SegmentAllocator<R, S>
where
    R: SequenceRepository,
    S: RefillStrategy,
{
    /// Creates an allocator from explicit parts.
    ///
    /// The initial segment is loaded before this returns, so the first
    /// [`Self::next_id`] never touches the repository. Passing a `pool`
    /// selects background refills.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidConfig`] if `config` does not validate.
    /// - Any error from loading the initial segment, typically
    ///   [`Error::RefillLoad`].
    pub async fn from_components(
        tag: impl Into<Arc<str>>,
        repository: Arc<R>,
        strategy: S,
        config: AllocatorConfig,
        pool: Option<RefillPool>,
    ) -> Result<Self> {
        let shutdown_token = pool
            .as_ref()
            .map_or_else(CancellationToken::new, RefillPool::child_token);
        Self::with_shutdown_token(tag, repository, strategy, config, pool, shutdown_token).await
    }

    /// Like [`Self::from_components`], but cancelled through `shutdown_token`
    /// instead of a token of its own.
    pub(crate) async fn with_shutdown_token(
        tag: impl Into<Arc<str>>,
        repository: Arc<R>,
        strategy: S,
        config: AllocatorConfig,
        pool: Option<RefillPool>,
        shutdown_token: CancellationToken,
    ) -> Result<Self> {
        config.validate()?;
        let tag = tag.into();
        let loader = Arc::new(SegmentLoader::new(
            repository,
            strategy,
            config.batch_size,
            config.load_retry,
        ));

        let initial = loader.load(&tag, &shutdown_token).await?;

        #[cfg(feature = "tracing")]
        tracing::info!(
            %tag,
            segment = %initial,
            background = pool.is_some(),
            "allocator initialized"
        );

        Ok(Self {
            tag,
            loader,
            config,
            pool,
            shutdown_token,
            state: Mutex::new(State {
                buffer: SegmentBuffer::new(initial),
                cursor: initial.min_id(),
                pending: None,
                swaps: 0,
            }),
        })
    }

    /// The tag this allocator serves.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Ids reserved per segment.
    pub const fn batch_size(&self) -> u64 {
        self.config.batch_size
    }

    pub const fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    /// Returns `true` if refills run on a [`RefillPool`].
    pub const fn is_background(&self) -> bool {
        self.pool.is_some()
    }

    /// Returns the next id for this tag.
    ///
    /// # Errors
    ///
    /// - [`Error::RefillLoad`] (inline mode) when the standby refill ran out
    ///   of repository attempts.
    /// - [`Error::RefillExhausted`] when a swap was due and the fallback loop
    ///   could not fill the standby segment.
    /// - [`Error::Cancelled`] after [`Self::close`] or a pool shutdown.
    /// - Any fatal repository error.
    ///
    /// An error leaves the cursor untouched; the allocator should be treated
    /// as unable to serve this tag.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "trace", skip(self), fields(tag = %self.tag))
    )]
    pub async fn next_id(&self) -> Result<u64> {
        if self.shutdown_token.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let mut state = self.state.lock().await;
        self.advance(&mut state).await
    }

    /// Returns `count` consecutive ids for this tag.
    ///
    /// The whole batch is taken under one hold of the allocator lock, so no
    /// concurrent caller can interleave with it. Refills and swaps happen
    /// along the way exactly as for [`Self::next_id`].
    ///
    /// # Errors
    ///
    /// As for [`Self::next_id`]. Ids taken before the failing step are
    /// consumed and not returned.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "trace", skip(self), fields(tag = %self.tag))
    )]
    pub async fn next_ids(&self, count: usize) -> Result<Vec<u64>> {
        if self.shutdown_token.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let mut state = self.state.lock().await;
        let mut ids = Vec::with_capacity(count);
        for _ in 0..count {
            ids.push(self.advance(&mut state).await?);
        }
        Ok(ids)
    }

    /// Captures the current cursor, segments and refill state.
    pub async fn status(&self) -> AllocatorStatus {
        let state = self.state.lock().await;
        AllocatorStatus {
            cursor: state.cursor,
            active: state.buffer.active(),
            standby: state.buffer.standby(),
            refill_in_flight: state.pending.is_some(),
            swaps: state.swaps,
        }
    }

    /// Stops this allocator. Pending retry loops bail out and every later
    /// [`Self::next_id`] fails with [`Error::Cancelled`].
    pub fn close(&self) {
        self.shutdown_token.cancel();
    }

    async fn advance(&self, state: &mut State) -> Result<u64> {
        if state.buffer.needs_refill(state.cursor) {
            self.refill(state).await?;
        }
        if state.buffer.needs_swap(state.cursor) {
            self.swap(state).await?;
        }

        state.cursor += 1;
        Ok(state.cursor)
    }

    async fn refill(&self, state: &mut State) -> Result<()> {
        let Some(pool) = &self.pool else {
            let ticket = state.buffer.reserve();
            let segment = self.loader.load(&self.tag, &self.shutdown_token).await?;
            self.install(state, ticket, segment);
            return Ok(());
        };

        if state.pending.is_none() {
            let ticket = state.buffer.reserve();

            #[cfg(feature = "tracing")]
            tracing::debug!(tag = %self.tag, cursor = state.cursor, "dispatching background refill");

            state.pending = Some(PendingRefill::dispatch(
                pool,
                &self.loader,
                &self.tag,
                ticket,
                &self.shutdown_token,
            ));
        }
        Ok(())
    }

    async fn swap(&self, state: &mut State) -> Result<()> {
        if let Some(pending) = state.pending.take() {
            match pending.wait(self.config.swap_timeout).await {
                Ok((ticket, segment)) => self.install(state, ticket, segment),
                Err(_abandoned) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(
                        tag = %self.tag,
                        reason = ?_abandoned,
                        "background refill abandoned, falling back"
                    );
                }
            }
        }

        if state.buffer.standby_is_empty() {
            let executor = self.pool.as_ref().map_or(Executor::Inline, Executor::Pool);
            coordinator::fill_standby(
                &mut state.buffer,
                &self.loader,
                &self.tag,
                self.config.fill_retry,
                executor,
                &self.shutdown_token,
            )
            .await?;
        }

        let next = state.buffer.swap().ok_or_else(|| Error::RefillExhausted {
            tag: Arc::clone(&self.tag),
            attempts: 0,
        })?;
        state.cursor = next.min_id();
        state.swaps += 1;

        #[cfg(feature = "tracing")]
        tracing::debug!(tag = %self.tag, segment = %next, swaps = state.swaps, "swapped to standby segment");

        Ok(())
    }

    fn install(&self, state: &mut State, ticket: RefillTicket, segment: Segment) {
        match state.buffer.install(ticket, segment) {
            Install::Accepted => {
                #[cfg(feature = "tracing")]
                tracing::debug!(tag = %self.tag, %segment, "standby segment installed");
            }
            _rejected => {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    tag = %self.tag,
                    %segment,
                    active = %state.buffer.active(),
                    outcome = ?_rejected,
                    "refilled segment rejected"
                );
            }
        }
    }
}
