//! Background refill tracking and the swap-time fallback loop.
//!
//! An allocator in background mode keeps at most one [`PendingRefill`]: the
//! join handle of a refill task plus the ticket reserved when it was
//! dispatched. The task returns its segment instead of writing into the
//! buffer, so only the lock holder ever mutates the slots, and a result that
//! arrives after its ticket was superseded is simply discarded.
//!
//! When a swap is due and the standby slot is still empty, [`fill_standby`]
//! force-fills it with a bounded number of delayed attempts.

use alloc::sync::Arc;
use core::time::Duration;

use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

use super::pool::RefillPool;
use crate::{
    buffer::{Install, RefillTicket, SegmentBuffer},
    config::RetryPolicy,
    error::{Error, Result},
    refill::{RefillStrategy, SegmentLoader},
    repository::SequenceRepository,
    segment::Segment,
};

/// Why waiting on a background refill produced no segment.
#[derive(Debug)]
pub(crate) enum Abandoned {
    TimedOut,
    Cancelled,
    // Only logged.
    #[cfg_attr(not(feature = "tracing"), allow(dead_code))]
    Failed(Error),
}

/// A background refill in flight for one allocator.
pub(crate) struct PendingRefill {
    tag: Arc<str>,
    ticket: RefillTicket,
    handle: JoinHandle<Result<Segment>>,
}

impl PendingRefill {
    /// Spawns a load of the next segment for `tag` on `pool`.
    pub(crate) fn dispatch<R, S>(
        pool: &RefillPool,
        loader: &Arc<SegmentLoader<R, S>>,
        tag: &Arc<str>,
        ticket: RefillTicket,
        shutdown: &CancellationToken,
    ) -> Self
    where
        R: SequenceRepository,
        S: RefillStrategy,
    {
        let task = {
            let loader = Arc::clone(loader);
            let tag = Arc::clone(tag);
            let shutdown = shutdown.clone();
            async move { loader.load(&tag, &shutdown).await }
        };
        Self {
            tag: Arc::clone(tag),
            ticket,
            handle: pool.spawn(task),
        }
    }

    /// Waits up to `timeout` for the refill to finish.
    ///
    /// A refill that does not finish in time is aborted; its ticket stays
    /// reserved only until the caller reserves a new one.
    pub(crate) async fn wait(self, timeout: Duration) -> Result<(RefillTicket, Segment), Abandoned> {
        let Self {
            tag,
            ticket,
            mut handle,
        } = self;
        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(Ok(Ok(segment))) => Ok((ticket, segment)),
            Ok(Ok(Err(Error::Cancelled))) => Err(Abandoned::Cancelled),
            Ok(Ok(Err(err))) => Err(Abandoned::Failed(err)),
            Ok(Err(join_err)) if join_err.is_cancelled() => Err(Abandoned::Cancelled),
            Ok(Err(join_err)) => Err(Abandoned::Failed(task_failure(tag, &join_err))),
            Err(_elapsed) => {
                handle.abort();
                Err(Abandoned::TimedOut)
            }
        }
    }
}

fn task_failure(tag: Arc<str>, err: &JoinError) -> Error {
    Error::RefillTask {
        tag,
        reason: err.to_string(),
    }
}

/// Where fallback attempts run.
#[derive(Clone, Copy)]
pub(crate) enum Executor<'a> {
    /// Awaited on the calling task.
    Inline,
    /// Scheduled on the shared pool and joined.
    Pool(&'a RefillPool),
}

/// Fills the standby slot of `buffer`, making up to `policy.max_attempts`
/// delayed load attempts.
///
/// Each attempt waits `policy.delay`, then runs the loader (which has its own
/// retry budget). A loader that runs out of attempts only costs one fallback
/// attempt; any other error, including cancellation, ends the loop at once.
///
/// # Errors
///
/// - [`Error::RefillExhausted`] when every attempt failed.
/// - [`Error::Cancelled`] if the allocator or pool shut down, or the
///   scheduled attempt was aborted.
/// - Any fatal loader error.
pub(crate) async fn fill_standby<R, S>(
    buffer: &mut SegmentBuffer,
    loader: &Arc<SegmentLoader<R, S>>,
    tag: &Arc<str>,
    policy: RetryPolicy,
    executor: Executor<'_>,
    shutdown: &CancellationToken,
) -> Result<()>
where
    R: SequenceRepository,
    S: RefillStrategy,
{
    let mut attempts = 0;
    while buffer.standby_is_empty() {
        if attempts >= policy.max_attempts {
            #[cfg(feature = "tracing")]
            tracing::error!(%tag, attempts, "standby segment could not be filled");

            return Err(Error::RefillExhausted {
                tag: Arc::clone(tag),
                attempts,
            });
        }
        attempts += 1;

        let ticket = buffer.reserve();
        let outcome = match executor {
            Executor::Inline => {
                delayed_load(
                    Arc::clone(loader),
                    Arc::clone(tag),
                    policy.delay,
                    shutdown.clone(),
                )
                .await
            }
            Executor::Pool(pool) => {
                let task = pool.spawn(delayed_load(
                    Arc::clone(loader),
                    Arc::clone(tag),
                    policy.delay,
                    shutdown.clone(),
                ));
                match task.await {
                    Ok(outcome) => outcome,
                    Err(err) if err.is_cancelled() => Err(Error::Cancelled),
                    Err(err) => Err(task_failure(Arc::clone(tag), &err)),
                }
            }
        };

        match outcome {
            Ok(segment) => match buffer.install(ticket, segment) {
                Install::Accepted => {
                    #[cfg(feature = "tracing")]
                    tracing::info!(%tag, attempt = attempts, %segment, "fallback filled standby segment");
                }
                _rejected => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(%tag, attempt = attempts, %segment, outcome = ?_rejected, "fallback segment rejected");
                }
            },
            Err(Error::RefillLoad { .. }) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(%tag, attempt = attempts, max_attempts = policy.max_attempts, "fallback load failed, retrying");
            }
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

async fn delayed_load<R, S>(
    loader: Arc<SegmentLoader<R, S>>,
    tag: Arc<str>,
    delay: Duration,
    shutdown: CancellationToken,
) -> Result<Segment>
where
    R: SequenceRepository,
    S: RefillStrategy,
{
    tokio::select! {
        () = shutdown.cancelled() => return Err(Error::Cancelled),
        () = tokio::time::sleep(delay) => {}
    }
    loader.load(&tag, &shutdown).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        refill::CompareAndSwapRefill,
        repository::{InMemorySequenceRepository, RepositoryError},
    };

    /// Every read fails with a non-retryable error.
    struct Broken;

    impl SequenceRepository for Broken {
        async fn current_sequence(&self, _: &str) -> Result<u64, RepositoryError> {
            Err(RepositoryError::fatal("table dropped"))
        }
        async fn increase_sequence(&self, _: &str, _: u64, _: u64) -> Result<bool, RepositoryError> {
            Ok(false)
        }
    }

    /// Every read stalls far longer than any swap timeout.
    struct Stalled;

    impl SequenceRepository for Stalled {
        async fn current_sequence(&self, _: &str) -> Result<u64, RepositoryError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(0)
        }
        async fn increase_sequence(&self, _: &str, _: u64, _: u64) -> Result<bool, RepositoryError> {
            Ok(true)
        }
    }

    /// Every read fails with a retryable error.
    struct Unreachable;

    impl SequenceRepository for Unreachable {
        async fn current_sequence(&self, _: &str) -> Result<u64, RepositoryError> {
            Err(RepositoryError::transient("connection reset"))
        }
        async fn increase_sequence(&self, _: &str, _: u64, _: u64) -> Result<bool, RepositoryError> {
            Ok(false)
        }
    }

    fn loader<R: SequenceRepository>(repository: R) -> Arc<SegmentLoader<R, CompareAndSwapRefill>> {
        Arc::new(SegmentLoader::new(
            Arc::new(repository),
            CompareAndSwapRefill,
            10,
            RetryPolicy::new(3, Duration::from_secs(1)),
        ))
    }

    fn ticket() -> RefillTicket {
        SegmentBuffer::new(Segment::new(10, 10).unwrap()).reserve()
    }

    #[tokio::test]
    async fn finished_refill_hands_back_its_ticket() {
        let pool = RefillPool::current(1).unwrap();
        let tag: Arc<str> = Arc::from("orders");
        let ticket = ticket();

        let pending = PendingRefill::dispatch(
            &pool,
            &loader(InMemorySequenceRepository::new()),
            &tag,
            ticket,
            &CancellationToken::new(),
        );
        let (returned, segment) = pending.wait(Duration::from_secs(1)).await.unwrap();

        assert_eq!(returned, ticket);
        assert_eq!(segment, Segment::new(10, 10).unwrap());
    }

    #[tokio::test]
    async fn failed_refill_reports_its_error() {
        let pool = RefillPool::current(1).unwrap();
        let tag: Arc<str> = Arc::from("orders");

        let pending = PendingRefill::dispatch(&pool, &loader(Broken), &tag, ticket(), &CancellationToken::new());

        match pending.wait(Duration::from_secs(1)).await {
            Err(Abandoned::Failed(Error::Repository(RepositoryError::Fatal(_)))) => {}
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_refill_times_out_and_is_aborted() {
        let pool = RefillPool::current(1).unwrap();
        let tag: Arc<str> = Arc::from("orders");

        let pending = PendingRefill::dispatch(&pool, &loader(Stalled), &tag, ticket(), &CancellationToken::new());

        assert!(matches!(
            pending.wait(Duration::from_millis(1500)).await,
            Err(Abandoned::TimedOut)
        ));
        pool.shutdown(Duration::from_secs(1)).await;
        assert_eq!(pool.tasks_in_flight(), 0);
    }

    #[tokio::test]
    async fn cancelled_refill_is_not_a_failure() {
        let pool = RefillPool::current(1).unwrap();
        let tag: Arc<str> = Arc::from("orders");
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        // The pause after the first transient failure observes the token.
        let pending = PendingRefill::dispatch(&pool, &loader(Unreachable), &tag, ticket(), &shutdown);
        assert!(matches!(
            pending.wait(Duration::from_secs(1)).await,
            Err(Abandoned::Cancelled)
        ));
    }
}
