//! Shared worker pool for background segment refills.
//!
//! A [`RefillPool`] is owned by the caller and shared by every allocator that
//! refills in the background. It runs tasks on an existing tokio runtime,
//! caps how many refills execute at once, and supports a coordinated,
//! cancellable shutdown via a shared [`CancellationToken`].

use alloc::sync::Arc;
use core::{future::Future, time::Duration};

use tokio::{runtime::Handle, sync::Semaphore, task::JoinHandle};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::error::{Error, Result};

/// A bounded pool that executes refill work on a tokio runtime.
///
/// Cloning is cheap; clones share the same limit, tracker and shutdown token.
#[derive(Clone)]
pub struct RefillPool {
    handle: Handle,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    shutdown_token: CancellationToken,
}

impl RefillPool {
    /// Creates a pool running on `handle` with at most `max_concurrent`
    /// refills executing at once.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `max_concurrent` is zero.
    pub fn new(handle: Handle, max_concurrent: usize) -> Result<Self> {
        if max_concurrent == 0 {
            return Err(Error::InvalidConfig {
                reason: "a refill pool needs at least one permit".into(),
            });
        }
        Ok(Self {
            handle,
            permits: Arc::new(Semaphore::new(max_concurrent)),
            tracker: TaskTracker::new(),
            shutdown_token: CancellationToken::new(),
        })
    }

    /// Creates a pool on the runtime of the calling task.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `max_concurrent` is zero.
    ///
    /// # Panics
    ///
    /// Panics outside a tokio runtime.
    pub fn current(max_concurrent: usize) -> Result<Self> {
        Self::new(Handle::current(), max_concurrent)
    }

    /// Returns `true` once [`Self::shutdown`] has started.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    /// Number of tasks spawned on this pool that have not finished yet.
    pub fn tasks_in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// A token cancelled when this pool shuts down.
    pub(crate) fn child_token(&self) -> CancellationToken {
        self.shutdown_token.child_token()
    }

    /// Spawns `task` once a permit is free.
    ///
    /// The task resolves to [`Error::Cancelled`] without running if the pool
    /// shuts down while it waits for a permit.
    pub(crate) fn spawn<F, T>(&self, task: F) -> JoinHandle<Result<T>>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        let shutdown = self.shutdown_token.clone();
        self.tracker.spawn_on(
            async move {
                let _permit = tokio::select! {
                    () = shutdown.cancelled() => return Err(Error::Cancelled),
                    permit = permits.acquire_owned() => permit.map_err(|_| Error::Cancelled)?,
                };
                task.await
            },
            &self.handle,
        )
    }

    /// Stops the pool and waits up to `timeout` for running refills to
    /// finish.
    ///
    /// Cancels the shared token first so retry loops and queued tasks bail
    /// out instead of starting new repository calls.
    pub async fn shutdown(&self, timeout: Duration) {
        #[cfg(feature = "tracing")]
        tracing::info!(in_flight = self.tracker.len(), "Shutting down refill pool");

        self.shutdown_token.cancel();
        self.permits.close();
        self.tracker.close();

        match tokio::time::timeout(timeout, self.tracker.wait()).await {
            Ok(()) => {
                #[cfg(feature = "tracing")]
                tracing::debug!("All refill tasks drained");
            }
            Err(_) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    remaining = self.tracker.len(),
                    "Refill pool drain timed out"
                );
            }
        }
    }
}

impl core::fmt::Debug for RefillPool {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RefillPool")
            .field("available_permits", &self.permits.available_permits())
            .field("tasks_in_flight", &self.tracker.len())
            .field("is_shutdown", &self.is_shutdown())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn runs_tasks_and_returns_their_output() {
        let pool = RefillPool::current(2).unwrap();
        let value = pool.spawn(async { Ok(7_u64) }).await.unwrap().unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn limits_concurrent_tasks() {
        let pool = RefillPool::current(1).unwrap();
        let running = Arc::new(core::sync::atomic::AtomicUsize::new(0));
        let peak = Arc::new(core::sync::atomic::AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                pool.spawn(async move {
                    use core::sync::atomic::Ordering;
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(peak.load(core::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_queued_tasks() {
        let pool = RefillPool::current(1).unwrap();
        let blocker = pool.spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        });
        let queued = pool.spawn(async { Ok(()) });
        tokio::task::yield_now().await;

        pool.shutdown(Duration::from_millis(100)).await;
        assert!(pool.is_shutdown());

        assert!(matches!(queued.await.unwrap(), Err(Error::Cancelled)));
        blocker.abort();
    }

    #[tokio::test]
    async fn zero_permits_are_rejected() {
        let err = RefillPool::current(0).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig { .. }));
    }

    #[tokio::test]
    async fn spawn_after_shutdown_is_cancelled() {
        let pool = RefillPool::current(1).unwrap();
        pool.shutdown(Duration::from_millis(10)).await;

        let result = pool.spawn(async { Ok(()) }).await.unwrap();
        assert!(matches!(result, Err(Error::Cancelled)));
    }
}
