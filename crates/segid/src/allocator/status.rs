use crate::segment::Segment;

/// A point-in-time view of an allocator, taken under its lock.
///
/// # Example
/// ```
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// use std::sync::Arc;
/// use segid::{AllocatorConfig, InMemorySequenceRepository, SegmentAllocator};
///
/// let repository = Arc::new(InMemorySequenceRepository::new());
/// let config = AllocatorConfig::default().with_batch_size(10);
/// let allocator = SegmentAllocator::new("orders", repository, config).await.unwrap();
///
/// allocator.next_id().await.unwrap();
/// let status = allocator.status().await;
/// assert_eq!(status.cursor, 1);
/// assert_eq!(status.active.to_string(), "(0,10]");
/// assert_eq!(status.standby, None);
/// # });
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct AllocatorStatus {
    /// The last id handed out (or the active `min_id` before the first one).
    pub cursor: u64,
    /// The segment serving ids.
    pub active: Segment,
    /// The prepared next segment, if any.
    pub standby: Option<Segment>,
    /// Whether a background refill is currently in flight.
    pub refill_in_flight: bool,
    /// How many times the allocator switched segments.
    pub swaps: u64,
}
