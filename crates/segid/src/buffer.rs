use crate::segment::Segment;

/// Proof that a refill of the standby slot was requested.
///
/// A ticket is only honoured by [`SegmentBuffer::install`] while it is the
/// most recent one handed out. Reserving again (for example when the fallback
/// loop takes over from an abandoned background refill) invalidates every
/// older ticket, so a late result can never overwrite a newer one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefillTicket {
    slot: usize,
    generation: u64,
}

impl RefillTicket {
    /// The slot this ticket targets (0 or 1).
    pub const fn slot(&self) -> usize {
        self.slot
    }

    /// The generation of the slot at reservation time.
    pub const fn generation(&self) -> u64 {
        self.generation
    }
}

/// Outcome of [`SegmentBuffer::install`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Install {
    /// The segment now occupies the standby slot.
    Accepted,
    /// The ticket was superseded or the slots swapped since it was reserved.
    Stale,
    /// The segment does not lie strictly above the active segment.
    Overlapping,
}

#[derive(Debug, Clone, Copy, Default)]
struct Slot {
    segment: Option<Segment>,
    generation: u64,
}

/// Two segment slots plus the index of the one currently serving ids.
///
/// The buffer is plain state: the owning allocator mutates it only while
/// holding its own lock.
#[derive(Debug, Clone)]
pub struct SegmentBuffer {
    slots: [Slot; 2],
    active: usize,
}

impl SegmentBuffer {
    /// Creates a buffer serving from `initial` with an empty standby slot.
    pub fn new(initial: Segment) -> Self {
        let mut slots = [Slot::default(); 2];
        slots[0].segment = Some(initial);
        Self { slots, active: 0 }
    }

    /// Index of the active slot.
    pub const fn active_index(&self) -> usize {
        self.active
    }

    const fn standby_index(&self) -> usize {
        self.active ^ 1
    }

    /// The segment currently serving ids.
    pub fn active(&self) -> Segment {
        match self.slots[self.active].segment {
            Some(segment) => segment,
            None => unreachable!("the active slot is populated at construction and by every swap"),
        }
    }

    /// The standby segment, if it holds one prepared for the next swap.
    pub fn standby(&self) -> Option<Segment> {
        if self.standby_is_empty() {
            None
        } else {
            self.slots[self.standby_index()].segment
        }
    }

    /// Returns `true` if the standby slot is unset or still holds the segment
    /// retired by the previous swap.
    pub fn standby_is_empty(&self) -> bool {
        match self.slots[self.standby_index()].segment {
            None => true,
            Some(standby) => standby.min_id() < self.active().min_id(),
        }
    }

    /// Returns `true` once `cursor` reached the active middle and the standby
    /// slot has nothing usable in it.
    pub fn needs_refill(&self, cursor: u64) -> bool {
        cursor >= self.active().middle_id() && self.standby_is_empty()
    }

    /// Returns `true` once the active segment is exhausted.
    pub fn needs_swap(&self, cursor: u64) -> bool {
        cursor >= self.active().max_id()
    }

    /// Reserves the standby slot for a new refill, superseding any ticket
    /// issued before.
    pub fn reserve(&mut self) -> RefillTicket {
        let slot = self.standby_index();
        self.slots[slot].generation += 1;
        RefillTicket {
            slot,
            generation: self.slots[slot].generation,
        }
    }

    /// Places `segment` in the standby slot if `ticket` is still current and
    /// the segment starts at or above the end of the active one.
    pub fn install(&mut self, ticket: RefillTicket, segment: Segment) -> Install {
        let slot = &self.slots[ticket.slot];
        if ticket.slot != self.standby_index() || ticket.generation != slot.generation {
            return Install::Stale;
        }
        if segment.min_id() < self.active().max_id() {
            return Install::Overlapping;
        }
        self.slots[ticket.slot].segment = Some(segment);
        Install::Accepted
    }

    /// Makes the standby segment active and returns it.
    ///
    /// Returns `None`, leaving the buffer untouched, if the standby slot is
    /// empty.
    pub fn swap(&mut self) -> Option<Segment> {
        let next = self.standby()?;
        self.active = self.standby_index();
        Some(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(max_id: u64, step: u64) -> Segment {
        Segment::new(max_id, step).unwrap()
    }

    #[test]
    fn thresholds_follow_middle_and_max() {
        let buffer = SegmentBuffer::new(segment(100, 100));

        assert!(!buffer.needs_refill(0));
        assert!(!buffer.needs_refill(49));
        assert!(buffer.needs_refill(50));
        assert!(buffer.needs_refill(99));

        assert!(!buffer.needs_swap(99));
        assert!(buffer.needs_swap(100));
    }

    #[test]
    fn installed_standby_suppresses_refill() {
        let mut buffer = SegmentBuffer::new(segment(100, 100));
        let ticket = buffer.reserve();
        assert_eq!(ticket.slot(), 1);
        assert_eq!(buffer.install(ticket, segment(200, 100)), Install::Accepted);

        assert!(!buffer.standby_is_empty());
        assert!(!buffer.needs_refill(75));
        assert_eq!(buffer.standby(), Some(segment(200, 100)));
    }

    #[test]
    fn swap_requires_a_standby_segment() {
        let mut buffer = SegmentBuffer::new(segment(10, 10));
        assert_eq!(buffer.swap(), None);
        assert_eq!(buffer.active_index(), 0);

        let ticket = buffer.reserve();
        buffer.install(ticket, segment(20, 10));
        assert_eq!(buffer.swap(), Some(segment(20, 10)));
        assert_eq!(buffer.active_index(), 1);
        assert_eq!(buffer.active(), segment(20, 10));
    }

    #[test]
    fn retired_segment_counts_as_empty() {
        let mut buffer = SegmentBuffer::new(segment(10, 10));
        let ticket = buffer.reserve();
        buffer.install(ticket, segment(20, 10));
        buffer.swap();

        // Slot 0 still holds (0,10], which is below the active (10,20].
        assert!(buffer.standby_is_empty());
        assert_eq!(buffer.standby(), None);
        assert!(buffer.needs_refill(15));
        assert!(!buffer.needs_refill(14));
    }

    #[test]
    fn superseded_ticket_is_rejected() {
        let mut buffer = SegmentBuffer::new(segment(10, 10));
        let abandoned = buffer.reserve();
        let fallback = buffer.reserve();
        assert_ne!(abandoned.generation(), fallback.generation());

        assert_eq!(buffer.install(fallback, segment(30, 10)), Install::Accepted);
        assert_eq!(buffer.install(abandoned, segment(20, 10)), Install::Stale);
        assert_eq!(buffer.standby(), Some(segment(30, 10)));
    }

    #[test]
    fn ticket_from_before_a_swap_is_rejected() {
        let mut buffer = SegmentBuffer::new(segment(10, 10));
        let first = buffer.reserve();
        buffer.install(first, segment(20, 10));
        buffer.swap();

        // The ticket targets slot 1, which is now active.
        assert_eq!(buffer.install(first, segment(30, 10)), Install::Stale);
        assert_eq!(buffer.active(), segment(20, 10));
    }

    #[test]
    fn overlapping_segment_is_rejected() {
        let mut buffer = SegmentBuffer::new(segment(20, 10));
        let ticket = buffer.reserve();
        assert_eq!(buffer.install(ticket, segment(25, 10)), Install::Overlapping);
        assert!(buffer.standby_is_empty());

        // Starting exactly at the active max is fine.
        assert_eq!(buffer.install(ticket, segment(30, 10)), Install::Accepted);
    }
}
