use core::fmt;

use crate::error::{Error, Result};

/// A reserved, contiguous id range `(min_id, max_id]` holding exactly `step`
/// ids.
///
/// Segments are values: every refill produces a new one and nothing mutates
/// them afterwards. The derived bounds are computed once at construction.
///
/// # Example
/// ```
/// use segid::Segment;
///
/// let segment = Segment::new(100, 100).unwrap();
/// assert_eq!(segment.min_id(), 0);
/// assert_eq!(segment.middle_id(), 50);
/// assert_eq!(segment.to_string(), "(0,100]");
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Segment {
    max_id: u64,
    step: u64,
    min_id: u64,
    middle_id: u64,
}

impl Segment {
    /// Creates the segment `(max_id - step, max_id]`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSegment`] if `step` is zero or larger than
    /// `max_id` (the range would start below zero).
    pub const fn new(max_id: u64, step: u64) -> Result<Self> {
        if step == 0 || step > max_id {
            return Err(Error::InvalidSegment {
                max_id: Some(max_id),
                step: Some(step),
            });
        }

        Ok(Self {
            max_id,
            step,
            min_id: max_id - step,
            middle_id: max_id - step / 2,
        })
    }

    /// Creates a segment from optional parts, as read from a loosely typed
    /// backing store.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSegment`] if either part is missing or the
    /// pair is rejected by [`Self::new`].
    pub const fn from_parts(max_id: Option<u64>, step: Option<u64>) -> Result<Self> {
        match (max_id, step) {
            (Some(max_id), Some(step)) => Self::new(max_id, step),
            _ => Err(Error::InvalidSegment { max_id, step }),
        }
    }

    /// The last id of the range (inclusive).
    pub const fn max_id(&self) -> u64 {
        self.max_id
    }

    /// The number of ids in the range.
    pub const fn step(&self) -> u64 {
        self.step
    }

    /// The exclusive lower bound. The first id served is `min_id + 1`.
    pub const fn min_id(&self) -> u64 {
        self.min_id
    }

    /// The cursor position at which the standby segment should be refilled.
    pub const fn middle_id(&self) -> u64 {
        self.middle_id
    }

    /// Returns `true` if `id` falls inside `(min_id, max_id]`.
    pub const fn contains(&self, id: u64) -> bool {
        id > self.min_id && id <= self.max_id
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{}]", self.min_id, self.max_id)
    }
}

impl fmt::Debug for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Segment")
            .field("range", &format_args!("{self}"))
            .field("step", &self.step)
            .field("middle_id", &self.middle_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_min_and_middle() {
        let segment = Segment::new(100, 100).unwrap();
        assert_eq!(segment.min_id(), 0);
        assert_eq!(segment.middle_id(), 50);
        assert_eq!(segment.max_id(), 100);
        assert_eq!(segment.step(), 100);

        let segment = Segment::new(5020, 20).unwrap();
        assert_eq!(segment.min_id(), 5000);
        assert_eq!(segment.middle_id(), 5010);
    }

    #[test]
    fn odd_step_truncates_half() {
        let segment = Segment::new(15, 5).unwrap();
        assert_eq!(segment.min_id(), 10);
        assert_eq!(segment.middle_id(), 13);

        let single = Segment::new(7, 1).unwrap();
        assert_eq!(single.min_id(), 6);
        assert_eq!(single.middle_id(), 7);
    }

    #[test]
    fn rejects_empty_and_underflowing_ranges() {
        assert!(matches!(
            Segment::new(10, 0),
            Err(Error::InvalidSegment {
                max_id: Some(10),
                step: Some(0)
            })
        ));
        assert!(matches!(
            Segment::new(0, 20),
            Err(Error::InvalidSegment { .. })
        ));
        assert!(Segment::new(20, 20).is_ok());
    }

    #[test]
    fn missing_parts_are_invalid() {
        assert!(matches!(
            Segment::from_parts(None, Some(10)),
            Err(Error::InvalidSegment {
                max_id: None,
                step: Some(10)
            })
        ));
        assert!(matches!(
            Segment::from_parts(Some(10), None),
            Err(Error::InvalidSegment { .. })
        ));
        assert_eq!(
            Segment::from_parts(Some(40), Some(20)).unwrap(),
            Segment::new(40, 20).unwrap()
        );
    }

    #[test]
    fn contains_is_open_below_closed_above() {
        let segment = Segment::new(40, 20).unwrap();
        assert!(!segment.contains(20));
        assert!(segment.contains(21));
        assert!(segment.contains(40));
        assert!(!segment.contains(41));
    }

    #[test]
    fn displays_as_half_open_range() {
        let segment = Segment::new(60, 20).unwrap();
        assert_eq!(segment.to_string(), "(40,60]");
    }
}
