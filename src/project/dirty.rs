use std::fmt;

/// Half-open frame interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRange {
    pub start: usize,
    pub end: usize,
}

impl FrameRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    pub fn union(self, other: FrameRange) -> FrameRange {
        FrameRange {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    /// Grows both sides by `context` frames, clamped to `[0, limit)`.
    pub fn padded(self, context: usize, limit: usize) -> FrameRange {
        FrameRange {
            start: self.start.saturating_sub(context),
            end: (self.end + context).min(limit),
        }
    }

    pub fn clamped(self, limit: usize) -> FrameRange {
        let end = self.end.min(limit);
        FrameRange {
            start: self.start.min(end),
            end,
        }
    }
}

impl fmt::Display for FrameRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Project-wide dirt that is not attached to a note: the free-form F0
/// range plus the edit revision counter that orders every mark.
#[derive(Debug, Clone, Default)]
pub struct DirtyTracker {
    revision: u64,
    f0_range: Option<FrameRange>,
    f0_revision: u64,
}

impl DirtyTracker {
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Advances the revision and returns it; every new mark is stamped with it.
    pub fn bump(&mut self) -> u64 {
        self.revision += 1;
        self.revision
    }

    pub fn f0_range(&self) -> Option<FrameRange> {
        self.f0_range
    }

    /// Widens the stored F0 range to cover `range`.
    pub fn widen_f0(&mut self, range: FrameRange) {
        if range.is_empty() {
            return;
        }
        self.f0_range = Some(match self.f0_range {
            Some(existing) => existing.union(range),
            None => range,
        });
        self.f0_revision = self.bump();
    }

    /// Drops the F0 range unless it was widened after `revision`.
    pub fn clear_f0_through(&mut self, revision: u64) {
        if self.f0_revision <= revision {
            self.f0_range = None;
        }
    }

    pub fn clear_f0(&mut self) {
        self.f0_range = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_helpers() {
        let r = FrameRange::new(100, 110);
        assert_eq!(r.len(), 10);
        assert_eq!(r.padded(10, 1000), FrameRange::new(90, 120));
        assert_eq!(FrameRange::new(3, 8).padded(10, 12), FrameRange::new(0, 12));
        assert_eq!(FrameRange::new(5, 50).clamped(20), FrameRange::new(5, 20));
        assert!(FrameRange::new(30, 50).clamped(20).is_empty());
        assert_eq!(r.union(FrameRange::new(50, 60)), FrameRange::new(50, 110));
    }

    #[test]
    fn test_f0_range_widens() {
        let mut tracker = DirtyTracker::default();
        assert!(tracker.f0_range().is_none());

        tracker.widen_f0(FrameRange::new(150, 160));
        tracker.widen_f0(FrameRange::new(140, 145));
        tracker.widen_f0(FrameRange::new(7, 7));
        assert_eq!(tracker.f0_range(), Some(FrameRange::new(140, 160)));
    }

    #[test]
    fn test_clear_keeps_later_marks() {
        let mut tracker = DirtyTracker::default();
        tracker.widen_f0(FrameRange::new(0, 10));
        let launched = tracker.revision();

        tracker.widen_f0(FrameRange::new(20, 30));
        tracker.clear_f0_through(launched);
        assert_eq!(tracker.f0_range(), Some(FrameRange::new(0, 30)));

        tracker.clear_f0_through(tracker.revision());
        assert!(tracker.f0_range().is_none());
    }
}
