use std::collections::BTreeSet;

/// Per-partition bookkeeping of emitted-but-not-finalized offsets.
///
/// Maintains the set of in-flight offsets and the most recently finalized (committed) offset.
/// After every `finish` call the finalized offset advances to the largest contiguous value
/// reachable from the previous finalized offset; this is the externally observed commit point.
#[derive(Debug)]
pub struct PartitionOffsetTracker {
    in_flight: BTreeSet<i64>,
    finalized: i64,
    max_started: i64,
}

impl PartitionOffsetTracker {
    /// Creates a tracker whose commit point starts one below `starting_offset`, so that
    /// `starting_offset` itself is the first offset eligible to be finalized.
    pub fn new(starting_offset: i64) -> PartitionOffsetTracker {
        PartitionOffsetTracker {
            in_flight: BTreeSet::new(),
            finalized: starting_offset - 1,
            max_started: starting_offset - 1,
        }
    }

    /// Registers a newly emitted offset as in-flight.
    ///
    /// Must be strictly greater than any offset previously started for this partition; callers
    /// (the `VirtualConsumer`) are expected to poll offsets in increasing order.
    pub fn start_tracking(&mut self, offset: i64) {
        self.in_flight.insert(offset);
        if offset > self.max_started {
            self.max_started = offset;
        }
    }

    /// Marks an in-flight offset as finalized (acked or abandoned) and advances the commit
    /// point to the largest contiguous value. Finishing an offset that is not in flight, or
    /// twice, is a no-op.
    pub fn finish(&mut self, offset: i64) {
        if !self.in_flight.remove(&offset) {
            return;
        }
        while self.finalized < self.max_started && !self.in_flight.contains(&(self.finalized + 1)) {
            self.finalized += 1;
        }
    }

    /// The largest offset `O` such that every offset in the tracked range up to `O` has been
    /// finalized.
    pub fn commit_point(&self) -> i64 {
        self.finalized
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }
}

#[cfg(test)]
mod tests {
    use super::PartitionOffsetTracker;

    #[test]
    fn advances_on_contiguous_finish() {
        let mut tracker = PartitionOffsetTracker::new(100);
        tracker.start_tracking(100);
        tracker.start_tracking(101);
        tracker.start_tracking(102);
        tracker.finish(100);
        assert_eq!(tracker.commit_point(), 100);
        tracker.finish(101);
        assert_eq!(tracker.commit_point(), 101);
        tracker.finish(102);
        assert_eq!(tracker.commit_point(), 102);
    }

    #[test]
    fn out_of_order_finish_holds_back_commit_point() {
        let mut tracker = PartitionOffsetTracker::new(100);
        tracker.start_tracking(100);
        tracker.start_tracking(101);
        tracker.start_tracking(102);
        tracker.finish(102);
        assert_eq!(tracker.commit_point(), 99);
        tracker.finish(101);
        assert_eq!(tracker.commit_point(), 99);
        tracker.finish(100);
        assert_eq!(tracker.commit_point(), 102);
    }

    #[test]
    fn finishing_twice_is_a_no_op() {
        let mut tracker = PartitionOffsetTracker::new(1);
        tracker.start_tracking(1);
        tracker.finish(1);
        tracker.finish(1);
        assert_eq!(tracker.commit_point(), 1);
    }
}
