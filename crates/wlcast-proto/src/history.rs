/// Fixed-capacity ring of recently sent frames, used to match acks to send
/// times.
///
/// Inserting into a full ring overwrites the oldest record. An overwritten
/// record that was never acked is simply forgotten; it is not counted as lost.

use std::time::Instant;

/// Number of in-flight frames that can be RTT-tracked at once.
pub const FRAME_HISTORY_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRecord {
    pub frame_id: u32,
    pub sent_at: Instant,
    pub acked: bool,
}

pub struct FrameHistory {
    slots: Box<[Option<FrameRecord>]>,
    /// Next slot to write.
    head: usize,
}

impl FrameHistory {
    pub fn new() -> Self {
        Self::with_capacity(FRAME_HISTORY_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "frame history needs at least one slot");
        FrameHistory {
            slots: vec![None; capacity].into_boxed_slice(),
            head: 0,
        }
    }

    /// Record a sent frame, overwriting the oldest slot. Returns the record
    /// that was evicted, if any.
    pub fn insert(&mut self, frame_id: u32, sent_at: Instant) -> Option<FrameRecord> {
        let evicted = self.slots[self.head].replace(FrameRecord {
            frame_id,
            sent_at,
            acked: false,
        });
        self.head = (self.head + 1) % self.slots.len();
        evicted
    }

    /// Find the unacknowledged record for `frame_id`.
    pub fn find_unacked_mut(&mut self, frame_id: u32) -> Option<&mut FrameRecord> {
        self.slots
            .iter_mut()
            .flatten()
            .find(|r| r.frame_id == frame_id && !r.acked)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut FrameRecord> {
        self.slots.iter_mut().flatten()
    }

    /// Number of occupied slots.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

impl Default for FrameHistory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn insert_overwrites_oldest() {
        let t0 = Instant::now();
        let mut history = FrameHistory::with_capacity(4);
        for id in 1..=4 {
            assert!(history.insert(id, t0).is_none());
        }
        assert_eq!(history.len(), 4);

        let evicted = history.insert(5, t0 + Duration::from_millis(1)).unwrap();
        assert_eq!(evicted.frame_id, 1);
        assert!(history.find_unacked_mut(1).is_none());
        assert!(history.find_unacked_mut(5).is_some());
        assert_eq!(history.len(), 4);
    }

    #[test]
    fn find_skips_acked_records() {
        let mut history = FrameHistory::new();
        history.insert(9, Instant::now());
        history.find_unacked_mut(9).unwrap().acked = true;
        assert!(history.find_unacked_mut(9).is_none());
    }

    #[test]
    fn default_capacity() {
        let history = FrameHistory::default();
        assert_eq!(history.capacity(), FRAME_HISTORY_CAPACITY);
        assert!(history.is_empty());
    }
}
