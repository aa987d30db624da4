//! Ordered checkpoint queue for one direction
//!
//! Watchers report a cursor together with the nonces they registered up to
//! that point. A cursor becomes persistable only once every nonce attached to
//! it, and to every earlier cursor, has reached a terminal status.
//!
//! Nonces that stopped without a terminal status are stalled: they stay
//! outstanding, including for checkpoints pushed later, until they resolve.

use std::collections::{HashSet, VecDeque};

use crate::types::Cursor;

#[derive(Debug)]
struct Checkpoint {
    cursor: Cursor,
    outstanding: HashSet<u64>,
}

#[derive(Debug, Default)]
pub struct CursorTracker {
    queue: VecDeque<Checkpoint>,
    stalled: HashSet<u64>,
    /// Newest cursor handed out by `take_ready`
    last_taken: Option<Cursor>,
}

impl CursorTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a checkpoint; `outstanding` are the nonces still in flight
    pub fn push(&mut self, cursor: Cursor, mut outstanding: HashSet<u64>) {
        outstanding.extend(self.stalled.iter().copied());
        self.queue.push_back(Checkpoint {
            cursor,
            outstanding,
        });
    }

    /// Mark a nonce terminal
    pub fn resolve(&mut self, nonce: u64) {
        self.stalled.remove(&nonce);
        for checkpoint in self.queue.iter_mut() {
            checkpoint.outstanding.remove(&nonce);
        }
    }

    /// Keep a nonce outstanding until it is resolved
    pub fn stall(&mut self, nonce: u64) {
        self.stalled.insert(nonce);
    }

    /// Pop every leading checkpoint with nothing outstanding and return the
    /// newest of them. A block cursor at or below one already taken is
    /// dropped.
    pub fn take_ready(&mut self) -> Option<Cursor> {
        let mut ready = None;
        while self
            .queue
            .front()
            .is_some_and(|checkpoint| checkpoint.outstanding.is_empty())
        {
            ready = self.queue.pop_front().map(|checkpoint| checkpoint.cursor);
        }

        if let (Some(Cursor::Block(next)), Some(Cursor::Block(last))) =
            (&ready, &self.last_taken)
        {
            if next <= last {
                return None;
            }
        }
        if ready.is_some() {
            self.last_taken = ready.clone();
        }
        ready
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nonces(values: &[u64]) -> HashSet<u64> {
        values.iter().copied().collect()
    }

    #[test]
    fn test_empty_checkpoint_is_ready_immediately() {
        let mut tracker = CursorTracker::new();
        tracker.push(Cursor::Block(10), HashSet::new());
        assert_eq!(tracker.take_ready(), Some(Cursor::Block(10)));
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_cursor_waits_for_all_nonces() {
        let mut tracker = CursorTracker::new();
        tracker.push(Cursor::Block(10), nonces(&[1, 2]));
        assert_eq!(tracker.take_ready(), None);

        tracker.resolve(1);
        assert_eq!(tracker.take_ready(), None);

        tracker.resolve(2);
        assert_eq!(tracker.take_ready(), Some(Cursor::Block(10)));
    }

    #[test]
    fn test_later_cursor_never_overtakes_earlier_one() {
        let mut tracker = CursorTracker::new();
        tracker.push(Cursor::Block(10), nonces(&[3]));
        tracker.push(Cursor::Block(11), nonces(&[1]));
        tracker.push(Cursor::Block(12), HashSet::new());

        // Later work finishing first does not move the cursor
        tracker.resolve(1);
        assert_eq!(tracker.take_ready(), None);
        assert_eq!(tracker.len(), 3);

        // Once the oldest resolves, everything behind it drains at once
        tracker.resolve(3);
        assert_eq!(tracker.take_ready(), Some(Cursor::Block(12)));
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_nonce_shared_across_checkpoints() {
        let mut tracker = CursorTracker::new();
        tracker.push(Cursor::Digest("A".into()), nonces(&[5]));
        tracker.push(Cursor::Digest("B".into()), nonces(&[5]));

        tracker.resolve(5);
        assert_eq!(tracker.take_ready(), Some(Cursor::Digest("B".into())));
    }

    #[test]
    fn test_stalled_nonce_holds_later_checkpoints() {
        let mut tracker = CursorTracker::new();
        tracker.push(Cursor::Block(10), nonces(&[4]));
        tracker.stall(4);
        tracker.push(Cursor::Block(11), HashSet::new());
        assert_eq!(tracker.take_ready(), None);

        // Checkpoints pushed after the stall still wait on it
        tracker.push(Cursor::Block(12), HashSet::new());
        assert_eq!(tracker.take_ready(), None);
        assert_eq!(tracker.len(), 3);

        tracker.resolve(4);
        assert_eq!(tracker.take_ready(), Some(Cursor::Block(12)));

        tracker.push(Cursor::Block(13), HashSet::new());
        assert_eq!(tracker.take_ready(), Some(Cursor::Block(13)));
    }

    #[test]
    fn test_block_cursor_never_moves_backwards() {
        let mut tracker = CursorTracker::new();
        tracker.push(Cursor::Block(50), HashSet::new());
        assert_eq!(tracker.take_ready(), Some(Cursor::Block(50)));

        // A reconnect backfill reports blocks already covered
        tracker.push(Cursor::Block(40), HashSet::new());
        tracker.push(Cursor::Block(50), HashSet::new());
        assert_eq!(tracker.take_ready(), None);
        assert!(tracker.is_empty());

        tracker.push(Cursor::Block(51), nonces(&[9]));
        tracker.resolve(9);
        assert_eq!(tracker.take_ready(), Some(Cursor::Block(51)));
    }
}
