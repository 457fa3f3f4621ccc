//! Playback History
//!
//! Fixed-capacity ring of recent lifecycle events, for diagnostics only.

use serde::{Deserialize, Serialize};

use crate::instance::EmitterId;
use crate::instance_pool::Handle;

/// What happened to an instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HistoryKind {
    Started,
    Finished,
    /// Force-stopped to free a channel
    Stolen,
    /// Play request declined
    Failed(String),
}

/// One history record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Engine time (seconds)
    pub time: f64,
    pub name: String,
    pub emitter: EmitterId,
    pub handle: Handle,
    pub kind: HistoryKind,
}

/// Circular buffer that overwrites its oldest entry when full
#[derive(Debug, Clone)]
pub struct HistoryRing<T> {
    buffer: Vec<Option<T>>,
    /// Next slot to write
    cursor: usize,
    len: usize,
}

impl<T: Clone> HistoryRing<T> {
    /// Ring holding at most `capacity` entries (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: (0..capacity).map(|_| None).collect(),
            cursor: 0,
            len: 0,
        }
    }

    pub fn push(&mut self, entry: T) {
        let capacity = self.buffer.len();
        self.buffer[self.cursor] = Some(entry);
        self.cursor = (self.cursor + 1) % capacity;
        self.len = (self.len + 1).min(capacity);
    }

    /// Entries from oldest to newest
    pub fn snapshot(&self) -> Vec<T> {
        let capacity = self.buffer.len();
        let start = (self.cursor + capacity - self.len) % capacity;
        (0..self.len)
            .filter_map(|i| self.buffer[(start + i) % capacity].clone())
            .collect()
    }

    /// Most recent entry
    pub fn latest(&self) -> Option<&T> {
        if self.len == 0 {
            return None;
        }
        let capacity = self.buffer.len();
        self.buffer[(self.cursor + capacity - 1) % capacity].as_ref()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    pub fn clear(&mut self) {
        self.buffer.iter_mut().for_each(|slot| *slot = None);
        self.cursor = 0;
        self.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_fill_order() {
        let mut ring = HistoryRing::new(4);
        ring.push(1);
        ring.push(2);
        assert_eq!(ring.snapshot(), vec![1, 2]);
        assert_eq!(ring.latest(), Some(&2));
    }

    #[test]
    fn test_overwrite_keeps_most_recent() {
        let mut ring = HistoryRing::new(300);
        for i in 0..1000 {
            ring.push(i);
        }
        let snapshot = ring.snapshot();
        assert_eq!(snapshot.len(), 300);
        assert_eq!(snapshot.first(), Some(&700));
        assert_eq!(snapshot.last(), Some(&999));
        assert!(snapshot.windows(2).all(|w| w[0] + 1 == w[1]));
    }

    #[test]
    fn test_exact_capacity_and_clear() {
        let mut ring = HistoryRing::new(3);
        for i in 0..3 {
            ring.push(i);
        }
        assert_eq!(ring.snapshot(), vec![0, 1, 2]);
        ring.push(3);
        assert_eq!(ring.snapshot(), vec![1, 2, 3]);

        ring.clear();
        assert!(ring.is_empty());
        assert!(ring.latest().is_none());
        assert_eq!(ring.capacity(), 3);
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let mut ring = HistoryRing::new(0);
        ring.push("a");
        ring.push("b");
        assert_eq!(ring.snapshot(), vec!["b"]);
    }
}
