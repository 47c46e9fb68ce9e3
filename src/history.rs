//! Bounded, insertion-ordered buffer of recent raw frames

use std::collections::VecDeque;

use crate::config::DEFAULT_HISTORY_CAPACITY;
use crate::types::RawFrame;

/// Most recent frames in arrival order, oldest evicted first.
///
/// The buffer itself is not synchronized; the dispatcher owns the only
/// writer and hands out point-in-time snapshots.
#[derive(Debug, Clone)]
pub struct HistoryBuffer {
    frames: VecDeque<RawFrame>,
    capacity: usize,
    evicted: u64,
}

impl Default for HistoryBuffer {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_CAPACITY)
    }
}

impl HistoryBuffer {
    /// Create a buffer holding at most `capacity` frames (minimum one).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { frames: VecDeque::with_capacity(capacity), capacity, evicted: 0 }
    }

    /// Append a frame, evicting the oldest when full.
    pub fn record(&mut self, frame: RawFrame) {
        if self.frames.len() == self.capacity {
            self.frames.pop_front();
            self.evicted += 1;
        }
        self.frames.push_back(frame);
    }

    /// Ordered copy of the current contents, oldest first.
    ///
    /// Frame bodies are shared, not copied.
    pub fn snapshot(&self) -> Vec<RawFrame> {
        self.frames.iter().cloned().collect()
    }

    pub fn latest(&self) -> Option<&RawFrame> {
        self.frames.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RawFrame> {
        self.frames.iter()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Frames dropped by eviction since creation.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }
}
