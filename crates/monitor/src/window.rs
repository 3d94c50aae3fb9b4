//! Bounded buffer of the most recent log lines.

use std::collections::VecDeque;

/// Ring of recent lines. Oldest lines are dropped first once `capacity` is hit.
#[derive(Debug, Clone)]
pub struct LineWindow {
    lines: VecDeque<String>,
    capacity: usize,
    /// Lines evicted since the window was created or cleared.
    dropped: u64,
}

impl LineWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            dropped: 0,
        }
    }

    pub fn extend<I>(&mut self, lines: I)
    where
        I: IntoIterator<Item = String>,
    {
        for line in lines {
            if self.capacity == 0 {
                self.dropped += 1;
                continue;
            }
            if self.lines.len() == self.capacity {
                self.lines.pop_front();
                self.dropped += 1;
            }
            self.lines.push_back(line);
        }
    }

    pub fn clear(&mut self) {
        self.lines.clear();
        self.dropped = 0;
    }

    /// Copy of the current contents, oldest first.
    pub fn to_vec(&self) -> Vec<String> {
        self.lines.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
