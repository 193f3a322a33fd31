use std::collections::VecDeque;

/// Fixed-capacity line buffer holding the most recent encoder output.
/// Lines keep the order they were pushed in; the oldest line is evicted first.
#[derive(Debug, Clone)]
pub struct RingBuffer {
    capacity: usize,
    lines: VecDeque<String>,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            lines: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, line: impl Into<String>) {
        self.lines.push_back(line.into());
        self.evict_overflow();
    }

    fn evict_overflow(&mut self) {
        while self.lines.len() > self.capacity {
            self.lines.pop_front();
        }
    }

    // Return a snapshot of the current lines in the buffer
    pub fn snapshot(&self) -> Vec<String> {
        self.lines.iter().cloned().collect()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}
