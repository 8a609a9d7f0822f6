use std::collections::VecDeque;

use parking_lot::Mutex;

/// How many chat lines are kept for newcomers.
pub const HISTORY_CAPACITY: usize = 100;

/// Bounded log of recent chat lines, oldest evicted first.
#[derive(Debug)]
pub struct MessageHistory {
    lines: Mutex<VecDeque<String>>,
    capacity: usize,
}

impl Default for MessageHistory {
    fn default() -> Self {
        Self::new(HISTORY_CAPACITY)
    }
}

impl MessageHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn append(&self, line: impl Into<String>) {
        let mut lines = self.lines.lock();
        lines.push_back(line.into());
        while lines.len() > self.capacity {
            lines.pop_front();
        }
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.lines.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lines.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
