use std::collections::VecDeque;

use super::scheduler::Origin;

/// FIFO ring with a hard capacity. A full queue hands new items back
/// instead of overwriting old ones.
#[derive(Debug)]
pub struct BoundedQueue<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, item: T) -> Result<(), T> {
        if self.is_full() {
            return Err(item);
        }
        self.items.push_back(item);
        Ok(())
    }

    pub fn pop(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Command waiting for the bus to become free, checksum not yet appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCommand {
    pub bytes: Vec<u8>,
    pub origin: Origin,
}

pub type CommandQueue = BoundedQueue<PendingCommand>;
