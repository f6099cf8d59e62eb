// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bounded message queues between tasks.

use std::collections::VecDeque;

use crate::err::QueueError;

/// Names a queue created by [`crate::startup::Kernel::create_queue`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct QueueId(pub usize);

/// Bookkeeping bytes charged to the heap for every queue, on top of its
/// storage.
pub const QUEUE_OVERHEAD: usize = 80;

/// A fixed-capacity FIFO of `u32` items.
#[derive(Debug)]
pub struct Queue {
    items: VecDeque<u32>,
    capacity: usize,
}

impl Queue {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Bytes of heap this queue occupies.
    pub fn footprint(capacity: usize) -> usize {
        QUEUE_OVERHEAD + capacity * core::mem::size_of::<u32>()
    }

    pub fn push(&mut self, item: u32) -> Result<(), QueueError> {
        if self.items.len() >= self.capacity {
            return Err(QueueError::Full);
        }
        self.items.push_back(item);
        Ok(())
    }

    pub fn pop(&mut self) -> Option<u32> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
