//! Bounded in-memory message buffer.
//!
//! [`MessageBuffer`] holds enqueued messages until the output handler
//! drains them into a [`Chunk`].
//!
//! # Overflow policy
//! When the buffer is full:
//! - [`DropPolicy::Oldest`]: evict the oldest message, accept the new one
//! - [`DropPolicy::Newest`]: reject the incoming message

use std::collections::VecDeque;

use logferry_core::message::{Chunk, Message};

use crate::config::DropPolicy;

/// Result of [`MessageBuffer::push`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Push {
    /// Stored without dropping anything
    Accepted,
    /// Stored after evicting the oldest message
    EvictedOldest,
    /// Not stored
    Rejected,
}

impl Push {
    /// True when the pushed message is now buffered.
    pub fn is_stored(self) -> bool {
        !matches!(self, Self::Rejected)
    }
}

/// Bounded FIFO of messages for one output instance.
#[derive(Debug)]
pub struct MessageBuffer {
    buffer: VecDeque<Message>,
    capacity: usize,
    drop_policy: DropPolicy,
    dropped_count: u64,
    total_received: u64,
}

impl MessageBuffer {
    pub fn new(capacity: usize, drop_policy: DropPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: VecDeque::with_capacity(capacity.min(10_000)),
            capacity,
            drop_policy,
            dropped_count: 0,
            total_received: 0,
        }
    }

    /// Appends a message, applying the drop policy when full.
    pub fn push(&mut self, message: Message) -> Push {
        self.total_received += 1;

        if self.buffer.len() >= self.capacity {
            self.dropped_count += 1;
            return match self.drop_policy {
                DropPolicy::Oldest => {
                    self.buffer.pop_front();
                    self.buffer.push_back(message);
                    tracing::warn!(
                        dropped = self.dropped_count,
                        capacity = self.capacity,
                        "buffer full, dropped oldest message"
                    );
                    Push::EvictedOldest
                }
                DropPolicy::Newest => {
                    tracing::warn!(
                        dropped = self.dropped_count,
                        capacity = self.capacity,
                        "buffer full, rejected new message"
                    );
                    Push::Rejected
                }
            };
        }

        self.buffer.push_back(message);
        Push::Accepted
    }

    /// Removes up to `batch_size` messages from the front.
    pub fn drain_batch(&mut self, batch_size: usize) -> Chunk {
        let count = batch_size.min(self.buffer.len());
        self.buffer.drain(..count).collect()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Messages evicted or rejected so far.
    pub fn dropped_count(&self) -> u64 {
        self.dropped_count
    }

    /// Push attempts so far.
    pub fn total_received(&self) -> u64 {
        self.total_received
    }

    /// Fill level in 0.0..=1.0.
    pub fn utilization(&self) -> f64 {
        f64::from(u32::try_from(self.buffer.len()).unwrap_or(u32::MAX))
            / f64::from(u32::try_from(self.capacity).unwrap_or(u32::MAX))
    }

    /// True when at least `batch_size` messages are waiting.
    pub fn should_flush(&self, batch_size: usize) -> bool {
        self.buffer.len() >= batch_size
    }
}
