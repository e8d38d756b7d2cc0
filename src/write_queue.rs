//! Coalescing FIFO of pending peripheral writes.
//!
//! A coalescing item replaces, in place, any queued item on the same channel,
//! so high-frequency fields (speed, distance) hold at most one pending value.
//! Non-coalescing items (icons) always append. The in-flight write is not part
//! of the queue; the link reducer owns that slot.

use crate::protocol::{Channel, Payload};
use std::collections::VecDeque;

/// One pending write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueItem {
    pub channel: Channel,
    pub payload: Payload,
    pub coalesce: bool,
}

impl QueueItem {
    pub fn new(channel: Channel, payload: Payload, coalesce: bool) -> Self {
        Self {
            channel,
            payload,
            coalesce,
        }
    }

    /// Content hash when this is an icon write.
    pub fn icon_hash(&self) -> Option<&str> {
        match &self.payload {
            Payload::Icon { hash, .. } => Some(hash),
            Payload::Fields(_) => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct WriteQueue {
    items: VecDeque<QueueItem>,
}

impl WriteQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, item: QueueItem) {
        if item.coalesce {
            if let Some(slot) = self.items.iter_mut().find(|queued| queued.channel == item.channel) {
                log::trace!("coalescing write on {}", item.channel);
                *slot = item;
                return;
            }
        }
        self.items.push_back(item);
    }

    pub fn pop(&mut self) -> Option<QueueItem> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueueItem> {
        self.items.iter()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}
