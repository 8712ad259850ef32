//! Per-child-slot message FIFO (§3, §4.2): an append-mostly queue with O(1)
//! enqueue, head-peek, and dequeue, tracking its own byte size for
//! reactivity (`gorged`, §4.1).

use std::collections::VecDeque;

use crate::{message::Message, size::Size};

#[derive(Debug, Default)]
pub struct MessageBuffer {
    messages: VecDeque<Message>,
    bytes: usize,
}

impl MessageBuffer {
    pub fn new() -> Self {
        MessageBuffer {
            messages: VecDeque::new(),
            bytes: 0,
        }
    }

    pub fn enqueue(&mut self, msg: Message) {
        self.bytes += msg.size();
        self.messages.push_back(msg);
    }

    pub fn peek(&self) -> Option<&Message> {
        self.messages.front()
    }

    pub fn dequeue(&mut self) -> Option<Message> {
        let msg = self.messages.pop_front();
        if let Some(msg) = &msg {
            self.bytes = self.bytes.saturating_sub(msg.size());
        }
        msg
    }

    /// Remove and return every buffered message in FIFO order, emptying the
    /// buffer (§4.5 step 3: "flush removes *all* messages ... in one call").
    pub fn drain_all(&mut self) -> Vec<Message> {
        self.bytes = 0;
        self.messages.drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }
}
