//! Decoder slot queues
//!
//! Free input slots and filled output slots leased from a decoder, kept in
//! the order the decoder handed them out. A slot index goes back to the
//! decoder only when the pipeline explicitly submits or releases it.

use std::collections::VecDeque;

use crate::media::BufferInfo;

/// Free decoder input slots
#[derive(Debug, Default)]
pub struct InputSlotQueue {
    slots: VecDeque<usize>,
}

impl InputSlotQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, index: usize) {
        self.slots.push_back(index);
    }

    /// Oldest free slot, still leased
    pub fn peek(&self) -> Option<usize> {
        self.slots.front().copied()
    }

    /// Remove the oldest slot once it has been submitted
    pub fn pop(&mut self) -> Option<usize> {
        self.slots.pop_front()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }
}

/// Decoded output slots waiting to be consumed
#[derive(Debug, Default)]
pub struct OutputSlotQueue {
    slots: VecDeque<(usize, BufferInfo)>,
}

impl OutputSlotQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, index: usize, info: BufferInfo) {
        self.slots.push_back((index, info));
    }

    /// Oldest decoded buffer, still leased
    pub fn front(&self) -> Option<(usize, BufferInfo)> {
        self.slots.front().copied()
    }

    pub fn pop(&mut self) -> Option<(usize, BufferInfo)> {
        self.slots.pop_front()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::BufferFlags;

    #[test]
    fn test_input_slots_fifo() {
        let mut queue = InputSlotQueue::new();
        queue.push(3);
        queue.push(1);
        assert_eq!(queue.peek(), Some(3));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop(), Some(3));
        assert_eq!(queue.pop(), Some(1));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_output_front_is_not_consumed() {
        let mut queue = OutputSlotQueue::new();
        let info = BufferInfo {
            size: 10,
            presentation_time_us: 40_000,
            flags: BufferFlags::NONE,
        };
        queue.push(2, info);
        assert_eq!(queue.front(), Some((2, info)));
        assert_eq!(queue.front(), Some((2, info)));
        assert_eq!(queue.len(), 1);

        queue.clear();
        assert!(queue.is_empty());
        assert_eq!(queue.front(), None);
    }
}
