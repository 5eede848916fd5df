//! Frame-slot keyed deferred destruction.
//!
//! GPU objects that may still be referenced by an in-flight command buffer are
//! parked here together with the frame slot that was current when they were
//! retired. They are released only when that same slot comes around again,
//! which means the slot's fence has been waited on since the retirement.
//!
//! Release is strictly FIFO: an entry is handed back only while it sits at the
//! front of the queue, so anything retired earlier is always released no later
//! than anything retired after it.

use std::collections::VecDeque;

/// Items waiting for the frame slot they were retired on to come round again.
#[derive(Debug)]
pub struct DeferredQueue<T> {
    entries: VecDeque<(usize, T)>,
}

impl<T> DeferredQueue<T> {
    pub fn new() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }

    /// Retire `item` while `slot` is the current frame slot.
    pub fn push(&mut self, item: T, slot: usize) {
        self.entries.push_back((slot, item));
    }

    /// Pop every front entry retired at `slot`.
    ///
    /// Must be called at the start of `slot`'s reuse, before anything new is
    /// retired during the same iteration.
    pub fn collect(&mut self, slot: usize) -> Vec<T> {
        let mut ready = Vec::new();
        while let Some(&(front_slot, _)) = self.entries.front() {
            if front_slot != slot {
                break;
            }
            if let Some((_, item)) = self.entries.pop_front() {
                ready.push(item);
            }
        }
        ready
    }

    /// Release everything regardless of slot. Only valid once the device is idle.
    pub fn drain_all(&mut self) -> Vec<T> {
        self.entries.drain(..).map(|(_, item)| item).collect()
    }

    /// Slot of the oldest pending entry.
    pub fn front_slot(&self) -> Option<usize> {
        self.entries.front().map(|&(slot, _)| slot)
    }

    /// Number of items still waiting.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T> Default for DeferredQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_only_matching_front() {
        let mut queue = DeferredQueue::new();
        queue.push("a", 0);
        queue.push("b", 1);
        queue.push("c", 0);

        assert_eq!(queue.collect(1), Vec::<&str>::new());
        assert_eq!(queue.collect(0), vec!["a"]);
        assert_eq!(queue.collect(0), Vec::<&str>::new());
        assert_eq!(queue.collect(1), vec!["b"]);
        assert_eq!(queue.collect(0), vec!["c"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_consecutive_same_slot_entries_release_together() {
        let mut queue = DeferredQueue::new();
        queue.push(1, 1);
        queue.push(2, 1);
        queue.push(3, 0);

        assert_eq!(queue.collect(1), vec![1, 2]);
        assert_eq!(queue.front_slot(), Some(0));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_fifo_release_order() {
        let mut queue = DeferredQueue::new();
        let mut released = Vec::new();

        // Two slots alternating, one retirement per frame after the drain.
        for frame in 0..6usize {
            let slot = frame % 2;
            released.extend(queue.collect(slot));
            queue.push(frame, slot);
        }
        released.extend(queue.collect(0));
        released.extend(queue.collect(1));

        let mut sorted = released.clone();
        sorted.sort_unstable();
        assert_eq!(released, sorted);
        assert_eq!(released.len(), 6);
    }

    #[test]
    fn test_drain_all_empties_queue() {
        let mut queue = DeferredQueue::new();
        queue.push('x', 0);
        queue.push('y', 1);
        assert_eq!(queue.drain_all(), vec!['x', 'y']);
        assert!(queue.is_empty());
        assert_eq!(queue.front_slot(), None);
    }
}
