//! Phase Queues
//!
//! A clock drains its work in phases (changed cells, stale computations,
//! stale subclocks, disposals). Each phase has a `Queue`: an append-only
//! buffer that is taken whole when the phase runs. Items appended while a
//! phase runs land in the fresh buffer and are picked up by the next tick.
//!
//! Taken buffers can be handed back with [`Queue::recycle`] so a busy clock
//! does not reallocate every tick.

/// Append-only buffer of pending items for one phase of a batch.
#[derive(Debug)]
pub struct Queue<T> {
    items: Vec<T>,
    spare: Vec<T>,
}

impl<T> Queue<T> {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            spare: Vec::new(),
        }
    }

    pub fn add(&mut self, item: T) {
        self.items.push(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Take every queued item, leaving the queue empty.
    pub fn take(&mut self) -> Vec<T> {
        let spare = std::mem::take(&mut self.spare);
        std::mem::replace(&mut self.items, spare)
    }

    /// Return a buffer obtained from [`Queue::take`] for reuse.
    pub fn recycle(&mut self, mut buffer: Vec<T>) {
        buffer.clear();
        if buffer.capacity() > self.spare.capacity() {
            self.spare = buffer;
        }
    }

    /// Drop every queued item.
    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_empties_the_queue() {
        let mut queue = Queue::new();
        queue.add(1);
        queue.add(2);

        assert_eq!(queue.take(), vec![1, 2]);
        assert!(queue.is_empty());
    }

    #[test]
    fn items_added_after_take_are_kept_for_next_phase() {
        let mut queue = Queue::new();
        queue.add("a");
        let batch = queue.take();
        queue.add("b");

        assert_eq!(batch, vec!["a"]);
        assert_eq!(queue.iter().copied().collect::<Vec<_>>(), vec!["b"]);
    }

    #[test]
    fn recycled_buffer_is_reused() {
        let mut queue = Queue::new();
        for i in 0..64 {
            queue.add(i);
        }
        let buffer = queue.take();
        let capacity = buffer.capacity();
        queue.recycle(buffer);

        // The next take hands out the (now empty) queue and installs the spare
        let _ = queue.take();
        queue.add(1);
        assert!(queue.items.capacity() >= capacity);
        assert_eq!(queue.len(), 1);
    }
}
