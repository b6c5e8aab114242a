//! Useful base types for implementing a controller.

/// A bounded first-in first-out queue with inline storage.
#[derive(Clone, Debug)]
pub struct Ring<T, const Q: usize> {
    buffer: [Option<T>; Q],
    next_recv: usize,
    sent: usize,
}

impl<T: Copy, const Q: usize> Ring<T, Q> {
    /// An empty queue.
    pub const fn new() -> Self {
        Ring {
            buffer: [None; Q],
            next_recv: 0,
            sent: 0,
        }
    }

    /// Append an element, handing it back if the queue is full.
    pub fn push(&mut self, item: T) -> Result<(), T> {
        if self.sent == Q {
            return Err(item);
        }

        let slot = self.wrap(self.next_recv, self.sent);
        self.buffer[slot] = Some(item);
        self.sent += 1;
        Ok(())
    }

    /// Remove the oldest element.
    pub fn pop(&mut self) -> Option<T> {
        if self.sent == 0 {
            return None;
        }

        let item = self.buffer[self.next_recv].take();
        self.next_recv = self.wrap(self.next_recv, 1);
        self.sent -= 1;
        item
    }

    /// The number of queued elements.
    pub fn len(&self) -> usize {
        self.sent
    }

    /// Check if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.sent == 0
    }

    fn wrap(&self, base: usize, add: usize) -> usize {
        (base + add) % Q
    }
}

impl<T: Copy, const Q: usize> Default for Ring<T, Q> {
    fn default() -> Self {
        Ring::new()
    }
}
