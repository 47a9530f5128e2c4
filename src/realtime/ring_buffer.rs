//! Fixed-capacity, overwrite-oldest circular storage.

/// Circular buffer keeping the most recent `capacity` items.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    slots: Vec<Option<T>>,
    write: usize,
    len: usize,
}

impl<T> RingBuffer<T> {
    /// A zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots,
            write: 0,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    /// Insert at the write index. Returns the item it overwrote.
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = self.slots[self.write].replace(item);
        self.write = (self.write + 1) % self.capacity();
        self.len = (self.len + 1).min(self.capacity());
        evicted
    }

    /// Remove everything, oldest first.
    pub fn drain(&mut self) -> Vec<T> {
        let capacity = self.capacity();
        let start = (self.write + capacity - self.len) % capacity;
        let items = (0..self.len)
            .filter_map(|i| self.slots[(start + i) % capacity].take())
            .collect();
        self.write = 0;
        self.len = 0;
        items
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.write = 0;
        self.len = 0;
    }

    fn newest_first_iter(&self) -> impl Iterator<Item = &T> {
        let capacity = self.capacity();
        (0..self.len).filter_map(move |i| self.slots[(self.write + capacity - 1 - i) % capacity].as_ref())
    }
}

impl<T: Clone> RingBuffer<T> {
    /// Ordered view, most recent item first.
    pub fn newest_first(&self) -> Vec<T> {
        self.newest_first_iter().cloned().collect()
    }
}
