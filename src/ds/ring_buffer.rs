#![allow(clippy::len_without_is_empty)]

/// A fixed-capacity ringbuffer that overwrites its oldest element when full
#[derive(Debug, Default, Clone)]
pub struct RingBuffer<T> {
    buffer: Vec<T>,
    ix: usize,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    /// **Panics** if `capacity` is zero
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "RingBuffer capacity must be positive");
        Self {
            buffer: Vec::<T>::with_capacity(capacity),
            ix: 0,
            capacity,
        }
    }

    /// Returns the number of elements currently stored
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.buffer.len() == self.capacity
    }

    /// Insert an element into the buffer, overwriting the oldest element, and return the write index
    pub fn push(&mut self, item: T) -> usize {
        let ix = self.ix;
        if ix >= self.len() {
            self.buffer.push(item);
        } else {
            self.buffer[ix] = item;
        }
        self.ix = (ix + 1) % self.capacity;
        ix
    }

    /// Get a slice view of the internal buffer, in storage order
    pub fn view(&self) -> &[T] {
        &self.buffer
    }

    /// Drop every element, keeping the capacity
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.ix = 0;
    }
}

impl RingBuffer<f64> {
    /// Mean of the stored values, or `None` if empty
    pub fn mean(&self) -> Option<f64> {
        (!self.buffer.is_empty()).then(|| self.buffer.iter().sum::<f64>() / self.buffer.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ringbuffer_functional() {
        let mut buf = RingBuffer::new(4);
        assert_eq!(buf.len(), 0, "initialized empty");

        for i in 0..4 {
            buf.push(i * 2);
        }

        assert!(buf.is_full(), "full after capacity pushes");
        assert_eq!(buf.view(), [0, 2, 4, 6], "contents correct");

        buf.push(1);
        let ix = buf.push(3);
        assert_eq!(ix, 1, "write index is correct");
        assert_eq!(buf.len(), 4, "length unchanged");
        assert_eq!(buf.view(), [1, 3, 4, 6], "contents overwritten correctly");

        buf.clear();
        assert_eq!(buf.len(), 0, "cleared");
        assert_eq!(buf.push(9), 0, "write index reset");
    }

    #[test]
    fn rolling_mean() {
        let mut buf = RingBuffer::<f64>::new(3);
        assert_eq!(buf.mean(), None, "no mean when empty");

        buf.push(1.0);
        buf.push(2.0);
        assert_eq!(buf.mean(), Some(1.5));

        buf.push(3.0);
        buf.push(7.0);
        assert_eq!(buf.mean(), Some(4.0), "oldest value evicted");
    }
}
