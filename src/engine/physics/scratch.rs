use std::any::{Any, TypeId};
use std::collections::HashMap;

/// Per-worker arena of reusable scratch vectors.
///
/// Buffers are keyed by element type. `take` hands out an empty vector that
/// keeps the capacity it had when it was given back, so steady-state queries
/// and steps stop allocating once the pool is warm. A pool is owned by exactly
/// one worker at a time and is never shared while in use.
#[derive(Debug)]
pub struct ScratchBufferPool {
    buffers: HashMap<TypeId, Vec<Box<dyn Any + Send>>>,
    minimum_capacity: usize,
    retained_bytes: usize,
}

impl ScratchBufferPool {
    /// Create a pool whose fresh buffers reserve at least `minimum_capacity` elements
    pub fn new(minimum_capacity: usize) -> Self {
        Self {
            buffers: HashMap::new(),
            minimum_capacity,
            retained_bytes: 0,
        }
    }

    /// Take an empty buffer of `T`, reusing a returned one when available
    pub fn take<T: Send + 'static>(&mut self) -> Vec<T> {
        let reused = self
            .buffers
            .get_mut(&TypeId::of::<T>())
            .and_then(Vec::pop)
            .and_then(|boxed| boxed.downcast::<Vec<T>>().ok());

        match reused {
            Some(buffer) => {
                self.retained_bytes = self
                    .retained_bytes
                    .saturating_sub(buffer.capacity() * std::mem::size_of::<T>());
                *buffer
            }
            None => Vec::with_capacity(self.minimum_capacity),
        }
    }

    /// Return a buffer so later `take` calls can reuse its allocation
    pub fn give_back<T: Send + 'static>(&mut self, mut buffer: Vec<T>) {
        buffer.clear();
        if buffer.capacity() == 0 {
            return;
        }
        self.retained_bytes += buffer.capacity() * std::mem::size_of::<T>();
        self.buffers
            .entry(TypeId::of::<T>())
            .or_default()
            .push(Box::new(buffer));
    }

    /// Release every retained buffer. The pool stays usable.
    pub fn clear(&mut self) {
        self.buffers.clear();
        self.retained_bytes = 0;
    }

    /// Bytes held by buffers currently sitting in the pool
    pub fn retained_bytes(&self) -> usize {
        self.retained_bytes
    }
}

impl Default for ScratchBufferPool {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_reuses_given_back_allocation() {
        let mut pool = ScratchBufferPool::new(4);
        let mut buffer: Vec<u64> = pool.take();
        buffer.extend(0..100);
        let capacity = buffer.capacity();
        pool.give_back(buffer);

        assert_eq!(pool.retained_bytes(), capacity * 8);

        let again: Vec<u64> = pool.take();
        assert!(again.is_empty(), "Reused buffers come back empty");
        assert_eq!(again.capacity(), capacity);
        assert_eq!(pool.retained_bytes(), 0);
    }

    #[test]
    fn test_buffers_are_typed() {
        let mut pool = ScratchBufferPool::new(8);
        pool.give_back(vec![1u32, 2, 3]);

        let other: Vec<f64> = pool.take();
        assert_eq!(other.capacity(), 8, "A different type gets a fresh buffer");
    }

    #[test]
    fn test_clear_releases_everything() {
        let mut pool = ScratchBufferPool::new(8);
        pool.give_back(vec![0u8; 64]);
        pool.clear();
        assert_eq!(pool.retained_bytes(), 0);
    }
}
