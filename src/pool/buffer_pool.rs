//! Fixed-capacity pool of raw-read buffers.

use std::sync::{Condvar, Mutex};

/// One page-sized raw-read buffer, checked out of the pool.
pub struct PoolBuffer {
    pub data: Vec<u8>,
}

struct PoolState {
    available: Vec<Vec<u8>>,
}

/// A fixed-capacity pool of `buffer_size`-byte buffers. `alloc()` never
/// grows the pool; callers that see `None` must wait for a `free()` (see
/// [`BufferPool::alloc_blocking`]).
pub struct BufferPool {
    buffer_size: usize,
    capacity: usize,
    state: Mutex<PoolState>,
    condvar: Condvar,
}

impl BufferPool {
    pub fn new(capacity: usize, buffer_size: usize) -> Self {
        let available = (0..capacity).map(|_| vec![0u8; buffer_size]).collect();
        BufferPool {
            buffer_size,
            capacity,
            state: Mutex::new(PoolState { available }),
            condvar: Condvar::new(),
        }
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Non-blocking allocation; `None` means the pool is exhausted.
    pub fn alloc(&self) -> Option<PoolBuffer> {
        let mut state = self.state.lock().unwrap();
        state.available.pop().map(|data| PoolBuffer { data })
    }

    /// Blocks until a buffer is free. Used by the I/O backend, which has no
    /// other useful work to do while the pool is exhausted.
    pub fn alloc_blocking(&self) -> PoolBuffer {
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(data) = state.available.pop() {
                return PoolBuffer { data };
            }
            state = self.condvar.wait(state).unwrap();
        }
    }

    /// Returns a buffer to the pool and wakes any blocked allocators.
    pub fn free(&self, buffer: PoolBuffer) {
        let mut state = self.state.lock().unwrap();
        state.available.push(buffer.data);
        drop(state);
        self.condvar.notify_all();
    }

    #[cfg(test)]
    pub fn available_count(&self) -> usize {
        self.state.lock().unwrap().available.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn alloc_exhausts_and_free_replenishes() {
        let pool = BufferPool::new(2, 1024);
        let a = pool.alloc().unwrap();
        let b = pool.alloc().unwrap();
        assert!(pool.alloc().is_none());

        pool.free(a);
        assert_eq!(pool.available_count(), 1);
        pool.free(b);
        assert_eq!(pool.available_count(), 2);
    }

    #[test]
    fn alloc_blocking_wakes_on_free() {
        let pool = Arc::new(BufferPool::new(1, 64));
        let held = pool.alloc().unwrap();

        let pool2 = pool.clone();
        let handle = std::thread::spawn(move || {
            let _buf = pool2.alloc_blocking();
        });

        std::thread::sleep(Duration::from_millis(20));
        pool.free(held);
        handle.join().unwrap();
    }

    #[test]
    fn buffers_are_sized_correctly() {
        let pool = BufferPool::new(1, 4096);
        let buf = pool.alloc().unwrap();
        assert_eq!(buf.data.len(), 4096);
    }
}
