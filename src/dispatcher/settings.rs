//! Dispatcher configuration: buffer pool sizing, cache capacity, and the
//! single-threaded/multithreaded scheduling switch (§9).

use crate::utilities::system_info::get_num_cores;

/// Default size of one raw-read buffer (256 KiB, §3 "BufferPool buffer").
pub const DEFAULT_READ_BUFFER_SIZE: usize = 256 * 1024;

#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    /// Total bytes devoted to the buffer pool; divided by `read_buffer_size`
    /// to get the pool's buffer capacity.
    pub buffer_pool_memory: usize,
    pub read_buffer_size: usize,
    /// Number of decoded raw blocks the LRU keeps around.
    pub block_cache_capacity: usize,
    /// When `false`, no dispatcher/backend/decode threads are spawned;
    /// `Dispatcher::wake()` pumps the pipeline inline on the caller's thread
    /// until nothing is pending (§9 "single-threaded host").
    pub multithreaded: bool,
    /// Decode-stage worker thread count; ignored when `multithreaded` is `false`.
    pub decode_workers: usize,
    /// I/O backend worker thread count; ignored when `multithreaded` is `false`.
    pub io_workers: usize,
}

impl DispatcherSettings {
    pub fn buffer_pool_capacity(&self) -> usize {
        (self.buffer_pool_memory / self.read_buffer_size).max(1)
    }
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        let cores = get_num_cores().get() as usize;
        DispatcherSettings {
            buffer_pool_memory: 32 * DEFAULT_READ_BUFFER_SIZE,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            block_cache_capacity: 64,
            multithreaded: true,
            decode_workers: cores.max(1),
            io_workers: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_pool_capacity_divides_memory_by_buffer_size() {
        let settings = DispatcherSettings {
            buffer_pool_memory: 1024 * 1024,
            read_buffer_size: 256 * 1024,
            ..Default::default()
        };
        assert_eq!(settings.buffer_pool_capacity(), 4);
    }

    #[test]
    fn capacity_is_never_zero() {
        let settings = DispatcherSettings {
            buffer_pool_memory: 10,
            read_buffer_size: 1024,
            ..Default::default()
        };
        assert_eq!(settings.buffer_pool_capacity(), 1);
    }
}
