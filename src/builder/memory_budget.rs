//! Bounds the compress stage's in-flight consumed-but-not-yet-compressed
//! bytes (§4.9 "gated by a memory budget of default 10 GiB"), the same
//! acquire/block/release shape as [`crate::pool::BufferPool`] but sized in
//! arbitrary byte counts instead of fixed-size buffers.

use std::sync::{Condvar, Mutex};

pub struct MemoryBudget {
    state: Mutex<u64>,
    condvar: Condvar,
    capacity: u64,
}

impl MemoryBudget {
    pub fn new(capacity: u64) -> Self {
        MemoryBudget {
            state: Mutex::new(0),
            condvar: Condvar::new(),
            capacity,
        }
    }

    /// Blocks until `bytes` can be reserved without exceeding capacity. A
    /// single reservation larger than the whole budget is still allowed
    /// through once the budget is entirely free, so one oversized entry
    /// can't deadlock the pipeline.
    pub fn acquire(&self, bytes: u64) {
        let mut used = self.state.lock().unwrap();
        while *used > 0 && *used + bytes > self.capacity {
            used = self.condvar.wait(used).unwrap();
        }
        *used += bytes;
    }

    pub fn release(&self, bytes: u64) {
        let mut used = self.state.lock().unwrap();
        *used = used.saturating_sub(bytes);
        drop(used);
        self.condvar.notify_all();
    }

    pub fn in_use(&self) -> u64 {
        *self.state.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn acquire_release_round_trips() {
        let budget = MemoryBudget::new(100);
        budget.acquire(40);
        assert_eq!(budget.in_use(), 40);
        budget.release(40);
        assert_eq!(budget.in_use(), 0);
    }

    #[test]
    fn oversized_single_reservation_is_allowed_when_idle() {
        let budget = MemoryBudget::new(10);
        budget.acquire(1000);
        assert_eq!(budget.in_use(), 1000);
    }

    #[test]
    fn acquire_blocks_until_release_frees_room() {
        let budget = Arc::new(MemoryBudget::new(10));
        budget.acquire(10);

        let waiter = {
            let budget = budget.clone();
            thread::spawn(move || {
                budget.acquire(5);
            })
        };

        thread::sleep(Duration::from_millis(50));
        budget.release(10);
        waiter.join().unwrap();
        assert_eq!(budget.in_use(), 5);
    }
}
