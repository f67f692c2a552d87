//! Fixed-size LRU of decoded raw blocks, keyed by `(container_file_index, block_index)`.

use std::sync::Mutex;

pub type CacheKey = (u32, u32);

struct Entry {
    data: Vec<u8>,
    /// Prevents the eviction scan from picking an entry mid-copy.
    locked: bool,
}

struct CacheState {
    entries: hashbrown::HashMap<CacheKey, Entry>,
    /// Front = least-recently-used, back = most-recently-used.
    order: Vec<CacheKey>,
}

pub struct BlockCache {
    capacity: usize,
    state: Mutex<CacheState>,
}

impl BlockCache {
    pub fn new(capacity: usize) -> Self {
        BlockCache {
            capacity,
            state: Mutex::new(CacheState {
                entries: hashbrown::HashMap::new(),
                order: Vec::new(),
            }),
        }
    }

    /// Looks up `key`; on hit, copies the cached bytes into `destination` and
    /// promotes the entry to MRU.
    pub fn read(&self, key: CacheKey, destination: &mut [u8]) -> bool {
        let mut state = self.state.lock().unwrap();
        if !state.entries.contains_key(&key) {
            return false;
        }
        let len = {
            let entry = state.entries.get(&key).unwrap();
            let len = entry.data.len().min(destination.len());
            destination[..len].copy_from_slice(&entry.data[..len]);
            len
        };
        let _ = len;
        touch(&mut state.order, key);
        true
    }

    /// Inserts or refreshes `key` with `data`, evicting an unlocked LRU entry
    /// if the cache is at capacity.
    pub fn store(&self, key: CacheKey, data: &[u8]) {
        if self.capacity == 0 {
            return;
        }
        let mut state = self.state.lock().unwrap();
        if state.entries.contains_key(&key) {
            state.entries.get_mut(&key).unwrap().data = data.to_vec();
            touch(&mut state.order, key);
            return;
        }

        if state.entries.len() >= self.capacity {
            if let Some(pos) = state
                .order
                .iter()
                .position(|k| !state.entries.get(k).map(|e| e.locked).unwrap_or(true))
            {
                let evicted = state.order.remove(pos);
                state.entries.remove(&evicted);
            } else {
                // Every entry is locked; skip caching this block rather than
                // grow unboundedly.
                return;
            }
        }

        state.entries.insert(
            key,
            Entry {
                data: data.to_vec(),
                locked: false,
            },
        );
        state.order.push(key);
    }

    /// Marks `key` as currently being copied out of, excluding it from eviction.
    pub fn lock_entry(&self, key: CacheKey) {
        let mut state = self.state.lock().unwrap();
        if let Some(entry) = state.entries.get_mut(&key) {
            entry.locked = true;
        }
    }

    pub fn unlock_entry(&self, key: CacheKey) {
        let mut state = self.state.lock().unwrap();
        if let Some(entry) = state.entries.get_mut(&key) {
            entry.locked = false;
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().entries.len()
    }
}

fn touch(order: &mut Vec<CacheKey>, key: CacheKey) {
    if let Some(pos) = order.iter().position(|k| *k == key) {
        order.remove(pos);
    }
    order.push(key);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_then_read_hits() {
        let cache = BlockCache::new(2);
        cache.store((0, 1), &[1, 2, 3, 4]);
        let mut dst = [0u8; 4];
        assert!(cache.read((0, 1), &mut dst));
        assert_eq!(dst, [1, 2, 3, 4]);
    }

    #[test]
    fn miss_returns_false() {
        let cache = BlockCache::new(2);
        let mut dst = [0u8; 4];
        assert!(!cache.read((0, 1), &mut dst));
    }

    #[test]
    fn evicts_lru_when_full() {
        let cache = BlockCache::new(2);
        cache.store((0, 1), &[1]);
        cache.store((0, 2), &[2]);
        cache.store((0, 3), &[3]); // evicts (0,1), the LRU entry
        let mut dst = [0u8; 1];
        assert!(!cache.read((0, 1), &mut dst));
        assert!(cache.read((0, 2), &mut dst));
        assert!(cache.read((0, 3), &mut dst));
    }

    #[test]
    fn locked_entry_is_not_evicted() {
        let cache = BlockCache::new(1);
        cache.store((0, 1), &[1]);
        cache.lock_entry((0, 1));
        cache.store((0, 2), &[2]); // can't evict (0,1); silently skipped
        assert_eq!(cache.len(), 1);
        let mut dst = [0u8; 1];
        assert!(cache.read((0, 1), &mut dst));
    }

    #[test]
    fn read_promotes_to_mru() {
        let cache = BlockCache::new(2);
        cache.store((0, 1), &[1]);
        cache.store((0, 2), &[2]);
        let mut dst = [0u8; 1];
        cache.read((0, 1), &mut dst); // promote (0,1) to MRU
        cache.store((0, 3), &[3]); // should evict (0,2) now
        assert!(cache.read((0, 1), &mut dst));
        assert!(!cache.read((0, 2), &mut dst));
    }
}
