//! Owns the `raw_blocks` and `compressed_blocks` maps and drives their
//! dedup, linking, cancellation, and release-on-refcount-zero logic.

use hashbrown::HashMap;

use crate::queue::Priority;
use crate::tracker::compressed_block::{CompressedBlock, CompressedBlockId, CompressedBlockKey};
use crate::tracker::raw_block::{RawBlock, RawBlockId, RawBlockKey};
use crate::tracker::resolved_request::ResolvedRequestId;
use crate::utilities::arena::Arena;

/// Raw blocks raised to this priority when cancellation leaves them as the
/// only thing still needed to drain (so the backend flushes them quickly).
const CANCEL_DRAIN_PRIORITY: Priority = Priority::Max;

#[derive(Debug, Default)]
pub struct CancelOutcome {
    pub newly_cancelled_raw: Vec<RawBlockId>,
    pub newly_cancelled_compressed: Vec<CompressedBlockId>,
    /// Raw blocks whose priority changed (caller must reheapify the queue).
    pub priority_raised: Vec<RawBlockId>,
}

pub struct RequestTracker {
    raw_blocks: Arena<RawBlock>,
    raw_block_keys: HashMap<RawBlockKey, RawBlockId>,
    compressed_blocks: Arena<CompressedBlock>,
    compressed_block_keys: HashMap<CompressedBlockKey, CompressedBlockId>,
}

impl RequestTracker {
    pub fn new() -> Self {
        RequestTracker {
            raw_blocks: Arena::new(),
            raw_block_keys: HashMap::new(),
            compressed_blocks: Arena::new(),
            compressed_block_keys: HashMap::new(),
        }
    }

    pub fn find_or_add_raw(
        &mut self,
        key: RawBlockKey,
        make: impl FnOnce() -> RawBlock,
    ) -> (RawBlockId, bool) {
        if let Some(id) = self.raw_block_keys.get(&key) {
            return (*id, false);
        }
        let index = self.raw_blocks.insert(make());
        let id = RawBlockId(index);
        self.raw_block_keys.insert(key, id);
        (id, true)
    }

    pub fn find_or_add_compressed(
        &mut self,
        key: CompressedBlockKey,
        make: impl FnOnce() -> CompressedBlock,
    ) -> (CompressedBlockId, bool) {
        if let Some(id) = self.compressed_block_keys.get(&key) {
            return (*id, false);
        }
        let index = self.compressed_blocks.insert(make());
        let id = CompressedBlockId(index);
        self.compressed_block_keys.insert(key, id);
        (id, true)
    }

    pub fn raw_id_for_key(&self, key: RawBlockKey) -> Option<RawBlockId> {
        self.raw_block_keys.get(&key).copied()
    }

    pub fn raw(&self, id: RawBlockId) -> &RawBlock {
        self.raw_blocks.get(id.0)
    }

    pub fn raw_mut(&mut self, id: RawBlockId) -> &mut RawBlock {
        self.raw_blocks.get_mut(id.0)
    }

    pub fn compressed(&self, id: CompressedBlockId) -> &CompressedBlock {
        self.compressed_blocks.get(id.0)
    }

    pub fn compressed_mut(&mut self, id: CompressedBlockId) -> &mut CompressedBlock {
        self.compressed_blocks.get_mut(id.0)
    }

    pub fn remove_raw(&mut self, id: RawBlockId) -> RawBlock {
        let block = self.raw_blocks.remove(id.0);
        self.raw_block_keys.remove(&block.key);
        block
    }

    pub fn remove_compressed(&mut self, id: CompressedBlockId) -> CompressedBlock {
        let block = self.compressed_blocks.remove(id.0);
        self.compressed_block_keys.remove(&block.key);
        block
    }

    /// Links `compressed_id`'s raw blocks into `resolved_id`'s dependency
    /// list and bumps refcounts. Returns the raw blocks whose priority was
    /// raised (queue must be reheapified).
    pub fn add_read_requests_to_resolved(
        &mut self,
        compressed_id: CompressedBlockId,
        resolved_id: ResolvedRequestId,
        resolved_priority: Priority,
    ) -> (Vec<RawBlockId>, Vec<RawBlockId>) {
        let raw_ids = self.compressed(compressed_id).raw_blocks.clone();
        let mut raised = Vec::new();
        for raw_id in &raw_ids {
            let raw = self.raw_mut(*raw_id);
            raw.refcount += 1;
            if resolved_priority > raw.priority {
                raw.priority = resolved_priority;
                raised.push(*raw_id);
            }
        }
        self.compressed_mut(compressed_id).refcount += 1;
        let _ = resolved_id;
        (raw_ids, raised)
    }

    /// Raises priority on a resolved request's dependencies where needed.
    /// Returns the raw blocks whose priority changed.
    pub fn reprioritize(
        &mut self,
        raw_block_refs: &[RawBlockId],
        new_priority: Priority,
    ) -> Vec<RawBlockId> {
        let mut raised = Vec::new();
        for raw_id in raw_block_refs {
            let raw = self.raw_mut(*raw_id);
            if new_priority > raw.priority {
                raw.priority = new_priority;
                raised.push(*raw_id);
            }
        }
        raised
    }

    /// Cancels whatever is exclusively needed by `resolved_id`'s dependency
    /// list, leaving anything still shared with a live request untouched.
    pub fn cancel(
        &mut self,
        raw_block_refs: &[RawBlockId],
        is_resolved_cancelled: impl Fn(ResolvedRequestId) -> bool,
    ) -> CancelOutcome {
        let mut outcome = CancelOutcome::default();

        for raw_id in raw_block_refs {
            let compressed_ids = self.raw(*raw_id).compressed_blocks.clone();
            for cid in compressed_ids {
                if self.compressed(cid).cancelled {
                    continue;
                }
                let all_targets_cancelled = self
                    .compressed(cid)
                    .scatters
                    .iter()
                    .all(|s| is_resolved_cancelled(s.resolved));
                if all_targets_cancelled {
                    self.compressed_mut(cid).cancelled = true;
                    outcome.newly_cancelled_compressed.push(cid);
                }
            }

            let siblings_all_cancelled = self
                .raw(*raw_id)
                .compressed_blocks
                .iter()
                .all(|cid| self.compressed(*cid).cancelled);

            if siblings_all_cancelled && !self.raw(*raw_id).state.cancelled {
                let raw = self.raw_mut(*raw_id);
                raw.state.cancelled = true;
                raw.priority = CANCEL_DRAIN_PRIORITY;
                outcome.newly_cancelled_raw.push(*raw_id);
                outcome.priority_raised.push(*raw_id);
            }
        }

        outcome
    }

    /// Decrements refcounts along the dependency list, removing any raw or
    /// compressed block whose refcount reaches zero. Returns the raw blocks
    /// that were actually removed, so the caller can return their pool
    /// buffers (if any were already read) rather than letting them drop.
    ///
    /// `compressed_block_refs` must list the distinct compressed blocks this
    /// request depends on (one entry per `add_read_requests_to_resolved`
    /// call) — that is the granularity its refcount was incremented at, and a
    /// raw block's own `compressed_blocks` list (which can include consumers
    /// belonging to other requests entirely once a raw block is shared) is
    /// not a substitute for it.
    pub fn release_references(
        &mut self,
        raw_block_refs: &[RawBlockId],
        compressed_block_refs: &[CompressedBlockId],
    ) -> Vec<RawBlock> {
        for cid in compressed_block_refs {
            let block = self.compressed_mut(*cid);
            if block.refcount > 0 {
                block.refcount -= 1;
            }
            if block.refcount == 0 {
                self.remove_compressed(*cid);
            }
        }

        let mut removed = Vec::new();
        for raw_id in raw_block_refs {
            let raw = self.raw_mut(*raw_id);
            if raw.refcount > 0 {
                raw.refcount -= 1;
            }
            if raw.refcount == 0 {
                removed.push(self.remove_raw(*raw_id));
            }
        }
        removed
    }
}

impl Default for RequestTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(key: RawBlockKey) -> RawBlock {
        RawBlock::new(key, 0, 4096, Priority::Medium)
    }

    #[test]
    fn find_or_add_raw_dedupes_same_key() {
        let mut tracker = RequestTracker::new();
        let (id1, inserted1) = tracker.find_or_add_raw((0, 1), || raw((0, 1)));
        let (id2, inserted2) = tracker.find_or_add_raw((0, 1), || raw((0, 1)));
        assert!(inserted1);
        assert!(!inserted2);
        assert_eq!(id1, id2);
    }

    #[test]
    fn different_keys_get_different_ids() {
        let mut tracker = RequestTracker::new();
        let (id1, _) = tracker.find_or_add_raw((0, 1), || raw((0, 1)));
        let (id2, _) = tracker.find_or_add_raw((0, 2), || raw((0, 2)));
        assert_ne!(id1, id2);
    }

    #[test]
    fn release_references_frees_at_zero() {
        let mut tracker = RequestTracker::new();
        let (raw_id, _) = tracker.find_or_add_raw((0, 1), || raw((0, 1)));
        tracker.raw_mut(raw_id).refcount = 1;
        tracker.release_references(&[raw_id], &[]);
        // A second find_or_add_raw with the same key must allocate a fresh
        // entry, proving the old one was actually removed.
        let (raw_id2, inserted) = tracker.find_or_add_raw((0, 1), || raw((0, 1)));
        assert!(inserted);
        let _ = raw_id2;
    }
}
