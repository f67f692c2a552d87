//! Physical placement: assigns each entry's encoded bytes a partition index
//! and byte offset, honoring alignment and the partition-size rollover, and
//! (when patch sources are supplied) reusing a prior build's placement for
//! unchanged chunks so the patch's on-disk delta stays small (§4.9 "Layout
//! finalization").

use crate::chunk_id::ChunkId;
use crate::codec::hash::Digest20;
use crate::container::ContainerReader;

use super::settings::PackingSettings;

/// One entry as seen by layout finalization — everything it needs that
/// doesn't require re-touching the entry's bytes.
#[derive(Debug, Clone)]
pub struct LayoutEntry {
    pub sequence: u64,
    pub order_hint: u64,
    pub chunk_id: ChunkId,
    pub hash: Digest20,
    pub is_memory_mapped: bool,
    /// Sum of every block's padded `raw_size` for this entry — the span its
    /// placement must reserve.
    pub total_raw_size: u64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PlacedEntry {
    pub partition_index: usize,
    /// Offset of the entry's first byte within `partition_index`, after padding.
    pub offset: u64,
    /// Zero bytes written immediately before the entry to satisfy alignment.
    pub padding: u64,
}

fn align_up_u64(value: u64, align: u64) -> u64 {
    if align <= 1 {
        return value;
    }
    (value + align - 1) / align * align
}

/// Looks up a chunk with the same id *and* content hash in any supplied
/// patch source, returning the partition/offset it occupied there.
fn find_patch_placement(entry: &LayoutEntry, patch_sources: &[ContainerReader]) -> Option<PlacedEntry> {
    for reader in patch_sources {
        let index = reader.toc().entry_index_of(entry.chunk_id)?;
        let meta = reader.toc().chunk_metas.get(index as usize)?;
        if meta.hash != entry.hash {
            continue;
        }
        let ol = reader.toc().offset_lengths.get(index as usize)?;
        let block_index = (ol.offset / reader.block_size() as u64) as usize;
        let block_entry = reader.toc().compression_blocks.get(block_index)?;
        let (partition_index, partition_offset) = reader.locate_encoded_offset(block_entry.offset);
        return Some(PlacedEntry {
            partition_index,
            offset: partition_offset,
            padding: 0,
        });
    }
    None
}

/// Sorts `entries` by `(order_hint asc, sequence asc)` and assigns each one a
/// `(partition_index, offset)`, returned in **input order** (index `i` of the
/// result corresponds to `entries[i]`).
///
/// A patched entry is only reused when its recorded offset is still ahead of
/// that partition's current append cursor — otherwise a newly placed entry
/// earlier in this same build could already occupy that span, so we fall
/// back to fresh placement rather than risk an overlapping write. This is a
/// conservative approximation of full patch-layout reuse: it preserves byte
/// position for chunks appended in roughly the same relative order across
/// builds (the common case — new content added at the end) without needing
/// a full free-space reservation pass.
pub fn finalize_layout(entries: &[LayoutEntry], settings: &PackingSettings, patch_sources: &[ContainerReader]) -> Vec<PlacedEntry> {
    let mut order: Vec<usize> = (0..entries.len()).collect();
    order.sort_by_key(|&i| (entries[i].order_hint, entries[i].sequence));

    let mut placements = vec![PlacedEntry::default(); entries.len()];
    let mut partition_cursors: Vec<u64> = vec![0];

    for &i in &order {
        let entry = &entries[i];

        if let Some(patched) = find_patch_placement(entry, patch_sources) {
            while partition_cursors.len() <= patched.partition_index {
                partition_cursors.push(0);
            }
            if patched.offset >= partition_cursors[patched.partition_index] {
                partition_cursors[patched.partition_index] = patched.offset + entry.total_raw_size;
                placements[i] = patched;
                continue;
            }
        }

        let current = partition_cursors.len() - 1;
        let cursor = partition_cursors[current];
        let mut start = cursor;
        if entry.is_memory_mapped {
            start = align_up_u64(start, settings.memory_mapping_alignment);
        }
        start = align_up_u64(start, settings.compression_block_alignment);

        if start > 0 && start + entry.total_raw_size > settings.max_partition_size {
            partition_cursors.push(entry.total_raw_size);
            placements[i] = PlacedEntry {
                partition_index: current + 1,
                offset: 0,
                padding: 0,
            };
            continue;
        }

        let padding = start - cursor;
        partition_cursors[current] = start + entry.total_raw_size;
        placements[i] = PlacedEntry {
            partition_index: current,
            offset: start,
            padding,
        };
    }

    placements
}
