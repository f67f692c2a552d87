//! The unit of platform I/O: one `read_buffer_size`-sized span of a partition file.

use crate::pool::PoolBuffer;
use crate::queue::Priority;
use crate::tracker::compressed_block::CompressedBlockId;

/// Key identifying a raw block: the globally-unique partition file index and
/// its block index within that partition.
pub type RawBlockKey = (u32, u32);

/// Arena index for a [`RawBlock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawBlockId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RawBlockState {
    pub submitted: bool,
    pub cancelled: bool,
    pub failed: bool,
}

pub struct RawBlock {
    pub key: RawBlockKey,
    pub file_offset: u64,
    pub size: u32,
    pub priority: Priority,
    pub state: RawBlockState,
    /// Present once the backend has allocated a pool buffer for this block.
    pub buffer: Option<PoolBuffer>,
    /// Compressed blocks that still need to copy out of `buffer`.
    pub buffer_refcount: u32,
    /// Compressed blocks that reference this tracker entry.
    pub refcount: u32,
    /// `false` when the read exactly covers this block's whole range — no
    /// partial-block advantage from caching it.
    pub cacheable: bool,
    pub compressed_blocks: Vec<CompressedBlockId>,
}

impl RawBlock {
    pub fn new(key: RawBlockKey, file_offset: u64, size: u32, priority: Priority) -> Self {
        RawBlock {
            key,
            file_offset,
            size,
            priority,
            state: RawBlockState::default(),
            buffer: None,
            buffer_refcount: 0,
            refcount: 0,
            cacheable: true,
            compressed_blocks: Vec::new(),
        }
    }
}
