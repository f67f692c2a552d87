//! One `block_size`-sized span of a chunk's uncompressed bytes, covered by
//! one or more raw blocks.

use crate::codec::cipher::CipherKey;
use crate::codec::compression::CompressionMethod;
use crate::codec::hash::Digest20;
use crate::tracker::raw_block::RawBlockId;
use crate::tracker::resolved_request::ResolvedRequestId;

/// Key identifying a compressed block: partition file index and its index
/// within that partition's compression-block table.
pub type CompressedBlockKey = (u32, u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CompressedBlockId(pub u32);

/// The final memcpy of decoded bytes into a client request's output buffer.
#[derive(Debug, Clone, Copy)]
pub struct ScatterDescriptor {
    pub resolved: ResolvedRequestId,
    pub dst_offset: u64,
    pub src_offset_in_block: u32,
    pub size: u32,
}

pub struct CompressedBlock {
    pub key: CompressedBlockKey,
    pub uncompressed_size: u32,
    pub compressed_size: u32,
    pub method: CompressionMethod,
    /// `compressed_size` aligned up to the cipher block size.
    pub raw_size: u32,
    /// Partition-relative byte offset of this block's raw (possibly
    /// encrypted, padded) bytes.
    pub raw_offset: u64,
    pub raw_blocks: Vec<RawBlockId>,
    pub unfinished_raw_blocks: u32,
    pub scatters: Vec<ScatterDescriptor>,
    pub decrypt_key: Option<CipherKey>,
    pub expected_signature: Option<Digest20>,
    /// Scratch holding this block's raw (possibly encrypted/compressed)
    /// bytes, assembled by copying each covering raw block's overlap in as
    /// it completes. Left `None` until the first raw block completes.
    pub scratch: Option<Vec<u8>>,
    pub refcount: u32,
    pub failed: bool,
    pub cancelled: bool,
    /// Mounted container's short name and this block's index in the TOC's
    /// compression-block table, carried only so a signature mismatch can be
    /// reported on `SignatureErrorInfo` without reaching back into the mount
    /// list from the decode/finalize path.
    pub container_short_name: String,
    pub toc_block_index: u32,
}

impl CompressedBlock {
    pub fn new(
        key: CompressedBlockKey,
        uncompressed_size: u32,
        compressed_size: u32,
        method: CompressionMethod,
        raw_size: u32,
        raw_offset: u64,
    ) -> Self {
        CompressedBlock {
            key,
            uncompressed_size,
            compressed_size,
            method,
            raw_size,
            raw_offset,
            raw_blocks: Vec::new(),
            unfinished_raw_blocks: 0,
            scatters: Vec::new(),
            decrypt_key: None,
            expected_signature: None,
            scratch: None,
            refcount: 0,
            failed: false,
            cancelled: false,
            container_short_name: String::new(),
            toc_block_index: 0,
        }
    }
}
