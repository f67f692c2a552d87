//! A resolved client request: the work item the tracker and queue operate on.

use crate::queue::Priority;
use crate::tracker::compressed_block::CompressedBlockId;
use crate::tracker::raw_block::RawBlockId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResolvedRequestId(pub u32);

/// The request's I/O buffer: either a freshly allocated owned buffer, or a
/// wrapper around caller-supplied memory (`target_va`). The caller is
/// responsible for keeping `External` memory alive and unfreed until the
/// request's callback fires — that contract is why this is `unsafe` to
/// construct.
pub enum RequestBuffer {
    Owned(Vec<u8>),
    External { ptr: *mut u8, len: usize },
}

// SAFETY: `External` is only ever written to by the dispatcher/decode thread
// that owns this `ResolvedRequest`, and the caller contract (documented on
// `RequestBuffer`) guarantees the pointee outlives that access.
unsafe impl Send for RequestBuffer {}

impl RequestBuffer {
    pub fn len(&self) -> usize {
        match self {
            RequestBuffer::Owned(v) => v.len(),
            RequestBuffer::External { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// # Safety
    /// `dst_offset + data.len()` must be within bounds, and for `External`,
    /// the pointee must still be valid.
    pub unsafe fn write_at(&mut self, dst_offset: u64, data: &[u8]) {
        let offset = dst_offset as usize;
        match self {
            RequestBuffer::Owned(v) => {
                v[offset..offset + data.len()].copy_from_slice(data);
            }
            RequestBuffer::External { ptr, .. } => {
                std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.add(offset), data.len());
            }
        }
    }

    pub fn into_vec(self) -> Vec<u8> {
        match self {
            RequestBuffer::Owned(v) => v,
            RequestBuffer::External { .. } => {
                panic!("into_vec called on an externally-backed request buffer")
            }
        }
    }
}

pub struct ResolvedRequest {
    pub container_file_index: u32,
    pub offset: u64,
    pub size: u64,
    pub buffer: RequestBuffer,
    pub raw_block_refs: Vec<RawBlockId>,
    /// The distinct compressed blocks this request depends on, one entry per
    /// `RequestTracker::add_read_requests_to_resolved` call — mirrors the
    /// granularity of that call's `CompressedBlock::refcount` bump so
    /// `release_references` can decrement each compressed block exactly as
    /// many times as it was incremented, independent of how many raw blocks
    /// (possibly shared with other compressed blocks) back it.
    pub compressed_block_refs: Vec<CompressedBlockId>,
    pub unfinished_reads: u32,
    pub priority: Priority,
    pub failed: bool,
}

impl ResolvedRequest {
    pub fn new(container_file_index: u32, offset: u64, size: u64, priority: Priority) -> Self {
        ResolvedRequest {
            container_file_index,
            offset,
            size,
            buffer: RequestBuffer::Owned(vec![0u8; size as usize]),
            raw_block_refs: Vec::new(),
            compressed_block_refs: Vec::new(),
            unfinished_reads: 0,
            priority,
            failed: false,
        }
    }

    /// # Safety
    /// `ptr` must be valid for `len` bytes for the lifetime of this request.
    pub unsafe fn with_external_buffer(
        container_file_index: u32,
        offset: u64,
        size: u64,
        priority: Priority,
        ptr: *mut u8,
        len: usize,
    ) -> Self {
        ResolvedRequest {
            container_file_index,
            offset,
            size,
            buffer: RequestBuffer::External { ptr, len },
            raw_block_refs: Vec::new(),
            compressed_block_refs: Vec::new(),
            unfinished_reads: 0,
            priority,
            failed: false,
        }
    }
}
