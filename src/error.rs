//! The crate-wide error taxonomy.
//!
//! `ErrorCode` is the terminal state carried by a [`crate::dispatcher::Request`]
//! and returned from fallible entry points on [`crate::api::Dispatcher`]. It is
//! deliberately flat (matching the taxonomy of the system this crate serves)
//! rather than a tree of per-module error types, since callers branch on it by
//! variant, not by source chain.

use crate::chunk_id::ChunkId;
use std::path::PathBuf;

/// Terminal outcome of a request, or of a fallible top-level operation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ErrorCode {
    #[error("unknown error")]
    Unknown,

    #[error("invalid error code")]
    InvalidCode,

    #[error("request was cancelled")]
    Cancelled,

    #[error("failed to open file: {path}")]
    FileOpenFailed { path: PathBuf },

    #[error("file is not open")]
    FileNotOpen,

    #[error("read error")]
    ReadError,

    #[error("write error")]
    WriteError,

    #[error("chunk not found: {chunk_id:?}")]
    NotFound { chunk_id: ChunkId },

    #[error("corrupt table of contents: {reason}")]
    CorruptToc { reason: String },

    #[error("unknown chunk id: {chunk_id:?}")]
    UnknownChunkId { chunk_id: ChunkId },

    #[error("unknown request")]
    UnknownRequest,

    #[error("invalid parameter: {reason}")]
    InvalidParameter { reason: String },

    #[error("signature mismatch in container {container}, block {block_index}")]
    SignatureError {
        container: String,
        block_index: u32,
    },

    #[error("invalid encryption key for container {container}")]
    InvalidEncryptionKey { container: String },

    #[error("compression failed")]
    CompressionFailed,
}

impl PartialEq for ErrorCode {
    /// Equality by variant only; contextual fields are for diagnostics, not matching.
    fn eq(&self, other: &Self) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}
impl Eq for ErrorCode {}

impl From<std::io::Error> for ErrorCode {
    fn from(_: std::io::Error) -> Self {
        ErrorCode::ReadError
    }
}

pub type Result<T> = std::result::Result<T, ErrorCode>;
