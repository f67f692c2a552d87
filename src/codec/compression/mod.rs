//! Compression dispatch over the named on-disk methods.
//!
//! Generalizes the teacher's `utilities::compression` module: the method set
//! is a tagged variant with an `Unknown(name)` fallback (see design note on
//! dynamic compression-method dispatch) rather than a closed enum, so a TOC
//! written with a method this build doesn't recognize can still be opened —
//! it just can't be decoded.

pub mod copy;

#[cfg(feature = "zstd")]
pub mod zstd_method;

#[cfg(feature = "lz4")]
pub mod lz4_method;

use std::fmt;

/// A compression method, identified by name in the on-disk method table.
/// Index 0 is always implicitly [`CompressionMethod::Stored`] ("none") and is
/// never written to the name table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CompressionMethod {
    Stored,
    #[cfg(feature = "zstd")]
    Zstd,
    #[cfg(feature = "lz4")]
    Lz4,
    /// A method named in the TOC that this build doesn't recognize. Mounting
    /// succeeds; decoding a block that uses it fails with
    /// [`DecompressionError::UnknownMethod`].
    Unknown(String),
}

impl CompressionMethod {
    pub fn name(&self) -> &str {
        match self {
            CompressionMethod::Stored => "none",
            #[cfg(feature = "zstd")]
            CompressionMethod::Zstd => "zstd",
            #[cfg(feature = "lz4")]
            CompressionMethod::Lz4 => "lz4",
            CompressionMethod::Unknown(name) => name,
        }
    }

    pub fn from_name(name: &str) -> CompressionMethod {
        match name {
            "none" => CompressionMethod::Stored,
            #[cfg(feature = "zstd")]
            "zstd" => CompressionMethod::Zstd,
            #[cfg(feature = "lz4")]
            "lz4" => CompressionMethod::Lz4,
            other => CompressionMethod::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for CompressionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Determines the maximum buffer size needed to compress `source_length`
/// bytes with any enabled method (used to size scratch buffers up-front).
pub fn max_alloc_for_compress_size(source_length: usize) -> usize {
    let mut max_size = copy::max_alloc_for_compress_size(source_length);
    #[cfg(feature = "lz4")]
    {
        max_size = lz4_method::max_alloc_for_compress_size(source_length).max(max_size);
    }
    #[cfg(feature = "zstd")]
    {
        max_size = zstd_method::max_alloc_for_compress_size(source_length).max(max_size);
    }
    max_size
}

/// Compression always succeeds: if the method can't shrink the data below
/// `source.len()`, the caller should fall back to [`CompressionMethod::Stored`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompressionError {
    DestinationTooSmall,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecompressionError {
    DestinationTooSmall,
    Failed(String),
    UnknownMethod(String),
}

pub type CompressionResult = Result<usize, CompressionError>;
pub type DecompressionResult = Result<usize, DecompressionError>;

/// Compresses `source` into `destination` using `method`, recording whether a
/// fallback to the stored (uncompressed) representation occurred.
///
/// Per the block-codec contract, compression always succeeds: callers that
/// get `used_copy = true` back should record method "none" for this block.
pub fn compress(
    method: &CompressionMethod,
    level: i32,
    source: &[u8],
    destination: &mut [u8],
    used_copy: &mut bool,
) -> CompressionResult {
    *used_copy = false;
    match method {
        CompressionMethod::Stored => {
            *used_copy = true;
            copy::compress(source, destination)
        }
        #[cfg(feature = "zstd")]
        CompressionMethod::Zstd => zstd_method::compress(level, source, destination, used_copy),
        #[cfg(feature = "lz4")]
        CompressionMethod::Lz4 => lz4_method::compress(level, source, destination, used_copy),
        CompressionMethod::Unknown(name) => {
            Err(CompressionError::Failed(format!("cannot compress with unknown method {name}")))
        }
    }
}

/// Decompresses `source` (compressed with `method`) fully into `destination`.
pub fn decompress(
    method: &CompressionMethod,
    source: &[u8],
    destination: &mut [u8],
) -> DecompressionResult {
    match method {
        CompressionMethod::Stored => copy::decompress(source, destination),
        #[cfg(feature = "zstd")]
        CompressionMethod::Zstd => zstd_method::decompress(source, destination),
        #[cfg(feature = "lz4")]
        CompressionMethod::Lz4 => lz4_method::decompress(source, destination),
        CompressionMethod::Unknown(name) => {
            Err(DecompressionError::UnknownMethod(name.clone()))
        }
    }
}
