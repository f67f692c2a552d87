//! Zstandard, via the high-level `zstd` crate (no raw FFI).

use super::{CompressionError, CompressionResult, DecompressionError, DecompressionResult};

pub fn max_alloc_for_compress_size(source_length: usize) -> usize {
    zstd::bulk::compress_bound(source_length)
}

pub fn compress(
    level: i32,
    source: &[u8],
    destination: &mut [u8],
    used_copy: &mut bool,
) -> CompressionResult {
    *used_copy = false;
    let compressed = zstd::bulk::compress(source, level)
        .map_err(|e| CompressionError::Failed(e.to_string()))?;

    if compressed.len() >= source.len() {
        *used_copy = true;
        return super::copy::compress(source, destination);
    }

    if destination.len() < compressed.len() {
        return Err(CompressionError::DestinationTooSmall);
    }
    destination[..compressed.len()].copy_from_slice(&compressed);
    Ok(compressed.len())
}

pub fn decompress(source: &[u8], destination: &mut [u8]) -> DecompressionResult {
    let mut decoder =
        zstd::bulk::Decompressor::new().map_err(|e| DecompressionError::Failed(e.to_string()))?;
    let written = decoder
        .decompress_to_buffer(source, destination)
        .map_err(|e| DecompressionError::Failed(e.to_string()))?;
    Ok(written)
}
