//! The "stored" method: no compression, a straight copy.

use super::{CompressionError, CompressionResult, DecompressionError, DecompressionResult};

pub fn max_alloc_for_compress_size(source_length: usize) -> usize {
    source_length
}

pub fn compress(source: &[u8], destination: &mut [u8]) -> CompressionResult {
    if destination.len() < source.len() {
        return Err(CompressionError::DestinationTooSmall);
    }
    destination[..source.len()].copy_from_slice(source);
    Ok(source.len())
}

pub fn decompress(source: &[u8], destination: &mut [u8]) -> DecompressionResult {
    if destination.len() < source.len() {
        return Err(DecompressionError::DestinationTooSmall);
    }
    destination[..source.len()].copy_from_slice(source);
    Ok(source.len())
}
