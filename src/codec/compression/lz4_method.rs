//! LZ4 (high-compression variant for writing; fast decode for reading), via `lzzzz`.

use super::{CompressionError, CompressionResult, DecompressionError, DecompressionResult};

pub fn max_alloc_for_compress_size(source_length: usize) -> usize {
    lzzzz::lz4::max_compressed_size(source_length)
}

pub fn compress(
    level: i32,
    source: &[u8],
    destination: &mut [u8],
    used_copy: &mut bool,
) -> CompressionResult {
    *used_copy = false;

    let bytes = lzzzz::lz4_hc::compress(source, destination, level)
        .map_err(|_| CompressionError::Failed("lz4 compression failed".to_string()))?;

    if bytes > source.len() {
        *used_copy = true;
        return super::copy::compress(source, destination);
    }

    Ok(bytes)
}

pub fn decompress(source: &[u8], destination: &mut [u8]) -> DecompressionResult {
    lzzzz::lz4::decompress(source, destination)
        .map_err(|_| DecompressionError::Failed("lz4 decompression failed".to_string()))
}
