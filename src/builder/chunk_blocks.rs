//! Per-block encode: split an entry's uncompressed bytes into `block_size`
//! spans and, for each, compress (with store-fallback), pad to the cipher
//! alignment, optionally encrypt, and optionally hash for the signatures
//! block ("CreateChunkBlocks", §4.9).
//!
//! Pure, no I/O — the write-side counterpart of [`crate::dispatcher::decode_stage`].

use crate::codec::cipher::{self, CipherKey};
use crate::codec::compression::{self, CompressionMethod};
use crate::codec::hash::{self, Digest20};

/// One produced on-disk block, positioned within its entry's physical byte
/// stream (the concatenation of every block's padded bytes, in order).
#[derive(Debug, Clone)]
pub struct BlockInfo {
    /// Byte offset of this block's padded bytes within the entry's physical
    /// stream (i.e. the running sum of prior blocks' `raw_size`).
    pub physical_offset: u64,
    /// Padded size actually occupying disk space; a multiple of the cipher
    /// block size.
    pub raw_size: u32,
    /// Size of the compressed (or stored) payload before cyclic padding —
    /// also the span the signature and the decode stage's decompressor cover.
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub method: CompressionMethod,
    /// `hash(padded_bytes[..compressed_size])`, computed after encryption so
    /// it matches exactly what [`crate::dispatcher::decode_stage::run`]
    /// rehashes on the read side. `None` unless the container is signed.
    pub signature: Option<Digest20>,
}

/// The blocks produced for one entry, plus their concatenated on-disk bytes.
pub struct ChunkBlocks {
    pub blocks: Vec<BlockInfo>,
    /// Concatenation of every block's padded (and, if encrypted, ciphertext)
    /// bytes, in order. Length equals the sum of `raw_size` across `blocks`.
    pub encoded: Vec<u8>,
}

#[allow(clippy::too_many_arguments)]
pub fn create_chunk_blocks(
    data: &[u8],
    block_size: u32,
    cipher_block_size: usize,
    compression_method: &CompressionMethod,
    compression_level: i32,
    force_uncompressed: bool,
    encryption_key: Option<&CipherKey>,
    sign_blocks: bool,
) -> ChunkBlocks {
    let block_size = block_size.max(1) as usize;
    let mut blocks = Vec::with_capacity(data.len().div_ceil(block_size).max(1));
    let mut encoded = Vec::new();

    for chunk in data.chunks(block_size) {
        let uncompressed_size = chunk.len() as u32;

        let (method, mut payload) = if force_uncompressed || matches!(compression_method, CompressionMethod::Stored) {
            (CompressionMethod::Stored, chunk.to_vec())
        } else {
            let mut scratch = vec![0u8; compression::max_alloc_for_compress_size(chunk.len())];
            let mut used_copy = false;
            match compression::compress(compression_method, compression_level, chunk, &mut scratch, &mut used_copy) {
                Ok(written) if !used_copy && written < chunk.len() => {
                    scratch.truncate(written);
                    (compression_method.clone(), scratch)
                }
                // Either the method reported it used the stored fallback, or
                // the compressed result didn't beat the uncompressed size
                // (§4.1 "the builder records method none and stores the
                // uncompressed bytes instead").
                _ => (CompressionMethod::Stored, chunk.to_vec()),
            }
        };

        let compressed_size = payload.len() as u32;
        cipher::pad_cyclic(&mut payload);
        debug_assert_eq!(payload.len() % cipher_block_size, 0);

        if let Some(key) = encryption_key {
            cipher::encrypt_in_place(&mut payload, key);
        }

        let signature = sign_blocks.then(|| hash::hash(&payload[..compressed_size as usize]));

        let physical_offset = encoded.len() as u64;
        let raw_size = payload.len() as u32;
        encoded.extend_from_slice(&payload);
        blocks.push(BlockInfo {
            physical_offset,
            raw_size,
            compressed_size,
            uncompressed_size,
            method,
            signature,
        });
    }

    ChunkBlocks { blocks, encoded }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_entry_produces_no_blocks() {
        let result = create_chunk_blocks(&[], 16, cipher::CIPHER_BLOCK_SIZE, &CompressionMethod::Stored, 0, false, None, false);
        assert!(result.blocks.is_empty());
        assert!(result.encoded.is_empty());
    }

    #[test]
    fn splits_into_block_size_spans() {
        let data = vec![7u8; 40];
        let result = create_chunk_blocks(&data, 16, cipher::CIPHER_BLOCK_SIZE, &CompressionMethod::Stored, 0, false, None, false);
        assert_eq!(result.blocks.len(), 3);
        assert_eq!(result.blocks[0].uncompressed_size, 16);
        assert_eq!(result.blocks[2].uncompressed_size, 8);
    }

    #[test]
    fn raw_size_is_cipher_aligned() {
        let data = vec![1u8, 2, 3];
        let result = create_chunk_blocks(&data, 16, cipher::CIPHER_BLOCK_SIZE, &CompressionMethod::Stored, 0, false, None, false);
        assert_eq!(result.blocks[0].raw_size as usize % cipher::CIPHER_BLOCK_SIZE, 0);
        assert_eq!(result.encoded.len(), result.blocks[0].raw_size as usize);
    }

    #[test]
    fn incompressible_data_falls_back_to_stored() {
        // Tiny, already-random-looking input: compressed size can't beat it.
        let data = vec![0xDEu8, 0xAD, 0xBE, 0xEF];
        let result = create_chunk_blocks(&data, 16, cipher::CIPHER_BLOCK_SIZE, &CompressionMethod::Stored, 0, false, None, false);
        assert_eq!(result.blocks[0].method, CompressionMethod::Stored);
        assert_eq!(result.blocks[0].compressed_size, 4);
    }

    #[test]
    fn signature_is_computed_after_encryption() {
        let key: CipherKey = [9u8; 32];
        let data = vec![5u8; 20];
        let with_key = create_chunk_blocks(&data, 16, cipher::CIPHER_BLOCK_SIZE, &CompressionMethod::Stored, 0, false, Some(&key), true);
        let without_key = create_chunk_blocks(&data, 16, cipher::CIPHER_BLOCK_SIZE, &CompressionMethod::Stored, 0, false, None, true);
        assert_ne!(with_key.blocks[0].signature, without_key.blocks[0].signature);
    }

    #[test]
    fn encrypted_block_round_trips_through_decrypt() {
        let key: CipherKey = [3u8; 32];
        let data = b"round trip me please".to_vec();
        let result = create_chunk_blocks(&data, 256, cipher::CIPHER_BLOCK_SIZE, &CompressionMethod::Stored, 0, false, Some(&key), false);
        let block = &result.blocks[0];
        let mut bytes = result.encoded[..block.raw_size as usize].to_vec();
        cipher::decrypt_in_place(&mut bytes, &key);
        bytes.truncate(block.compressed_size as usize);
        assert_eq!(bytes, data);
    }
}
