//! Symmetric block-cipher stage.
//!
//! Each compressed block is encrypted independently as a single CBC-style
//! unit, so there is no running IV to carry between calls; we derive a fixed
//! per-call IV of all zero bytes. The buffer's length must already be a
//! multiple of [`CIPHER_BLOCK_SIZE`] — callers pad up to that alignment by
//! repeating the pre-padding bytes cyclically rather than with a
//! PKCS-style marker, so the raw size on disk never needs a separate length
//! record.

use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::{Aes256, Block};

/// AES operates on 16-byte blocks; this is also the on-disk raw-size alignment.
pub const CIPHER_BLOCK_SIZE: usize = 16;

/// A 256-bit symmetric key.
pub type CipherKey = [u8; 32];

const ZERO_IV: [u8; CIPHER_BLOCK_SIZE] = [0u8; CIPHER_BLOCK_SIZE];

/// Pads `data` up to a multiple of [`CIPHER_BLOCK_SIZE`] by repeating the
/// existing bytes cyclically. Returns the padded length.
pub fn pad_cyclic(data: &mut Vec<u8>) {
    let original_len = data.len();
    if original_len == 0 {
        data.resize(CIPHER_BLOCK_SIZE, 0);
        return;
    }
    let padded_len = align_up(original_len, CIPHER_BLOCK_SIZE);
    data.reserve(padded_len - original_len);
    for i in original_len..padded_len {
        data.push(data[i % original_len]);
    }
}

pub fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) / align * align
}

/// Encrypts `bytes` in place (CBC chaining, zero IV). `bytes.len()` must be a
/// multiple of [`CIPHER_BLOCK_SIZE`].
pub fn encrypt_in_place(bytes: &mut [u8], key: &CipherKey) {
    debug_assert_eq!(bytes.len() % CIPHER_BLOCK_SIZE, 0);
    let cipher = Aes256::new(key.into());
    let mut prev: Block = ZERO_IV.into();
    for chunk in bytes.chunks_mut(CIPHER_BLOCK_SIZE) {
        for (b, p) in chunk.iter_mut().zip(prev.iter()) {
            *b ^= p;
        }
        let block = Block::from_mut_slice(chunk);
        cipher.encrypt_block(block);
        prev = *block;
    }
}

/// Decrypts `bytes` in place (CBC chaining, zero IV). `bytes.len()` must be a
/// multiple of [`CIPHER_BLOCK_SIZE`].
pub fn decrypt_in_place(bytes: &mut [u8], key: &CipherKey) {
    debug_assert_eq!(bytes.len() % CIPHER_BLOCK_SIZE, 0);
    let cipher = Aes256::new(key.into());
    let mut prev: Block = ZERO_IV.into();
    for chunk in bytes.chunks_mut(CIPHER_BLOCK_SIZE) {
        let ciphertext = Block::clone_from_slice(chunk);
        let block = Block::from_mut_slice(chunk);
        cipher.decrypt_block(block);
        for (b, p) in block.iter_mut().zip(prev.iter()) {
            *b ^= p;
        }
        prev = ciphertext;
    }
}
