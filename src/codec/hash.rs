//! Fixed-size digests used for whole-chunk integrity and per-block signatures.

use sha1::{Digest, Sha1};

/// Size in bytes of a [`hash`] digest.
pub const DIGEST_SIZE: usize = 20;

/// A 20-byte digest, byte-comparable and directly serializable to the TOC's
/// `ChunkMeta`/`SignaturesBlock` layouts.
pub type Digest20 = [u8; DIGEST_SIZE];

/// Hashes `bytes`, returning a fixed-size digest.
///
/// Used both for whole-chunk content hashes (`ChunkMeta`) and per-block
/// signatures (`SignaturesBlock`); the same primitive serves both because the
/// source format does too.
pub fn hash(bytes: &[u8]) -> Digest20 {
    let mut hasher = Sha1::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic() {
        assert_eq!(hash(b"hello world"), hash(b"hello world"));
    }

    #[test]
    fn hash_differs_for_different_input() {
        assert_ne!(hash(b"hello"), hash(b"world"));
    }

    #[test]
    fn empty_input_hashes_to_known_sha1() {
        // SHA1("") — a fixed vector, useful as a canary for digest byte order.
        let expected: Digest20 = [
            0xda, 0x39, 0xa3, 0xee, 0x5e, 0x6b, 0x4b, 0x0d, 0x32, 0x55, 0xbf, 0xef, 0x95, 0x60,
            0x18, 0x90, 0xaf, 0xd8, 0x07, 0x09,
        ];
        assert_eq!(hash(b""), expected);
    }
}
