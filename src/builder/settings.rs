//! Container-build configuration: block sizing, partition/alignment rules,
//! compression, and the optional encryption/signing keys (§4.9, §B.3).

use rsa::RsaPrivateKey;

use crate::codec::cipher::{CipherKey, CIPHER_BLOCK_SIZE};
use crate::codec::compression::CompressionMethod;
use crate::utilities::system_info::get_num_cores;

/// Default in-flight memory budget for the compress stage (§4.9).
pub const DEFAULT_COMPRESS_MEMORY_BUDGET: u64 = 10 * 1024 * 1024 * 1024;

#[derive(Clone)]
pub struct PackingSettings {
    /// The container's stable id, written into the TOC header.
    pub container_id: u64,
    /// Every entry is split into chunks of this size before compression.
    /// Also the logical addressing granularity read requests key
    /// `CompressedBlockEntry` lookups by (reader's `block_size`).
    pub block_size: u32,
    /// Block-cipher alignment; fixed at [`CIPHER_BLOCK_SIZE`] for the AES-256
    /// stage this builder pairs with, kept as an explicit field rather than
    /// a bare constant so a future cipher swap only touches this struct.
    pub cipher_block_size: usize,
    /// Partition rollover threshold in bytes.
    pub max_partition_size: u64,
    /// Alignment applied to a memory-mapped entry's start offset.
    pub memory_mapping_alignment: u64,
    /// Alignment applied to every entry's physical start offset, mirroring
    /// the logical per-entry block-size alignment on the read side.
    pub compression_block_alignment: u64,
    pub compression_method: CompressionMethod,
    pub compression_level: i32,
    /// Bytes of consumed-but-not-yet-compressed entry data the compress
    /// stage may hold in flight at once before blocking new hash-stage work.
    pub compress_stage_memory_budget: u64,
    pub encryption_key: Option<CipherKey>,
    pub encryption_key_id: [u8; 16],
    pub signing_key: Option<RsaPrivateKey>,
    /// Whether to append a directory index mapping file names to TOC entries.
    pub is_indexed: bool,
    /// Worker count for the hash/compress stage's thread pool.
    pub worker_count: usize,
}

impl PackingSettings {
    pub fn new(container_id: u64) -> Self {
        PackingSettings {
            container_id,
            ..Default::default()
        }
    }

    pub fn is_encrypted(&self) -> bool {
        self.encryption_key.is_some()
    }

    pub fn is_signed(&self) -> bool {
        self.signing_key.is_some()
    }
}

impl Default for PackingSettings {
    fn default() -> Self {
        let cores = get_num_cores().get() as usize;
        PackingSettings {
            container_id: 0,
            block_size: 256 * 1024,
            cipher_block_size: CIPHER_BLOCK_SIZE,
            max_partition_size: 2 * 1024 * 1024 * 1024,
            memory_mapping_alignment: 4096,
            compression_block_alignment: 64,
            compression_method: default_compression_method(),
            compression_level: 0,
            compress_stage_memory_budget: DEFAULT_COMPRESS_MEMORY_BUDGET,
            encryption_key: None,
            encryption_key_id: [0u8; 16],
            signing_key: None,
            is_indexed: false,
            worker_count: cores.max(1),
        }
    }
}

fn default_compression_method() -> CompressionMethod {
    #[cfg(feature = "zstd")]
    {
        CompressionMethod::Zstd
    }
    #[cfg(not(feature = "zstd"))]
    {
        CompressionMethod::Stored
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_are_unencrypted_and_unsigned() {
        let settings = PackingSettings::default();
        assert!(!settings.is_encrypted());
        assert!(!settings.is_signed());
    }

    #[test]
    fn new_sets_the_container_id() {
        let settings = PackingSettings::new(99);
        assert_eq!(settings.container_id, 99);
    }
}
