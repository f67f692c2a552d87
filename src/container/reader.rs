//! One mounted container: its TOC plus open handles to each partition file.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use memmap2::Mmap;

use crate::chunk_id::ChunkId;
use crate::codec::cipher::CipherKey;
use crate::error::{ErrorCode, Result};
use crate::format::{ChunkOffsetLength, Toc};

/// Options accepted by [`ContainerReader::open_mapped`]. Mirrors the shape of
/// a read-options struct so the same `InvalidParameter` rule (`target_va`
/// makes no sense for a mapping the caller doesn't own a buffer for) applies.
#[derive(Default)]
pub struct OpenMappedOptions {
    pub offset: u64,
    pub size: u64,
    pub target_va: Option<*mut u8>,
}

/// SAFETY: `target_va`, when set, is only ever inspected (never dereferenced)
/// by `open_mapped` before it is rejected with `InvalidParameter`.
unsafe impl Send for OpenMappedOptions {}

/// A memory-mapped view over a resolved chunk's bytes, backed by a lazily
/// created mapping of the partition file that contains it.
pub struct MappedRegion {
    mmap: Arc<Mmap>,
    offset: usize,
    len: usize,
}

impl MappedRegion {
    pub fn as_slice(&self) -> &[u8] {
        &self.mmap[self.offset..self.offset + self.len]
    }
}

struct Partition {
    path: PathBuf,
    file: Arc<File>,
    file_size: u64,
    /// Globally-unique index, namespacing block-cache keys across all mounts.
    file_index: u32,
    mmap: Mutex<Option<Arc<Mmap>>>,
}

/// Holds a TOC and open handles to each of its partitions. Produced by
/// [`ContainerReader::open`] and owned by the dispatcher's
/// [`crate::container::MountList`].
pub struct ContainerReader {
    toc: Toc,
    partitions: Vec<Partition>,
    short_name: String,
    encryption_key: Option<CipherKey>,
    /// `(order desc, index desc)` tiebreak fields; `index` is assigned at mount time.
    pub order: i32,
    pub mount_index: u64,
}

impl ContainerReader {
    /// Opens `<prefix>.utoc` and its `.ucas`/`_s{N}.ucas` partitions.
    /// `file_index_counter` hands out globally-unique partition file indices
    /// so block-cache keys never collide across containers.
    pub fn open(
        path_prefix: &Path,
        order: i32,
        mount_index: u64,
        file_index_counter: &AtomicU32,
    ) -> Result<Self> {
        let toc_path = with_suffix(path_prefix, "utoc");
        let toc_file = File::open(&toc_path).map_err(|_| ErrorCode::FileOpenFailed {
            path: toc_path.clone(),
        })?;
        let toc = Toc::read(&mut std::io::BufReader::new(toc_file))?;

        let partitioning = toc.header.partitioning();
        let mut partitions = Vec::with_capacity(partitioning.partition_count.max(1) as usize);
        if partitioning.partition_count == 0 {
            // Empty container: still open the primary `.ucas` if present so
            // `get_size`/`resolve` behave consistently, but tolerate absence.
        }
        let count = partitioning.partition_count.max(if toc.header.entry_count > 0 {
            1
        } else {
            0
        });
        for i in 0..count {
            let data_path = if i == 0 {
                with_suffix(path_prefix, "ucas")
            } else {
                with_suffix_indexed(path_prefix, i)
            };
            let file = File::open(&data_path).map_err(|_| ErrorCode::FileOpenFailed {
                path: data_path.clone(),
            })?;
            let file_size = file.metadata().map_err(ErrorCode::from)?.len();
            let file_index = file_index_counter.fetch_add(1, Ordering::Relaxed);
            partitions.push(Partition {
                path: data_path,
                file: Arc::new(file),
                file_size,
                file_index,
                mmap: Mutex::new(None),
            });
        }

        let short_name = path_prefix
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path_prefix.to_string_lossy().into_owned());

        Ok(ContainerReader {
            toc,
            partitions,
            short_name,
            encryption_key: None,
            order,
            mount_index,
        })
    }

    pub fn short_name(&self) -> &str {
        &self.short_name
    }

    pub fn container_id(&self) -> u64 {
        self.toc.header.container_id
    }

    pub fn toc(&self) -> &Toc {
        &self.toc
    }

    pub fn block_size(&self) -> u32 {
        self.toc.header.block_size
    }

    pub fn partition_size(&self) -> u64 {
        self.toc.header.partitioning().partition_size
    }

    pub fn partition_file_index(&self, partition: usize) -> Option<u32> {
        self.partitions.get(partition).map(|p| p.file_index)
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// Configures the symmetric key used to decrypt this container's blocks.
    /// Only meaningful when the container is `Encrypted`; the caller is
    /// expected to have already matched the key id against
    /// `toc().header.encryption_key_id` (mount rejects a mismatch).
    pub fn set_encryption_key(&mut self, key: CipherKey) -> Result<()> {
        if !self.toc.header.container_flags.encrypted() {
            return Ok(());
        }
        self.encryption_key = Some(key);
        Ok(())
    }

    pub fn encryption_key(&self) -> Option<&CipherKey> {
        self.encryption_key.as_ref()
    }

    pub fn requires_encryption_key(&self) -> bool {
        self.toc.header.container_flags.encrypted()
    }

    pub fn is_signed(&self) -> bool {
        self.toc.header.container_flags.signed()
    }

    /// Verifies the TOC-wide and blocks-wide RSA signatures against
    /// `public_key`, failing mount if either doesn't match. A container with
    /// no signatures block is trivially verified.
    pub fn verify_signatures(&self, public_key: &rsa::RsaPublicKey) -> Result<()> {
        if let Some(signatures) = &self.toc.signatures {
            let mut header_bytes = Vec::new();
            self.toc
                .header
                .write(&mut header_bytes)
                .map_err(ErrorCode::from)?;
            signatures.verify(&header_bytes, public_key, &self.short_name)?;
        }
        Ok(())
    }

    /// The per-block hash recorded in the signatures block, if this container
    /// is signed. Checked again at decode time as a cheap defense against
    /// corruption introduced after mount (§6 "signature corruption").
    pub fn expected_block_hash(&self, block_index: usize) -> Option<crate::codec::hash::Digest20> {
        self.toc
            .signatures
            .as_ref()
            .and_then(|s| s.block_hashes.get(block_index).copied())
    }

    pub fn does_chunk_exist(&self, id: ChunkId) -> bool {
        self.toc.does_chunk_exist(id)
    }

    pub fn get_size(&self, id: ChunkId) -> Option<u64> {
        self.toc.get_size(id)
    }

    pub fn resolve(&self, id: ChunkId) -> Option<ChunkOffsetLength> {
        self.toc.resolve(id)
    }

    /// Maps an absolute encoded offset (as stored in a `CompressedBlockEntry`)
    /// to `(partition_index, partition_relative_offset)`.
    pub fn locate_encoded_offset(&self, encoded_offset: u64) -> (usize, u64) {
        let partition_size = self.partition_size();
        if partition_size == u64::MAX {
            return (0, encoded_offset);
        }
        let partition_index = (encoded_offset / partition_size) as usize;
        let partition_relative = encoded_offset % partition_size;
        (partition_index, partition_relative)
    }

    pub fn partition_path(&self, partition: usize) -> Option<&Path> {
        self.partitions.get(partition).map(|p| p.path.as_path())
    }

    pub fn partition_file(&self, partition: usize) -> Option<Arc<File>> {
        self.partitions.get(partition).map(|p| p.file.clone())
    }

    pub fn partition_file_size(&self, partition: usize) -> Option<u64> {
        self.partitions.get(partition).map(|p| p.file_size)
    }

    /// Lazily opens (and caches) a memory-mapping for `partition`.
    fn mapped_partition(&self, partition: usize) -> Result<Arc<Mmap>> {
        let p = self
            .partitions
            .get(partition)
            .ok_or(ErrorCode::FileNotOpen)?;
        let mut guard = p.mmap.lock().unwrap();
        if let Some(mmap) = guard.as_ref() {
            return Ok(mmap.clone());
        }
        // SAFETY: the partition file is immutable for the lifetime of the
        // mount; nothing in this crate writes to mounted `.ucas` files.
        let mmap = Arc::new(unsafe { Mmap::map(&p.file) }.map_err(|_| ErrorCode::ReadError)?);
        *guard = Some(mmap.clone());
        Ok(mmap)
    }

    /// Opens a memory-mapped view of `id`'s resolved byte range.
    ///
    /// Only valid for chunks written with `is_memory_mapped` (stored,
    /// page-aligned blocks); mapping a compressed/encrypted chunk would
    /// expose the undecoded on-disk bytes, so this is a deliberately narrow
    /// facility matching the builder's `MemoryMapped` chunk-meta flag.
    pub fn open_mapped(&self, id: ChunkId, options: OpenMappedOptions) -> Result<MappedRegion> {
        if options.target_va.is_some() {
            return Err(ErrorCode::InvalidParameter {
                reason: "target_va is not meaningful for a memory-mapped read".to_string(),
            });
        }
        let resolved = self.resolve(id).ok_or(ErrorCode::NotFound { chunk_id: id })?;
        let offset = resolved.offset + options.offset;
        let size = if options.size == u64::MAX {
            resolved.length.saturating_sub(options.offset)
        } else {
            options.size
        };
        if options.offset + size > resolved.length {
            return Err(ErrorCode::InvalidParameter {
                reason: "offset+size exceeds chunk length".to_string(),
            });
        }

        let block_size = self.block_size() as u64;
        let block_index = (offset / block_size) as usize;
        let entry = self
            .toc
            .compression_blocks
            .get(block_index)
            .ok_or(ErrorCode::CorruptToc {
                reason: "chunk offset has no covering compression block".to_string(),
            })?;
        let (partition, _partition_relative) = self.locate_encoded_offset(entry.offset);

        let mmap = self.mapped_partition(partition)?;
        let partition_size = self.partition_file_size(partition).unwrap_or(0);
        if offset + size > partition_size {
            return Err(ErrorCode::CorruptToc {
                reason: "mapped range exceeds partition file size".to_string(),
            });
        }

        Ok(MappedRegion {
            mmap,
            offset: offset as usize,
            len: size as usize,
        })
    }
}

fn with_suffix(prefix: &Path, ext: &str) -> PathBuf {
    let mut s = prefix.as_os_str().to_os_string();
    s.push(".");
    s.push(ext);
    PathBuf::from(s)
}

fn with_suffix_indexed(prefix: &Path, index: u32) -> PathBuf {
    let mut s = prefix.as_os_str().to_os_string();
    s.push(format!("_s{index}."));
    s.push("ucas");
    PathBuf::from(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::header::{ContainerFlags, TocHeader};
    use std::io::Write;
    use std::sync::atomic::AtomicU32;
    use tempfile::tempdir;

    fn write_minimal_container(dir: &Path, prefix: &str, chunk: ChunkId, bytes: &[u8]) -> PathBuf {
        let mut header = TocHeader::new(1, 65536, ContainerFlags::none());
        let mut toc = crate::format::Toc::new(header.clone());
        toc.chunk_ids.push(chunk);
        toc.offset_lengths.push(ChunkOffsetLength {
            offset: 0,
            length: bytes.len() as u64,
        });
        toc.compression_blocks.push(crate::format::CompressedBlockEntry {
            offset: 0,
            compressed_size: bytes.len() as u32,
            uncompressed_size: bytes.len() as u32,
            method_index: 0,
        });
        toc.chunk_metas.push(crate::format::ChunkMeta {
            hash: crate::codec::hash::hash(bytes),
            flags: crate::format::chunk_meta::ChunkMetaFlags::none(),
        });
        header.entry_count = 1;
        header.compressed_block_entry_count = 1;
        toc.header = header;
        toc.rebuild_index();

        let prefix_path = dir.join(prefix);
        let toc_path = with_suffix(&prefix_path, "utoc");
        let mut toc_file = File::create(&toc_path).unwrap();
        toc.write(&mut toc_file).unwrap();

        let ucas_path = with_suffix(&prefix_path, "ucas");
        let mut ucas_file = File::create(&ucas_path).unwrap();
        ucas_file.write_all(bytes).unwrap();

        prefix_path
    }

    #[test]
    fn opens_and_resolves_a_single_chunk_container() {
        let dir = tempdir().unwrap();
        let mut id_bytes = [0u8; 12];
        id_bytes[11] = 1;
        let id = ChunkId::from_bytes(id_bytes);
        let prefix = write_minimal_container(dir.path(), "test", id, b"hello world");

        let counter = AtomicU32::new(0);
        let reader = ContainerReader::open(&prefix, 0, 0, &counter).unwrap();
        assert!(reader.does_chunk_exist(id));
        assert_eq!(reader.get_size(id), Some(11));
        assert_eq!(reader.resolve(id).unwrap().offset, 0);
    }

    #[test]
    fn missing_toc_fails_open() {
        let dir = tempdir().unwrap();
        let counter = AtomicU32::new(0);
        let result = ContainerReader::open(&dir.path().join("nope"), 0, 0, &counter);
        assert!(result.is_err());
    }
}
