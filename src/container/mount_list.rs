//! The ordered list of mounted containers the dispatcher resolves against.

use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicU64};
use std::sync::atomic::Ordering as AtomicOrdering;
use std::sync::RwLock;

use crate::chunk_id::ChunkId;
use crate::codec::cipher::CipherKey;
use crate::container::reader::ContainerReader;
use crate::error::{ErrorCode, Result};
use crate::format::ChunkOffsetLength;

/// Mount/unmount take the list's exclusive lock; resolution takes the shared
/// lock, matching §5's "mount list: reader-writer lock, mount/unmount
/// exclusive, reads shared".
pub struct MountList {
    containers: RwLock<Vec<ContainerReader>>,
    next_mount_index: AtomicU64,
    next_file_index: AtomicU32,
}

impl MountList {
    pub fn new() -> Self {
        MountList {
            containers: RwLock::new(Vec::new()),
            next_mount_index: AtomicU64::new(0),
            next_file_index: AtomicU32::new(0),
        }
    }

    /// Opens and inserts a container at the correct sorted position
    /// (`order desc, index desc`). Returns its `ContainerId`.
    pub fn mount(
        &self,
        path_prefix: &Path,
        order: i32,
        key_id: Option<[u8; 16]>,
        key: Option<CipherKey>,
        signing_public_key: Option<&rsa::RsaPublicKey>,
    ) -> Result<u64> {
        let mount_index = self.next_mount_index.fetch_add(1, AtomicOrdering::Relaxed);
        let mut reader = ContainerReader::open(path_prefix, order, mount_index, &self.next_file_index)?;

        if reader.requires_encryption_key() {
            let supplied_id = key_id.ok_or_else(|| ErrorCode::InvalidEncryptionKey {
                container: reader.short_name().to_string(),
            })?;
            if supplied_id != reader.toc().header.encryption_key_id {
                return Err(ErrorCode::InvalidEncryptionKey {
                    container: reader.short_name().to_string(),
                });
            }
            let key = key.ok_or_else(|| ErrorCode::InvalidEncryptionKey {
                container: reader.short_name().to_string(),
            })?;
            reader.set_encryption_key(key)?;
        }

        if reader.is_signed() {
            if let Some(public_key) = signing_public_key {
                reader.verify_signatures(public_key)?;
            }
        }

        let container_id = reader.container_id();
        let mut containers = self.containers.write().unwrap();
        let pos = containers
            .binary_search_by(|existing| {
                (reader.order, reader.mount_index).cmp(&(existing.order, existing.mount_index))
            })
            .unwrap_or_else(|e| e);
        containers.insert(pos, reader);
        Ok(container_id)
    }

    /// Removes the container identified by `container_id`, if mounted.
    pub fn unmount(&self, container_id: u64) -> bool {
        let mut containers = self.containers.write().unwrap();
        if let Some(pos) = containers.iter().position(|r| r.container_id() == container_id) {
            containers.remove(pos);
            true
        } else {
            false
        }
    }

    pub fn mount_count(&self) -> usize {
        self.containers.read().unwrap().len()
    }

    pub fn does_chunk_exist(&self, id: ChunkId) -> bool {
        let containers = self.containers.read().unwrap();
        containers.iter().any(|r| r.does_chunk_exist(id))
    }

    pub fn get_size(&self, id: ChunkId) -> Result<u64> {
        let containers = self.containers.read().unwrap();
        containers
            .iter()
            .find_map(|r| r.get_size(id))
            .ok_or(ErrorCode::NotFound { chunk_id: id })
    }

    /// Resolves `id` against the ordered reader list (first match wins),
    /// running `with_reader` under the shared lock.
    pub fn resolve_with<R>(
        &self,
        id: ChunkId,
        with_reader: impl FnOnce(&ContainerReader, ChunkOffsetLength) -> R,
    ) -> Option<R> {
        let containers = self.containers.read().unwrap();
        for reader in containers.iter() {
            if let Some(ol) = reader.resolve(id) {
                return Some(with_reader(reader, ol));
            }
        }
        None
    }

    /// Runs `f` with shared read access to the ordered reader list, e.g. for
    /// `open_mapped` or diagnostics that need more than one lookup.
    pub fn with_readers<R>(&self, f: impl FnOnce(&[ContainerReader]) -> R) -> R {
        let containers = self.containers.read().unwrap();
        f(&containers)
    }
}

impl Default for MountList {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_list_resolves_nothing() {
        let list = MountList::new();
        let mut id_bytes = [0u8; 12];
        id_bytes[0] = 1;
        let id = ChunkId::from_bytes(id_bytes);
        assert!(!list.does_chunk_exist(id));
        assert!(list.get_size(id).is_err());
    }
}
