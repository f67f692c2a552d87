//! The public write-side facade: a thin layer over
//! [`crate::builder::ContainerBuilder`] that uses the names §6 gives the
//! writer (`append`/`flush`) instead of the internal `add_entry`/`build`
//! pair the builder module itself exposes.

use std::path::Path;

use crate::builder::{
    BuildStats, ByteSource, ContainerBuilder, PackingSettings, WriteOptions, WriteRequest,
};
use crate::chunk_id::ChunkId;
use crate::error::Result;

/// Accumulates chunks and writes them out as one container. One store
/// produces one container; call [`Self::flush`] once every chunk has been
/// appended.
pub struct PackedChunkStore {
    builder: ContainerBuilder,
}

impl PackedChunkStore {
    pub fn new(settings: PackingSettings) -> Self {
        PackedChunkStore {
            builder: ContainerBuilder::new(settings),
        }
    }

    /// Opens a previous build as a patch source, so chunks whose id and
    /// content hash are unchanged keep their prior physical placement
    /// (§4.9's patch-layout mode).
    pub fn with_patch_source(mut self, path_prefix: &Path) -> Result<Self> {
        self.builder = self.builder.with_patch_source(path_prefix)?;
        Ok(self)
    }

    /// Queues `data` under `chunk_id` for the next [`Self::flush`].
    pub fn append(&mut self, chunk_id: ChunkId, data: Vec<u8>, options: WriteOptions) {
        let order_hint = self.builder.entry_count() as u64;
        self.append_request(chunk_id, Box::new(ByteSource::new(data, order_hint)), options);
    }

    /// Like [`Self::append`], for sources whose bytes aren't resident in
    /// memory up front (§4.9's `prepare_source`/`consume_source` handshake).
    pub fn append_request(
        &mut self,
        chunk_id: ChunkId,
        request: Box<dyn WriteRequest>,
        options: WriteOptions,
    ) {
        self.builder.add_entry(chunk_id, request, options);
    }

    pub fn entry_count(&self) -> usize {
        self.builder.entry_count()
    }

    /// Runs the build pipeline and writes `output_path_prefix.utoc` plus one
    /// or more `.ucas`/`_s{N}.ucas` partitions.
    pub fn flush(self, output_path_prefix: &Path) -> Result<BuildStats> {
        self.builder.build(output_path_prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::compression::CompressionMethod;
    use tempfile::tempdir;

    fn sample_id(byte: u8) -> ChunkId {
        let mut bytes = [0u8; 12];
        bytes[11] = byte;
        ChunkId::from_bytes(bytes)
    }

    #[test]
    fn append_and_flush_round_trips_through_the_facade() {
        let dir = tempdir().unwrap();
        let settings = PackingSettings {
            compression_method: CompressionMethod::Stored,
            ..PackingSettings::new(1)
        };
        let mut store = PackedChunkStore::new(settings);
        store.append(sample_id(1), b"hello from the writer facade".to_vec(), WriteOptions::new());
        assert_eq!(store.entry_count(), 1);

        let prefix = dir.path().join("facade_write");
        let stats = store.flush(&prefix).unwrap();
        assert_eq!(stats.entry_count, 1);
        assert!(prefix.with_extension("utoc").exists());
    }
}
