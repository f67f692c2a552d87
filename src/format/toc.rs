//! The in-memory table of contents: parallel arrays plus an O(1) lookup map.

use crate::chunk_id::ChunkId;
use crate::error::{ErrorCode, Result};
use hashbrown::HashMap;
use std::io::{Read, Write};

use super::chunk_meta::ChunkMeta;
use super::compressed_block::CompressedBlockEntry;
use super::directory_index::DirectoryIndex;
use super::header::TocHeader;
use super::method_names::MethodNameTable;
use super::offset_length::ChunkOffsetLength;
use super::signatures::SignaturesBlock;

/// The on-disk layout order, per §4.2:
/// `Header | ChunkIds | OffsetLengths | CompressionBlocks | MethodNames
///  | [Signatures] | [DirectoryIndex] | ChunkMetas`.
#[derive(Debug, Clone)]
pub struct Toc {
    pub header: TocHeader,
    pub chunk_ids: Vec<ChunkId>,
    pub offset_lengths: Vec<ChunkOffsetLength>,
    pub compression_blocks: Vec<CompressedBlockEntry>,
    pub method_names: MethodNameTable,
    pub signatures: Option<SignaturesBlock>,
    pub directory_index: Option<DirectoryIndex>,
    pub chunk_metas: Vec<ChunkMeta>,
    /// Built once after load/build; not itself serialized (reconstructed from `chunk_ids`).
    id_to_entry: HashMap<ChunkId, u32>,
}

impl Toc {
    pub fn new(header: TocHeader) -> Self {
        Toc {
            header,
            chunk_ids: Vec::new(),
            offset_lengths: Vec::new(),
            compression_blocks: Vec::new(),
            method_names: MethodNameTable::new(),
            signatures: None,
            directory_index: None,
            chunk_metas: Vec::new(),
            id_to_entry: HashMap::new(),
        }
    }

    /// Rebuilds the `chunk_id -> entry index` lookup map. Must be called
    /// after loading or after appending entries during a build.
    pub fn rebuild_index(&mut self) {
        self.id_to_entry.clear();
        self.id_to_entry.reserve(self.chunk_ids.len());
        for (i, id) in self.chunk_ids.iter().enumerate() {
            self.id_to_entry.insert(*id, i as u32);
        }
    }

    pub fn entry_index_of(&self, id: ChunkId) -> Option<u32> {
        self.id_to_entry.get(&id).copied()
    }

    pub fn does_chunk_exist(&self, id: ChunkId) -> bool {
        self.entry_index_of(id).is_some()
    }

    pub fn resolve(&self, id: ChunkId) -> Option<ChunkOffsetLength> {
        let index = self.entry_index_of(id)?;
        self.offset_lengths.get(index as usize).copied()
    }

    pub fn get_size(&self, id: ChunkId) -> Option<u64> {
        self.resolve(id).map(|ol| ol.length)
    }

    pub fn write<W: Write>(&self, writer: &mut W) -> Result<()> {
        self.header.write(writer).map_err(ErrorCode::from)?;
        for id in &self.chunk_ids {
            writer.write_all(id.as_bytes()).map_err(ErrorCode::from)?;
        }
        for ol in &self.offset_lengths {
            ol.write(writer).map_err(ErrorCode::from)?;
        }
        for cb in &self.compression_blocks {
            cb.write(writer).map_err(ErrorCode::from)?;
        }
        self.method_names.write(writer).map_err(ErrorCode::from)?;
        if self.header.container_flags.signed() {
            if let Some(sig) = &self.signatures {
                sig.write(writer).map_err(ErrorCode::from)?;
            }
        }
        if self.header.container_flags.indexed() {
            if let Some(dir) = &self.directory_index {
                writer.write_all(&dir.to_bytes()).map_err(ErrorCode::from)?;
            }
        }
        for meta in &self.chunk_metas {
            meta.write(writer).map_err(ErrorCode::from)?;
        }
        Ok(())
    }

    pub fn read<R: Read>(reader: &mut R) -> Result<Self> {
        let header = TocHeader::read(reader)?;

        let mut chunk_ids = Vec::with_capacity(header.entry_count as usize);
        for _ in 0..header.entry_count {
            let mut bytes = [0u8; 12];
            reader.read_exact(&mut bytes).map_err(ErrorCode::from)?;
            chunk_ids.push(ChunkId::from_bytes(bytes));
        }

        let mut offset_lengths = Vec::with_capacity(header.entry_count as usize);
        for _ in 0..header.entry_count {
            offset_lengths.push(ChunkOffsetLength::read(reader).map_err(ErrorCode::from)?);
        }

        let mut compression_blocks =
            Vec::with_capacity(header.compressed_block_entry_count as usize);
        for _ in 0..header.compressed_block_entry_count {
            compression_blocks.push(CompressedBlockEntry::read(reader).map_err(ErrorCode::from)?);
        }

        let method_names = MethodNameTable::read(
            reader,
            header.method_name_count,
            header.method_name_length,
        )?;

        let signatures = if header.container_flags.signed() {
            Some(SignaturesBlock::read(
                reader,
                header.compressed_block_entry_count,
            )?)
        } else {
            None
        };

        let directory_index = if header.container_flags.indexed() {
            let mut buf = vec![0u8; header.directory_index_size as usize];
            reader.read_exact(&mut buf).map_err(ErrorCode::from)?;
            Some(DirectoryIndex::from_bytes(&buf).map_err(ErrorCode::from)?)
        } else {
            None
        };

        let mut chunk_metas = Vec::with_capacity(header.entry_count as usize);
        for _ in 0..header.entry_count {
            chunk_metas.push(ChunkMeta::read(reader).map_err(ErrorCode::from)?);
        }

        let mut toc = Toc {
            header,
            chunk_ids,
            offset_lengths,
            compression_blocks,
            method_names,
            signatures,
            directory_index,
            chunk_metas,
            id_to_entry: HashMap::new(),
        };
        toc.rebuild_index();
        Ok(toc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::header::ContainerFlags;

    fn sample_id(byte: u8) -> ChunkId {
        let mut bytes = [0u8; 12];
        bytes[11] = byte;
        ChunkId::from_bytes(bytes)
    }

    #[test]
    fn lookup_is_o1_after_rebuild() {
        let mut toc = Toc::new(TocHeader::new(1, 65536, ContainerFlags::none()));
        toc.chunk_ids.push(sample_id(1));
        toc.chunk_ids.push(sample_id(2));
        toc.offset_lengths.push(ChunkOffsetLength {
            offset: 0,
            length: 10,
        });
        toc.offset_lengths.push(ChunkOffsetLength {
            offset: 10,
            length: 20,
        });
        toc.rebuild_index();

        assert!(toc.does_chunk_exist(sample_id(1)));
        assert_eq!(toc.get_size(sample_id(2)), Some(20));
        assert!(!toc.does_chunk_exist(sample_id(99)));
    }

    #[test]
    fn round_trips_unsigned_unindexed() {
        let mut toc = Toc::new(TocHeader::new(7, 65536, ContainerFlags::none()));
        toc.chunk_ids.push(sample_id(5));
        toc.offset_lengths.push(ChunkOffsetLength {
            offset: 0,
            length: 11,
        });
        toc.header.entry_count = 1;
        toc.chunk_metas.push(ChunkMeta {
            hash: [0u8; 20],
            flags: crate::format::chunk_meta::ChunkMetaFlags::none(),
        });
        toc.rebuild_index();

        let mut buf = Vec::new();
        toc.write(&mut buf).unwrap();
        let read_back = Toc::read(&mut &buf[..]).unwrap();

        assert_eq!(read_back.chunk_ids, toc.chunk_ids);
        assert_eq!(read_back.offset_lengths, toc.offset_lengths);
        assert!(read_back.does_chunk_exist(sample_id(5)));
    }
}
