//! The public container-build entry point: collects pending entries, runs
//! them through the hash/compress stage on a worker pool, finalizes physical
//! layout, and writes the `.utoc`/`.ucas`(`_s{N}.ucas`) files (§4.9).

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicU32;
use std::sync::Mutex;

use crossbeam_channel::unbounded;
use log::info;

use crate::chunk_id::ChunkId;
use crate::codec::hash::{self, Digest20};
use crate::container::ContainerReader;
use crate::error::{ErrorCode, Result};
use crate::format::header::ContainerFlags;
use crate::format::{
    ChunkMeta, CompressedBlockEntry, DirectoryIndex, MethodNameTable, Toc, TocHeader,
};

use super::chunk_blocks::{create_chunk_blocks, BlockInfo};
use super::layout::{finalize_layout, LayoutEntry};
use super::memory_budget::MemoryBudget;
use super::settings::PackingSettings;
use super::write_request::{CompletionSignal, WriteOptions, WriteRequest};

struct PendingEntry {
    sequence: u64,
    chunk_id: ChunkId,
    order_hint: u64,
    options: WriteOptions,
    request: Box<dyn WriteRequest>,
}

struct PreparedEntry {
    sequence: u64,
    chunk_id: ChunkId,
    order_hint: u64,
    file_name: Option<String>,
    is_memory_mapped: bool,
    hash: Digest20,
    blocks: Vec<BlockInfo>,
    encoded: Vec<u8>,
}

/// Accumulates entries and emits a container. One builder produces one
/// container; call [`ContainerBuilder::build`] once all entries have been
/// added.
pub struct ContainerBuilder {
    settings: PackingSettings,
    patch_sources: Vec<ContainerReader>,
    pending: Vec<PendingEntry>,
    next_sequence: u64,
}

/// Summary of a completed build, reported back to the caller (§4.9).
#[derive(Debug, Clone, Default)]
pub struct BuildStats {
    pub entry_count: u64,
    pub partition_count: u64,
    pub uncompressed_bytes: u64,
    pub compressed_bytes: u64,
    pub reused_from_patch_source: u64,
}

impl ContainerBuilder {
    pub fn new(settings: PackingSettings) -> Self {
        ContainerBuilder {
            settings,
            patch_sources: Vec::new(),
            pending: Vec::new(),
            next_sequence: 0,
        }
    }

    /// Opens a previously built container as a patch source: entries whose
    /// chunk id and content hash are unchanged reuse their prior physical
    /// placement, keeping the patch's on-disk delta small.
    pub fn with_patch_source(mut self, path_prefix: &Path) -> Result<Self> {
        let counter = AtomicU32::new(0);
        let reader = ContainerReader::open(path_prefix, 0, 0, &counter)?;
        self.patch_sources.push(reader);
        Ok(self)
    }

    /// Queues one entry for the next [`Self::build`] call.
    pub fn add_entry(&mut self, chunk_id: ChunkId, request: Box<dyn WriteRequest>, options: WriteOptions) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        let order_hint = request.order_hint();
        self.pending.push(PendingEntry {
            sequence,
            chunk_id,
            order_hint,
            options,
            request,
        });
    }

    pub fn entry_count(&self) -> usize {
        self.pending.len()
    }

    /// Runs the hash/compress stage over every queued entry, finalizes
    /// layout, and writes the container to `output_path_prefix` (`.utoc` plus
    /// one or more `.ucas` partitions).
    pub fn build(self, output_path_prefix: &Path) -> Result<BuildStats> {
        let pending = self.pending;
        let settings = self.settings;
        let patch_sources = self.patch_sources;

        let prepared = prepare_entries(pending, &settings)?;
        write_container(prepared, &settings, &patch_sources, output_path_prefix)
    }
}

/// Runs `prepare_source`/`consume_source`/`create_chunk_blocks` for every
/// entry, spread across `settings.worker_count` threads and gated by a
/// [`MemoryBudget`] so the compress stage never holds more than
/// `compress_stage_memory_budget` bytes of consumed-but-unencoded entry data
/// at once.
fn prepare_entries(pending: Vec<PendingEntry>, settings: &PackingSettings) -> Result<Vec<PreparedEntry>> {
    let total = pending.len();
    let (job_tx, job_rx) = unbounded::<PendingEntry>();
    for entry in pending {
        job_tx.send(entry).expect("receiver outlives every sender");
    }
    drop(job_tx);

    let budget = MemoryBudget::new(settings.compress_stage_memory_budget);
    let results: Mutex<Vec<Result<PreparedEntry>>> = Mutex::new(Vec::with_capacity(total));
    let worker_count = settings.worker_count.max(1).min(total.max(1));

    std::thread::scope(|scope| {
        for _ in 0..worker_count {
            let job_rx = job_rx.clone();
            let budget = &budget;
            let results = &results;
            scope.spawn(move || {
                while let Ok(mut entry) = job_rx.recv() {
                    let outcome = prepare_one(&mut entry, settings, budget);
                    results.lock().unwrap().push(outcome);
                }
            });
        }
    });

    let mut prepared = results.into_inner().unwrap();
    prepared.sort_by_key(|r| r.as_ref().map(|p| p.sequence).unwrap_or(u64::MAX));
    prepared.into_iter().collect()
}

fn prepare_one(entry: &mut PendingEntry, settings: &PackingSettings, budget: &MemoryBudget) -> Result<PreparedEntry> {
    let completion = CompletionSignal::new();
    entry.request.prepare_source(&completion)?;
    completion.wait();
    let data = entry.request.consume_source()?;

    budget.acquire(data.len() as u64);
    let whole_hash = hash::hash(&data);
    let blocks = create_chunk_blocks(
        &data,
        settings.block_size,
        settings.cipher_block_size,
        &settings.compression_method,
        settings.compression_level,
        entry.options.force_uncompressed,
        settings.encryption_key.as_ref(),
        settings.is_signed(),
    );
    budget.release(data.len() as u64);

    Ok(PreparedEntry {
        sequence: entry.sequence,
        chunk_id: entry.chunk_id,
        order_hint: entry.order_hint,
        file_name: entry.options.file_name.clone(),
        is_memory_mapped: entry.options.is_memory_mapped,
        hash: whole_hash,
        blocks: blocks.blocks,
        encoded: blocks.encoded,
    })
}

/// Finalizes physical layout and writes the TOC and partition files.
fn write_container(
    entries: Vec<PreparedEntry>,
    settings: &PackingSettings,
    patch_sources: &[ContainerReader],
    output_path_prefix: &Path,
) -> Result<BuildStats> {
    let layout_entries: Vec<LayoutEntry> = entries
        .iter()
        .map(|e| LayoutEntry {
            sequence: e.sequence,
            order_hint: e.order_hint,
            chunk_id: e.chunk_id,
            hash: e.hash,
            is_memory_mapped: e.is_memory_mapped,
            total_raw_size: e.encoded.len() as u64,
        })
        .collect();
    let placements = finalize_layout(&layout_entries, settings, patch_sources);

    let mut method_names = MethodNameTable::new();
    let mut chunk_ids = Vec::with_capacity(entries.len());
    let mut offset_lengths = Vec::with_capacity(entries.len());
    let mut chunk_metas = Vec::with_capacity(entries.len());
    let mut compression_blocks = Vec::new();
    let mut block_hashes = Vec::new();
    let mut directory_index = DirectoryIndex::new();

    let mut logical_cursor = 0u64;
    let mut uncompressed_bytes = 0u64;
    let mut compressed_bytes = 0u64;
    let mut reused_from_patch_source = 0u64;
    let block_size = settings.block_size as u64;

    for (i, entry) in entries.iter().enumerate() {
        let placed = placements[i];
        if entry_is_reused(entry, &layout_entries[i], patch_sources) {
            reused_from_patch_source += 1;
        }

        let mut entry_uses_compression = false;
        for block in &entry.blocks {
            let method_index = method_names.index_of_or_insert(&block.method);
            if method_index != 0 {
                entry_uses_compression = true;
            }
            let absolute_offset =
                placed.partition_index as u64 * settings.max_partition_size + placed.offset + block.physical_offset;
            compression_blocks.push(CompressedBlockEntry {
                offset: absolute_offset,
                compressed_size: block.compressed_size,
                uncompressed_size: block.uncompressed_size,
                method_index,
            });
            if let Some(sig) = block.signature {
                block_hashes.push(sig);
            }
            uncompressed_bytes += block.uncompressed_size as u64;
            compressed_bytes += block.compressed_size as u64;
        }

        let total_uncompressed: u64 = entry.blocks.iter().map(|b| b.uncompressed_size as u64).sum();
        chunk_ids.push(entry.chunk_id);
        offset_lengths.push(crate::format::ChunkOffsetLength {
            offset: logical_cursor,
            length: total_uncompressed,
        });

        let mut meta_flags = crate::format::chunk_meta::ChunkMetaFlags::none();
        meta_flags.set_compressed(entry_uses_compression);
        meta_flags.set_memory_mapped(entry.is_memory_mapped);
        chunk_metas.push(ChunkMeta {
            hash: entry.hash,
            flags: meta_flags,
        });

        if let Some(name) = &entry.file_name {
            directory_index.insert(name.clone(), i as u32);
        }

        let block_span = entry.blocks.len().max(1) as u64;
        logical_cursor += block_span * block_size;
    }

    let partition_count = placements.iter().map(|p| p.partition_index as u32 + 1).max().unwrap_or(0);

    let mut flags = ContainerFlags::none();
    flags.set_compressed(!method_names.is_empty());
    flags.set_encrypted(settings.is_encrypted());
    flags.set_signed(settings.is_signed());
    flags.set_indexed(settings.is_indexed && !directory_index.is_empty());

    let mut header = TocHeader::new(settings.container_id, settings.block_size, flags);
    header.entry_count = chunk_ids.len() as u32;
    header.compressed_block_entry_count = compression_blocks.len() as u32;
    header.method_name_count = method_names.len() as u32;
    if settings.is_encrypted() {
        header.encryption_key_id = settings.encryption_key_id;
    }
    header.set_partitioning(partition_count, settings.max_partition_size);

    let mut toc = Toc::new(header.clone());
    toc.chunk_ids = chunk_ids;
    toc.offset_lengths = offset_lengths;
    toc.compression_blocks = compression_blocks;
    toc.method_names = method_names;
    toc.chunk_metas = chunk_metas;
    if flags.indexed() {
        toc.directory_index = Some(directory_index);
        toc.header.directory_index_size = toc.directory_index.as_ref().unwrap().to_bytes().len() as u32;
    }
    if flags.signed() {
        let signing_key = settings.signing_key.as_ref().ok_or(ErrorCode::InvalidParameter {
            reason: "container_flags.signed set but no signing_key configured".to_string(),
        })?;
        let mut header_bytes = Vec::new();
        toc.header.write(&mut header_bytes).map_err(ErrorCode::from)?;
        toc.signatures = Some(crate::format::SignaturesBlock::create(&header_bytes, block_hashes, signing_key)?);
    }
    toc.rebuild_index();

    write_partitions(&entries, &placements, partition_count as usize, output_path_prefix)?;
    write_toc(&toc, output_path_prefix)?;

    info!(
        "built container {} entries across {} partition(s)",
        toc.chunk_ids.len(),
        partition_count
    );

    Ok(BuildStats {
        entry_count: toc.chunk_ids.len() as u64,
        partition_count: partition_count as u64,
        uncompressed_bytes,
        compressed_bytes,
        reused_from_patch_source,
    })
}

fn entry_is_reused(entry: &PreparedEntry, layout_entry: &LayoutEntry, patch_sources: &[ContainerReader]) -> bool {
    patch_sources.iter().any(|reader| {
        reader
            .toc()
            .entry_index_of(entry.chunk_id)
            .and_then(|idx| reader.toc().chunk_metas.get(idx as usize))
            .is_some_and(|meta| meta.hash == layout_entry.hash)
    })
}

fn write_partitions(
    entries: &[PreparedEntry],
    placements: &[super::layout::PlacedEntry],
    partition_count: usize,
    output_path_prefix: &Path,
) -> Result<()> {
    for partition_index in 0..partition_count {
        let mut in_partition: Vec<usize> = (0..entries.len())
            .filter(|&i| placements[i].partition_index == partition_index)
            .collect();
        in_partition.sort_by_key(|&i| placements[i].offset);

        let path = partition_path(output_path_prefix, partition_index);
        let file = File::create(&path).map_err(|_| ErrorCode::FileOpenFailed { path: path.clone() })?;
        let mut writer = BufWriter::new(file);
        let mut cursor = 0u64;
        for &i in &in_partition {
            let placed = &placements[i];
            if placed.offset > cursor {
                write_zeros(&mut writer, placed.offset - cursor)?;
            }
            writer.write_all(&entries[i].encoded).map_err(ErrorCode::from)?;
            cursor = placed.offset + entries[i].encoded.len() as u64;
        }
        writer.flush().map_err(ErrorCode::from)?;
    }
    Ok(())
}

fn write_zeros<W: Write>(writer: &mut W, mut count: u64) -> Result<()> {
    const CHUNK: usize = 64 * 1024;
    let zeros = [0u8; CHUNK];
    while count > 0 {
        let take = count.min(CHUNK as u64) as usize;
        writer.write_all(&zeros[..take]).map_err(ErrorCode::from)?;
        count -= take as u64;
    }
    Ok(())
}

fn write_toc(toc: &Toc, output_path_prefix: &Path) -> Result<()> {
    let path = with_suffix(output_path_prefix, "utoc");
    let file = File::create(&path).map_err(|_| ErrorCode::FileOpenFailed { path: path.clone() })?;
    let mut writer = BufWriter::new(file);
    toc.write(&mut writer).map_err(ErrorCode::from)?;
    writer.flush().map_err(ErrorCode::from)?;
    Ok(())
}

fn partition_path(prefix: &Path, index: usize) -> PathBuf {
    if index == 0 {
        with_suffix(prefix, "ucas")
    } else {
        let mut s = prefix.as_os_str().to_os_string();
        s.push(format!("_s{index}."));
        s.push("ucas");
        PathBuf::from(s)
    }
}

fn with_suffix(prefix: &Path, ext: &str) -> PathBuf {
    let mut s = prefix.as_os_str().to_os_string();
    s.push(".");
    s.push(ext);
    PathBuf::from(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::write_request::ByteSource;
    use tempfile::tempdir;

    fn sample_id(byte: u8) -> ChunkId {
        let mut bytes = [0u8; 12];
        bytes[11] = byte;
        ChunkId::from_bytes(bytes)
    }

    #[test]
    fn builds_a_single_entry_container_round_trippable_by_the_reader() {
        let dir = tempdir().unwrap();
        let mut settings = PackingSettings::new(42);
        settings.compression_method = crate::codec::compression::CompressionMethod::Stored;
        settings.worker_count = 2;

        let mut builder = ContainerBuilder::new(settings);
        builder.add_entry(
            sample_id(1),
            Box::new(ByteSource::new(b"hello from the builder".to_vec(), 0)),
            WriteOptions::new(),
        );

        let prefix = dir.path().join("out");
        let stats = builder.build(&prefix).unwrap();
        assert_eq!(stats.entry_count, 1);
        assert_eq!(stats.partition_count, 1);

        let counter = AtomicU32::new(0);
        let reader = ContainerReader::open(&prefix, 0, 0, &counter).unwrap();
        assert!(reader.does_chunk_exist(sample_id(1)));
        assert_eq!(reader.get_size(sample_id(1)), Some(b"hello from the builder".len() as u64));
    }

    #[test]
    fn multiple_entries_preserve_order_hint_ordering_in_layout() {
        let dir = tempdir().unwrap();
        let mut settings = PackingSettings::new(1);
        settings.compression_method = crate::codec::compression::CompressionMethod::Stored;
        settings.compression_block_alignment = 1;

        let mut builder = ContainerBuilder::new(settings);
        builder.add_entry(sample_id(1), Box::new(ByteSource::new(vec![1u8; 16], 0)), WriteOptions::new());
        builder.add_entry(sample_id(2), Box::new(ByteSource::new(vec![2u8; 16], 0)), WriteOptions::new());

        let prefix = dir.path().join("multi");
        let stats = builder.build(&prefix).unwrap();
        assert_eq!(stats.entry_count, 2);

        let counter = AtomicU32::new(0);
        let reader = ContainerReader::open(&prefix, 0, 0, &counter).unwrap();
        assert!(reader.does_chunk_exist(sample_id(1)));
        assert!(reader.does_chunk_exist(sample_id(2)));
    }

    #[test]
    fn indexed_container_records_file_names() {
        let dir = tempdir().unwrap();
        let mut settings = PackingSettings::new(7);
        settings.compression_method = crate::codec::compression::CompressionMethod::Stored;
        settings.is_indexed = true;

        let mut builder = ContainerBuilder::new(settings);
        builder.add_entry(
            sample_id(1),
            Box::new(ByteSource::new(b"data".to_vec(), 0)),
            WriteOptions::new().with_file_name("assets/texture.bin"),
        );

        let prefix = dir.path().join("indexed");
        builder.build(&prefix).unwrap();

        let counter = AtomicU32::new(0);
        let reader = ContainerReader::open(&prefix, 0, 0, &counter).unwrap();
        assert!(reader.toc().directory_index.as_ref().unwrap().lookup("assets/texture.bin").is_some());
    }
}
