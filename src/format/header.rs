//! The fixed-size TOC header.

use crate::error::{ErrorCode, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

/// 16-byte magic stamped at the start of every `.utoc` file.
pub const MAGIC: [u8; 16] = *b"PKCS-CONTAINER01";

/// Minimum version this build can read.
pub const MIN_SUPPORTED_VERSION: u8 = 1;

/// The version that introduced an explicit `partition_count`/`partition_size`
/// pair in the header; older TOCs must be read with the single-partition
/// substitution documented on [`TocHeader::partitioning`].
pub const VERSION_PARTITION_SIZE: u8 = 2;

/// Version written by this build.
pub const LATEST_VERSION: u8 = VERSION_PARTITION_SIZE;

/// Compiled-in size of [`TocHeader`] on disk.
pub const HEADER_SIZE: u32 = 16 + 1 + 3 + 4 * 8 + 8 + 16 + 1 + 3 + 4 + 8;

/// Size of one [`crate::format::compressed_block::CompressedBlockEntry`] on disk.
pub const COMPRESSED_BLOCK_ENTRY_SIZE: u32 = 12;

/// Fixed width of each entry in the compression-method name table.
pub const METHOD_NAME_LENGTH: u32 = 32;

bitfield::bitfield! {
    /// Per-container on-disk feature flags.
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct ContainerFlags(u8);
    impl Debug;
    pub compressed, set_compressed: 0;
    pub encrypted, set_encrypted: 1;
    pub signed, set_signed: 2;
    pub indexed, set_indexed: 3;
}

impl ContainerFlags {
    pub fn none() -> Self {
        ContainerFlags(0)
    }

    pub fn raw(&self) -> u8 {
        self.0
    }

    pub fn from_raw(raw: u8) -> Self {
        ContainerFlags(raw)
    }
}

/// An ordering-comparable version, so upgrade paths read as `version < VERSION_X`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TocVersion(pub u8);

impl TocVersion {
    pub fn supports_partition_size(&self) -> bool {
        self.0 >= VERSION_PARTITION_SIZE
    }
}

/// Partition count and size, resolved for the header's version (see
/// [`TocHeader::partitioning`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partitioning {
    pub partition_count: u32,
    pub partition_size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TocHeader {
    pub version: TocVersion,
    pub header_size: u32,
    pub entry_count: u32,
    pub compressed_block_entry_count: u32,
    pub compressed_block_entry_size: u32,
    pub block_size: u32,
    pub method_name_count: u32,
    pub method_name_length: u32,
    pub directory_index_size: u32,
    pub container_id: u64,
    pub encryption_key_id: [u8; 16],
    pub container_flags: ContainerFlags,
    /// `None` for versions predating explicit partition fields; see
    /// [`TocHeader::partitioning`] for the substitution rule.
    raw_partition_count: Option<u32>,
    raw_partition_size: Option<u64>,
}

impl TocHeader {
    pub fn new(container_id: u64, block_size: u32, flags: ContainerFlags) -> Self {
        TocHeader {
            version: TocVersion(LATEST_VERSION),
            header_size: HEADER_SIZE,
            entry_count: 0,
            compressed_block_entry_count: 0,
            compressed_block_entry_size: COMPRESSED_BLOCK_ENTRY_SIZE,
            block_size,
            method_name_count: 0,
            method_name_length: METHOD_NAME_LENGTH,
            directory_index_size: 0,
            container_id,
            encryption_key_id: [0u8; 16],
            container_flags: flags,
            raw_partition_count: Some(0),
            raw_partition_size: Some(u64::MAX),
        }
    }

    pub fn set_partitioning(&mut self, partition_count: u32, partition_size: u64) {
        self.raw_partition_count = Some(partition_count);
        self.raw_partition_size = Some(partition_size);
    }

    /// Resolved `(partition_count, partition_size)`, substituting
    /// `(1, u64::MAX)` for versions that predate the field (§4.2 "Version
    /// upgrades") or for an empty container (`entry_count == 0`).
    pub fn partitioning(&self) -> Partitioning {
        if self.entry_count == 0 {
            return Partitioning {
                partition_count: 0,
                partition_size: u64::MAX,
            };
        }
        if !self.version.supports_partition_size() {
            return Partitioning {
                partition_count: 1,
                partition_size: u64::MAX,
            };
        }
        Partitioning {
            partition_count: self.raw_partition_count.unwrap_or(1),
            partition_size: self.raw_partition_size.unwrap_or(u64::MAX),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.version.0 < MIN_SUPPORTED_VERSION {
            return Err(ErrorCode::CorruptToc {
                reason: format!("unsupported TOC version {}", self.version.0),
            });
        }
        if self.header_size != HEADER_SIZE {
            return Err(ErrorCode::CorruptToc {
                reason: format!(
                    "header size mismatch: on-disk {}, expected {}",
                    self.header_size, HEADER_SIZE
                ),
            });
        }
        if self.compressed_block_entry_size != COMPRESSED_BLOCK_ENTRY_SIZE {
            return Err(ErrorCode::CorruptToc {
                reason: format!(
                    "compressed block entry size mismatch: on-disk {}, expected {}",
                    self.compressed_block_entry_size, COMPRESSED_BLOCK_ENTRY_SIZE
                ),
            });
        }
        Ok(())
    }

    pub fn write<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&MAGIC)?;
        writer.write_u8(self.version.0)?;
        writer.write_all(&[0u8; 3])?; // padding to u32 alignment
        writer.write_u32::<LittleEndian>(self.header_size)?;
        writer.write_u32::<LittleEndian>(self.entry_count)?;
        writer.write_u32::<LittleEndian>(self.compressed_block_entry_count)?;
        writer.write_u32::<LittleEndian>(self.compressed_block_entry_size)?;
        writer.write_u32::<LittleEndian>(self.block_size)?;
        writer.write_u32::<LittleEndian>(self.method_name_count)?;
        writer.write_u32::<LittleEndian>(self.method_name_length)?;
        writer.write_u32::<LittleEndian>(self.directory_index_size)?;
        writer.write_u64::<LittleEndian>(self.container_id)?;
        writer.write_all(&self.encryption_key_id)?;
        writer.write_u8(self.container_flags.raw())?;
        writer.write_all(&[0u8; 3])?; // padding before partition_count
        let partitioning = self.partitioning();
        writer.write_u32::<LittleEndian>(partitioning.partition_count)?;
        writer.write_u64::<LittleEndian>(partitioning.partition_size)?;
        Ok(())
    }

    pub fn read<R: Read>(reader: &mut R) -> Result<Self> {
        let mut magic = [0u8; 16];
        reader.read_exact(&mut magic)?;
        if magic != MAGIC {
            return Err(ErrorCode::CorruptToc {
                reason: "bad magic".to_string(),
            });
        }
        let version = TocVersion(reader.read_u8()?);
        let mut pad = [0u8; 3];
        reader.read_exact(&mut pad)?;
        let header_size = reader.read_u32::<LittleEndian>()?;
        let entry_count = reader.read_u32::<LittleEndian>()?;
        let compressed_block_entry_count = reader.read_u32::<LittleEndian>()?;
        let compressed_block_entry_size = reader.read_u32::<LittleEndian>()?;
        let block_size = reader.read_u32::<LittleEndian>()?;
        let method_name_count = reader.read_u32::<LittleEndian>()?;
        let method_name_length = reader.read_u32::<LittleEndian>()?;
        let directory_index_size = reader.read_u32::<LittleEndian>()?;
        let container_id = reader.read_u64::<LittleEndian>()?;
        let mut encryption_key_id = [0u8; 16];
        reader.read_exact(&mut encryption_key_id)?;
        let container_flags = ContainerFlags::from_raw(reader.read_u8()?);
        reader.read_exact(&mut pad)?;
        let partition_count = reader.read_u32::<LittleEndian>()?;
        let partition_size = reader.read_u64::<LittleEndian>()?;

        let header = TocHeader {
            version,
            header_size,
            entry_count,
            compressed_block_entry_count,
            compressed_block_entry_size,
            block_size,
            method_name_count,
            method_name_length,
            directory_index_size,
            container_id,
            encryption_key_id,
            container_flags,
            raw_partition_count: Some(partition_count),
            raw_partition_size: Some(partition_size),
        };
        header.validate()?;
        Ok(header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_bytes() {
        let mut header = TocHeader::new(42, 65536, ContainerFlags::none());
        header.entry_count = 3;
        header.set_partitioning(2, 1 << 20);

        let mut buf = Vec::new();
        header.write(&mut buf).unwrap();
        let read_back = TocHeader::read(&mut &buf[..]).unwrap();

        assert_eq!(header, read_back);
        assert_eq!(buf.len(), HEADER_SIZE as usize);
    }

    #[test]
    fn old_version_substitutes_single_partition() {
        let mut header = TocHeader::new(1, 65536, ContainerFlags::none());
        header.entry_count = 1;
        header.version = TocVersion(1);
        header.set_partitioning(9, 123); // should be ignored for this version
        assert_eq!(
            header.partitioning(),
            Partitioning {
                partition_count: 1,
                partition_size: u64::MAX
            }
        );
    }

    #[test]
    fn empty_container_has_no_partitions() {
        let header = TocHeader::new(1, 65536, ContainerFlags::none());
        assert_eq!(
            header.partitioning(),
            Partitioning {
                partition_count: 0,
                partition_size: u64::MAX
            }
        );
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut buf = vec![0u8; HEADER_SIZE as usize];
        buf[0] = 0xff;
        assert!(TocHeader::read(&mut &buf[..]).is_err());
    }
}
