//! Packed `CompressedBlockEntry`: 5-byte offset, 3-byte compressed size,
//! 3-byte uncompressed size, 1-byte method index. 12 bytes total.

use std::io::{self, Read, Write};

pub const ON_DISK_SIZE: usize = 12;

pub const MAX_U24: u32 = (1 << 24) - 1;
pub const MAX_U40: u64 = (1u64 << 40) - 1;

/// Method index 0 always means "stored" (no compression).
pub const METHOD_STORED: u8 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompressedBlockEntry {
    /// Encoded absolute file offset: `partition_index * max_partition_size + partition_offset`.
    pub offset: u64,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub method_index: u8,
}

impl CompressedBlockEntry {
    pub fn write<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        debug_assert!(self.offset <= MAX_U40);
        debug_assert!(self.compressed_size <= MAX_U24);
        debug_assert!(self.uncompressed_size <= MAX_U24);
        writer.write_all(&pack_u40_be(self.offset))?;
        writer.write_all(&pack_u24_be(self.compressed_size))?;
        writer.write_all(&pack_u24_be(self.uncompressed_size))?;
        writer.write_all(&[self.method_index])?;
        Ok(())
    }

    pub fn read<R: Read>(reader: &mut R) -> io::Result<Self> {
        let mut offset_bytes = [0u8; 5];
        reader.read_exact(&mut offset_bytes)?;
        let mut compressed_bytes = [0u8; 3];
        reader.read_exact(&mut compressed_bytes)?;
        let mut uncompressed_bytes = [0u8; 3];
        reader.read_exact(&mut uncompressed_bytes)?;
        let mut method_byte = [0u8; 1];
        reader.read_exact(&mut method_byte)?;
        Ok(CompressedBlockEntry {
            offset: unpack_u40_be(&offset_bytes),
            compressed_size: unpack_u24_be(&compressed_bytes),
            uncompressed_size: unpack_u24_be(&uncompressed_bytes),
            method_index: method_byte[0],
        })
    }

    pub fn is_stored(&self) -> bool {
        self.method_index == METHOD_STORED
    }
}

fn pack_u40_be(value: u64) -> [u8; 5] {
    let full = value.to_be_bytes();
    let mut out = [0u8; 5];
    out.copy_from_slice(&full[3..8]);
    out
}

fn unpack_u40_be(bytes: &[u8; 5]) -> u64 {
    let mut full = [0u8; 8];
    full[3..8].copy_from_slice(bytes);
    u64::from_be_bytes(full)
}

fn pack_u24_be(value: u32) -> [u8; 3] {
    let full = value.to_be_bytes();
    let mut out = [0u8; 3];
    out.copy_from_slice(&full[1..4]);
    out
}

fn unpack_u24_be(bytes: &[u8; 3]) -> u32 {
    let mut full = [0u8; 4];
    full[1..4].copy_from_slice(bytes);
    u32::from_be_bytes(full)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let entry = CompressedBlockEntry {
            offset: 0xAA_BBCC_DDEE,
            compressed_size: 12345,
            uncompressed_size: 65536,
            method_index: 2,
        };
        let mut buf = Vec::new();
        entry.write(&mut buf).unwrap();
        assert_eq!(buf.len(), ON_DISK_SIZE);
        let read_back = CompressedBlockEntry::read(&mut &buf[..]).unwrap();
        assert_eq!(entry, read_back);
    }

    #[test]
    fn stored_method_is_zero() {
        let entry = CompressedBlockEntry {
            method_index: 0,
            ..Default::default()
        };
        assert!(entry.is_stored());
    }

    #[test]
    fn invariant_compressed_le_uncompressed_when_not_stored() {
        let entry = CompressedBlockEntry {
            offset: 0,
            compressed_size: 100,
            uncompressed_size: 200,
            method_index: 1,
        };
        assert!(entry.compressed_size <= entry.uncompressed_size);
    }
}
