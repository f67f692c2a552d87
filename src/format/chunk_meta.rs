//! Per-chunk metadata: whole-chunk hash plus flags.

use crate::codec::hash::{Digest20, DIGEST_SIZE};
use std::io::{self, Read, Write};

pub const ON_DISK_SIZE: usize = DIGEST_SIZE + 1;

bitfield::bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct ChunkMetaFlags(u8);
    impl Debug;
    pub compressed, set_compressed: 0;
    pub memory_mapped, set_memory_mapped: 1;
}

impl ChunkMetaFlags {
    pub fn none() -> Self {
        ChunkMetaFlags(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkMeta {
    pub hash: Digest20,
    pub flags: ChunkMetaFlags,
}

impl ChunkMeta {
    pub fn write<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.hash)?;
        writer.write_all(&[self.flags.0])?;
        Ok(())
    }

    pub fn read<R: Read>(reader: &mut R) -> io::Result<Self> {
        let mut hash = [0u8; DIGEST_SIZE];
        reader.read_exact(&mut hash)?;
        let mut flag_byte = [0u8; 1];
        reader.read_exact(&mut flag_byte)?;
        Ok(ChunkMeta {
            hash,
            flags: ChunkMetaFlags(flag_byte[0]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_with_flags() {
        let mut flags = ChunkMetaFlags::none();
        flags.set_compressed(true);
        flags.set_memory_mapped(true);
        let meta = ChunkMeta {
            hash: [7u8; DIGEST_SIZE],
            flags,
        };
        let mut buf = Vec::new();
        meta.write(&mut buf).unwrap();
        assert_eq!(buf.len(), ON_DISK_SIZE);
        let read_back = ChunkMeta::read(&mut &buf[..]).unwrap();
        assert_eq!(meta, read_back);
        assert!(read_back.flags.compressed());
        assert!(read_back.flags.memory_mapped());
    }
}
