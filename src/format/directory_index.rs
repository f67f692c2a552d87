//! The optional directory-index blob (present iff `ContainerFlags::indexed`).
//!
//! Opaque to the read/resolve path; this is one concrete implementation —
//! a null-terminated name pool plus a parallel `(name_offset, toc_entry_index)`
//! table — chosen because it packs many small strings compactly, the same
//! problem the teacher's string-pool parser solves.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

#[derive(Debug, Clone, Default)]
pub struct DirectoryIndex {
    entries: Vec<(String, u32)>,
}

impl DirectoryIndex {
    pub fn new() -> Self {
        DirectoryIndex { entries: Vec::new() }
    }

    pub fn insert(&mut self, file_name: String, toc_entry_index: u32) {
        self.entries.push((file_name, toc_entry_index));
    }

    pub fn lookup(&self, file_name: &str) -> Option<u32> {
        self.entries
            .iter()
            .find(|(name, _)| name == file_name)
            .map(|(_, idx)| *idx)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serializes to: `u32 entry_count`, then for each entry `u32 name_offset,
    /// u32 toc_entry_index`, then the null-terminated name pool.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut pool = Vec::new();
        let mut offsets = Vec::with_capacity(self.entries.len());
        for (name, _) in &self.entries {
            offsets.push(pool.len() as u32);
            pool.extend_from_slice(name.as_bytes());
            pool.push(0);
        }

        let mut out = Vec::new();
        out.write_u32::<LittleEndian>(self.entries.len() as u32).unwrap();
        for ((_, toc_index), name_offset) in self.entries.iter().zip(offsets.iter()) {
            out.write_u32::<LittleEndian>(*name_offset).unwrap();
            out.write_u32::<LittleEndian>(*toc_index).unwrap();
        }
        out.extend_from_slice(&pool);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> io::Result<Self> {
        let mut cursor = bytes;
        let count = cursor.read_u32::<LittleEndian>()?;
        let mut table = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let name_offset = cursor.read_u32::<LittleEndian>()?;
            let toc_index = cursor.read_u32::<LittleEndian>()?;
            table.push((name_offset, toc_index));
        }
        let pool_start = bytes.len() - cursor.len();
        let pool = &bytes[pool_start..];

        let mut entries = Vec::with_capacity(table.len());
        for (name_offset, toc_index) in table {
            let start = name_offset as usize;
            let end = pool[start..]
                .iter()
                .position(|&b| b == 0)
                .map(|p| start + p)
                .unwrap_or(pool.len());
            let name = String::from_utf8_lossy(&pool[start..end]).into_owned();
            entries.push((name, toc_index));
        }
        Ok(DirectoryIndex { entries })
    }
}
