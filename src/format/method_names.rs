//! The compression-method name table: fixed-width ANSI strings, one per
//! non-"none" method actually used by the container.

use crate::codec::compression::CompressionMethod;
use crate::error::{ErrorCode, Result};
use std::io::{self, Read, Write};

use super::header::METHOD_NAME_LENGTH;

/// `entry 0` is always the implicit "none" method and is never written.
#[derive(Debug, Clone, Default)]
pub struct MethodNameTable {
    /// Index `i` in this vec is on-disk method index `i + 1`.
    names: Vec<CompressionMethod>,
}

impl MethodNameTable {
    pub fn new() -> Self {
        MethodNameTable { names: Vec::new() }
    }

    /// Returns the on-disk index for `method`, adding it to the table if this
    /// is the first time it's been used by this build.
    pub fn index_of_or_insert(&mut self, method: &CompressionMethod) -> u8 {
        if matches!(method, CompressionMethod::Stored) {
            return 0;
        }
        if let Some(pos) = self.names.iter().position(|m| m == method) {
            return (pos + 1) as u8;
        }
        self.names.push(method.clone());
        self.names.len() as u8
    }

    pub fn method_for_index(&self, index: u8) -> CompressionMethod {
        if index == 0 {
            return CompressionMethod::Stored;
        }
        self.names
            .get(index as usize - 1)
            .cloned()
            .unwrap_or(CompressionMethod::Unknown(format!("index-{index}")))
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn write<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        for method in &self.names {
            let name = method.name();
            let bytes = name.as_bytes();
            let mut padded = vec![0u8; METHOD_NAME_LENGTH as usize];
            let copy_len = bytes.len().min(METHOD_NAME_LENGTH as usize);
            padded[..copy_len].copy_from_slice(&bytes[..copy_len]);
            writer.write_all(&padded)?;
        }
        Ok(())
    }

    pub fn read<R: Read>(reader: &mut R, count: u32, name_length: u32) -> Result<Self> {
        let mut names = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let mut buf = vec![0u8; name_length as usize];
            reader.read_exact(&mut buf).map_err(ErrorCode::from)?;
            let nul_pos = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
            let name = String::from_utf8_lossy(&buf[..nul_pos]).into_owned();
            names.push(CompressionMethod::from_name(&name));
        }
        Ok(MethodNameTable { names })
    }
}
