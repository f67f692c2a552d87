//! The write side's source abstraction: an entry's bytes are not assumed to
//! be resident in memory up front, so the pipeline asks for them through a
//! two-step `prepare`/`consume` handshake (§4.9) rather than taking a plain
//! `&[u8]`.

use std::sync::{Condvar, Mutex};

use crate::error::Result;

/// A sub-region hint a source may expose for providers that assemble their
/// bytes from more than one underlying span (e.g. a patch diff reusing parts
/// of a previous build). `CreateChunkBlocks` itself only ever sees the
/// flattened bytes `consume_source` returns; `regions` is informational, for
/// callers that want to report provenance without re-deriving it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRegion {
    pub offset: u64,
    pub length: u64,
}

/// A one-shot, blocking completion handshake, the same `Mutex`+`Condvar`
/// shape [`crate::dispatcher::request::RequestShared`] uses to let a
/// producer thread signal a waiting consumer.
pub struct CompletionSignal {
    ready: Mutex<bool>,
    condvar: Condvar,
}

impl CompletionSignal {
    pub fn new() -> Self {
        CompletionSignal {
            ready: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    /// Marks the source ready and wakes any waiter. Idempotent.
    pub fn signal(&self) {
        *self.ready.lock().unwrap() = true;
        self.condvar.notify_all();
    }

    /// Blocks until [`Self::signal`] has been called.
    pub fn wait(&self) {
        let mut ready = self.ready.lock().unwrap();
        while !*ready {
            ready = self.condvar.wait(ready).unwrap();
        }
    }
}

impl Default for CompletionSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// One entry's source: `prepare_source` begins producing bytes (signalling
/// `completion` when ready, possibly from another thread), `consume_source`
/// hands them over exactly once. `order_hint` drives layout finalization's
/// sort key (§4.9 "sort pending entries by `(order_hint asc, sequence asc)`").
pub trait WriteRequest: Send {
    fn prepare_source(&mut self, completion: &CompletionSignal) -> Result<()>;
    fn consume_source(&mut self) -> Result<Vec<u8>>;
    fn order_hint(&self) -> u64;

    fn regions(&self) -> &[ChunkRegion] {
        &[]
    }
}

/// Per-entry write options (§4.9, §6).
#[derive(Debug, Clone)]
pub struct WriteOptions {
    /// Pads and aligns the entry so it can be opened via `open_mapped`.
    pub is_memory_mapped: bool,
    /// Skips compression for this entry even if the builder has a method configured.
    pub force_uncompressed: bool,
    /// Recorded in the directory index, if the container is built indexed.
    pub file_name: Option<String>,
}

impl WriteOptions {
    pub fn new() -> Self {
        WriteOptions {
            is_memory_mapped: false,
            force_uncompressed: false,
            file_name: None,
        }
    }

    pub fn with_memory_mapped(mut self, memory_mapped: bool) -> Self {
        self.is_memory_mapped = memory_mapped;
        self
    }

    pub fn with_force_uncompressed(mut self, force_uncompressed: bool) -> Self {
        self.force_uncompressed = force_uncompressed;
        self
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// The simplest source: bytes already resident in memory. Grounds the
/// `WriteRequest` contract the way the teacher's
/// `add_file_from_byte_slice`/`add_file_from_boxed_slice` ground its own
/// file-data providers.
pub struct ByteSource {
    data: Option<Vec<u8>>,
    order_hint: u64,
}

impl ByteSource {
    pub fn new(data: Vec<u8>, order_hint: u64) -> Self {
        ByteSource {
            data: Some(data),
            order_hint,
        }
    }
}

impl WriteRequest for ByteSource {
    fn prepare_source(&mut self, completion: &CompletionSignal) -> Result<()> {
        // Already resident; signal immediately rather than spawning a task.
        completion.signal();
        Ok(())
    }

    fn consume_source(&mut self) -> Result<Vec<u8>> {
        Ok(self.data.take().unwrap_or_default())
    }

    fn order_hint(&self) -> u64 {
        self.order_hint
    }
}
