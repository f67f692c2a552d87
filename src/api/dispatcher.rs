//! The public read-side facade: a thin, ergonomic layer over
//! [`crate::dispatcher::Dispatcher`] that uses the names §6 describes
//! (`mount`, `new_batch`, `get_size_for_chunk`, the mounted/signature-error
//! events) and reconciles the one place the internal surface drifted from
//! them — `Batch` itself has no `issue()` since it holds no dispatcher
//! reference; that method lives here instead, on the handle that actually
//! owns the pipeline.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use rsa::RsaPublicKey;

use crate::chunk_id::{ChunkId, ContainerId};
use crate::codec::cipher::CipherKey;
use crate::container::{MappedRegion, OpenMappedOptions};
use crate::dispatcher::events::{Event, MountedContainerInfo, SignatureErrorInfo};
use crate::dispatcher::{Batch, BatchCompletionEvent, DispatcherSettings, RequestResult};
use crate::error::Result;

/// A mounted, running read pipeline. Cloning shares the same underlying
/// dispatcher (it is a thin `Arc` handle), so callers can freely pass copies
/// across threads instead of wrapping it in their own `Arc`.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<crate::dispatcher::Dispatcher>,
}

impl Dispatcher {
    pub fn new(settings: DispatcherSettings) -> Self {
        Dispatcher {
            inner: crate::dispatcher::Dispatcher::new(settings),
        }
    }

    /// Same as [`Self::new`], but verifies mounted containers' signatures
    /// blocks against `signing_public_key` at mount time.
    pub fn with_signing_key(settings: DispatcherSettings, signing_public_key: Option<RsaPublicKey>) -> Self {
        Dispatcher {
            inner: crate::dispatcher::Dispatcher::with_signing_key(settings, signing_public_key),
        }
    }

    pub fn mount(&self, path_prefix: &Path, order: i32, key_id: Option<[u8; 16]>, key: Option<CipherKey>) -> Result<ContainerId> {
        self.inner.mount(path_prefix, order, key_id, key).map(ContainerId)
    }

    pub fn unmount(&self, container_id: ContainerId) -> bool {
        self.inner.unmount(container_id.0)
    }

    pub fn mount_count(&self) -> usize {
        self.inner.mount_count()
    }

    pub fn does_chunk_exist(&self, id: ChunkId) -> bool {
        self.inner.does_chunk_exist(id)
    }

    /// Named after §6's `get_size_for_chunk`; identical to the inner
    /// dispatcher's `get_size`.
    pub fn get_size_for_chunk(&self, id: ChunkId) -> Result<u64> {
        self.inner.get_size(id)
    }

    pub fn open_mapped(&self, id: ChunkId, options: OpenMappedOptions) -> Result<MappedRegion> {
        self.inner.open_mapped(id, options)
    }

    pub fn new_batch(&self) -> Batch {
        Batch::new()
    }

    /// Hands `batch` to the dispatcher. Returns immediately; each request in
    /// it completes asynchronously (or, under a single-threaded host, the
    /// next call to [`Self::wake`]).
    pub fn issue(&self, batch: Batch) {
        self.inner.issue_batch(batch);
    }

    /// Issues `batch` and calls `callback` once every request in it has
    /// completed (success, failure, or cancellation all count).
    pub fn issue_with_callback(&self, mut batch: Batch, callback: impl FnOnce() + Send + 'static) {
        attach_completion_countdown(&mut batch, callback);
        self.inner.issue_batch(batch);
    }

    /// Issues `batch` and fires `event` once every request in it has completed.
    pub fn issue_and_trigger(&self, batch: Batch, event: Arc<Event<()>>) {
        self.issue_with_callback(batch, move || event.fire(&()));
    }

    /// Pumps the pipeline inline until nothing is pending. Only necessary
    /// under a single-threaded host (`DispatcherSettings::multithreaded =
    /// false`); a no-op otherwise, since the background thread already does
    /// this continuously.
    pub fn wake(&self) {
        self.inner.wake();
    }

    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    pub fn on_container_mounted(&self) -> &Event<MountedContainerInfo> {
        &self.inner.on_container_mounted
    }

    pub fn get_signature_error_event(&self) -> &Event<SignatureErrorInfo> {
        &self.inner.on_signature_error
    }
}

/// Wraps every read's existing callback (if any) so the last one to complete
/// also invokes `callback`, then installs the wrapped callbacks back onto
/// `batch`. Fires `callback` immediately if the batch is empty.
fn attach_completion_countdown(batch: &mut Batch, callback: impl FnOnce() + Send + 'static) {
    let callback: Box<dyn FnOnce() + Send> = Box::new(callback);
    if batch.is_empty() {
        callback();
        return;
    }

    let remaining = Arc::new(AtomicUsize::new(batch.len()));
    let callback = Arc::new(Mutex::new(Some(callback)));

    for read in batch.reads.iter_mut() {
        let remaining = remaining.clone();
        let callback = callback.clone();
        let existing = read.callback.take();
        read.callback = Some(Box::new(move |result: Result<RequestResult>| {
            if let Some(existing) = existing {
                existing(result);
            }
            if remaining.fetch_sub(1, Ordering::SeqCst) == 1 {
                if let Some(cb) = callback.lock().unwrap().take() {
                    cb();
                }
            }
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk_id::ChunkId;
    use crate::dispatcher::ReadOptions;
    use crate::format::header::ContainerFlags;
    use crate::queue::Priority;
    use std::sync::atomic::AtomicBool;
    use tempfile::tempdir;

    fn sample_id(byte: u8) -> ChunkId {
        let mut bytes = [0u8; 12];
        bytes[11] = byte;
        ChunkId::from_bytes(bytes)
    }

    fn write_minimal_container(dir: &Path, prefix: &str, chunk: ChunkId, bytes: &[u8]) -> std::path::PathBuf {
        use crate::format::{ChunkOffsetLength, CompressedBlockEntry, Toc, TocHeader};
        use std::fs::File;
        use std::io::Write;

        let mut header = TocHeader::new(1, 65536, ContainerFlags::none());
        let mut toc = Toc::new(header.clone());
        toc.chunk_ids.push(chunk);
        toc.offset_lengths.push(ChunkOffsetLength { offset: 0, length: bytes.len() as u64 });
        toc.compression_blocks.push(CompressedBlockEntry {
            offset: 0,
            compressed_size: bytes.len() as u32,
            uncompressed_size: bytes.len() as u32,
            method_index: 0,
        });
        toc.chunk_metas.push(crate::format::ChunkMeta {
            hash: crate::codec::hash::hash(bytes),
            flags: crate::format::chunk_meta::ChunkMetaFlags::none(),
        });
        header.entry_count = 1;
        header.compressed_block_entry_count = 1;
        toc.header = header;
        toc.rebuild_index();

        let prefix_path = dir.join(prefix);
        let mut toc_file = File::create(prefix_path.with_extension("utoc")).unwrap();
        toc.write(&mut toc_file).unwrap();
        let mut ucas_file = File::create(prefix_path.with_extension("ucas")).unwrap();
        ucas_file.write_all(bytes).unwrap();
        prefix_path
    }

    #[test]
    fn mount_and_read_round_trips_through_the_facade() {
        let dir = tempdir().unwrap();
        let id = sample_id(1);
        let prefix = write_minimal_container(dir.path(), "facade", id, b"through the facade");

        let dispatcher = Dispatcher::new(DispatcherSettings::default());
        dispatcher.mount(&prefix, 0, None, None).unwrap();
        assert!(dispatcher.does_chunk_exist(id));

        let mut batch = dispatcher.new_batch();
        let request = batch.read(id, ReadOptions::new(), Priority::Medium);
        dispatcher.issue(batch);

        match request.get_result().unwrap() {
            RequestResult::Buffer(buf) => assert_eq!(buf, b"through the facade"),
            _ => panic!("expected an owned buffer"),
        }
        dispatcher.shutdown();
    }

    #[test]
    fn issue_with_callback_fires_after_every_request_completes() {
        let dir = tempdir().unwrap();
        let id_a = sample_id(1);
        let id_b = sample_id(2);
        write_minimal_container(dir.path(), "a", id_a, b"aaa");
        let prefix_b = write_minimal_container(dir.path(), "b", id_b, b"bbb");
        let prefix_a = dir.path().join("a");

        let dispatcher = Dispatcher::new(DispatcherSettings::default());
        dispatcher.mount(&prefix_a, 0, None, None).unwrap();
        dispatcher.mount(&prefix_b, 0, None, None).unwrap();

        let mut batch = dispatcher.new_batch();
        let r1 = batch.read(id_a, ReadOptions::new(), Priority::Medium);
        let r2 = batch.read(id_b, ReadOptions::new(), Priority::Medium);

        let done = Arc::new(AtomicBool::new(false));
        let done_clone = done.clone();
        dispatcher.issue_with_callback(batch, move || done_clone.store(true, Ordering::SeqCst));

        r1.get_result().unwrap();
        r2.get_result().unwrap();
        // The countdown callback and the requests' own completion are both
        // driven by the same dispatcher thread before `complete()` returns
        // its result to `get_result`'s waiter, so this is not a race.
        assert!(done.load(Ordering::SeqCst));
        dispatcher.shutdown();
    }

    #[test]
    fn empty_batch_fires_callback_immediately() {
        let dispatcher = Dispatcher::new(DispatcherSettings::default());
        let batch = dispatcher.new_batch();
        let done = Arc::new(AtomicBool::new(false));
        let done_clone = done.clone();
        dispatcher.issue_with_callback(batch, move || done_clone.store(true, Ordering::SeqCst));
        assert!(done.load(Ordering::SeqCst));
        dispatcher.shutdown();
    }
}
