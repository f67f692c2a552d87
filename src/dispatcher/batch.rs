//! A client-side batch of read requests, issued together so the dispatcher
//! can resolve them in one pass while preserving submission order (§5
//! "within a single batch, requests are linked in insertion order").

use std::sync::Arc;

use crate::chunk_id::ChunkId;
use crate::dispatcher::events::Event;
use crate::dispatcher::request::{Request, RequestResult, RequestShared, ReadOptions};
use crate::error::Result;
use crate::queue::Priority;

/// One not-yet-issued entry in a [`Batch`].
pub(crate) struct PendingRead {
    pub chunk_id: ChunkId,
    pub options: ReadOptions,
    pub priority: Priority,
    pub shared: Arc<RequestShared>,
    pub callback: Option<Box<dyn FnOnce(Result<RequestResult>) + Send>>,
}

/// A batch of reads built up client-side with `read`/`read_with_callback`,
/// then handed to the dispatcher in one call to `issue*`.
#[derive(Default)]
pub struct Batch {
    pub(crate) reads: Vec<PendingRead>,
}

impl Batch {
    pub fn new() -> Self {
        Batch { reads: Vec::new() }
    }

    /// Queues a read, returning the [`Request`] handle the caller polls or
    /// blocks on after `issue()`.
    pub fn read(&mut self, chunk_id: ChunkId, options: ReadOptions, priority: Priority) -> Request {
        let shared = RequestShared::new(priority);
        self.reads.push(PendingRead {
            chunk_id,
            options,
            priority,
            shared: shared.clone(),
            callback: None,
        });
        Request::new(shared)
    }

    /// Queues a read with a completion callback invoked from the dispatcher
    /// thread when the request finishes (success, failure, or cancellation).
    pub fn read_with_callback(
        &mut self,
        chunk_id: ChunkId,
        options: ReadOptions,
        priority: Priority,
        callback: impl FnOnce(Result<RequestResult>) + Send + 'static,
    ) -> Request {
        let shared = RequestShared::new(priority);
        self.reads.push(PendingRead {
            chunk_id,
            options,
            priority,
            shared: shared.clone(),
            callback: Some(Box::new(callback)),
        });
        Request::new(shared)
    }

    pub fn len(&self) -> usize {
        self.reads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reads.is_empty()
    }
}

/// Fired once every request in an issued batch has completed, when the
/// caller used `issue_and_trigger`.
pub type BatchCompletionEvent = Event<()>;
