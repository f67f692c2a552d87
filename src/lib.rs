//! A packaged-asset I/O dispatcher: mounts read-only container files (a
//! binary table-of-contents plus one or more raw-bytes partition files),
//! resolves content-addressed chunk reads against them through a
//! deduplicating, priority-ordered pipeline, and builds new containers from
//! an ordered stream of write requests.
//!
//! Module layout mirrors the split the crate was modeled on: on-disk layout
//! and its in-memory model live in [`format`], pure encode/decode primitives
//! with no I/O live in [`codec`], and the runtime pipeline is built up from
//! [`container`] (mounted readers) through [`tracker`], [`queue`], and
//! [`backend`] into the [`dispatcher`]. [`builder`] is the write-side
//! counterpart of [`dispatcher`]. [`api`] is the public facade most callers
//! should use instead of reaching into the internal modules directly.

pub mod api;
pub mod backend;
pub mod builder;
pub mod chunk_id;
pub mod codec;
pub mod container;
pub mod dispatcher;
pub mod error;
pub mod format;
pub mod pool;
pub mod queue;
pub mod tracker;
pub mod utilities;

pub use chunk_id::{ChunkId, ContainerId};
pub use error::{ErrorCode, Result};

/// Re-exports the names most callers need: the dispatcher facade, the
/// container builder, and the core identifiers. `use packed_chunk_store::prelude::*;`
/// pulls in everything needed to mount a container, issue reads, and build one.
pub mod prelude {
    pub use crate::api::{Dispatcher, PackedChunkStore};
    pub use crate::builder::{ContainerBuilder, PackingSettings, WriteOptions, WriteRequest};
    pub use crate::chunk_id::{ChunkId, ContainerId};
    pub use crate::dispatcher::{Batch, DispatcherSettings, ReadOptions, Request, RequestResult};
    pub use crate::error::{ErrorCode, Result};
    pub use crate::queue::Priority;
}
