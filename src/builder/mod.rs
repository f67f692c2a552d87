//! Builds new containers: an ordered stream of `(chunk_id, write_request,
//! options)` goes in, a `.utoc`/`.ucas`(`_s{N}.ucas`) container comes out.
//!
//! Mirrors the read-side split: pure per-block transforms live in
//! [`chunk_blocks`] (no I/O, just like [`crate::codec`]), physical placement
//! lives in [`layout`], and [`pipeline::ContainerBuilder`] is the public
//! entry point, styled after the teacher's `NxPackerBuilder` fluent API.

pub mod chunk_blocks;
pub mod layout;
pub mod memory_budget;
pub mod pipeline;
pub mod settings;
pub mod write_request;

pub use pipeline::{BuildStats, ContainerBuilder};
pub use settings::PackingSettings;
pub use write_request::{ByteSource, ChunkRegion, CompletionSignal, WriteOptions, WriteRequest};
