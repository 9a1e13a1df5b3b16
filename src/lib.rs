//! # Pilum
//!
//! A real-time incremental indexing library for Rust.
//!
//! Pilum layers millisecond-latency ingestion on top of a batch-oriented,
//! immutable-segment search index. Incoming inserts, updates and deletes
//! become searchable almost immediately through a pair of rotating
//! in-memory indexes, while a background pipeline batches the same events
//! onto a durable on-disk index without ever blocking readers.
//!
//! ## Features
//!
//! - Versioned event pipeline with back-pressure and flush guarantees
//! - Rotating memory generations drained to disk in the background
//! - Deduplicating read view across disk and memory generations
//! - Crash-safe index publication and snapshot export/import

pub mod analysis;
pub mod engine;
pub mod error;
pub mod event;
pub mod index;
pub mod indexable;
pub mod manager;
pub mod pipeline;
pub mod provider;
pub mod reader;
pub mod storage;
pub mod system;
pub mod uid;

/// Caller-assigned logical document identifier, stable across index
/// generations.
pub type Uid = i32;

/// Position of a document within one physical index generation. Row ids are
/// not stable across generations.
pub type RowId = u32;

/// Monotonic event version. Versions are assigned by the producer; an index
/// records the highest version it has durably applied.
pub type Version = u64;

/// Reserved uid marking a deleted or absent row.
pub const ABSENT_UID: Uid = i32::MIN;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
