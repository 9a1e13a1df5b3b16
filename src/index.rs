//! Base index adapters: the mutable units the pipelines write into.
//!
//! An adapter owns one engine index instance plus its monotonic version and
//! event counter. The memory variant is ephemeral and records the uids it
//! supersedes; the disk variant persists its version in a signature file
//! beside the index directory and hands out readers through a retrying
//! dispenser.

pub mod disk;
pub mod dispenser;
pub mod ram;
pub mod signature;
pub mod snapshot;

use std::sync::Arc;

use ahash::AHashSet;

use crate::engine::SegmentIndex;
use crate::error::Result;
use crate::indexable::IndexRequest;
use crate::reader::GenerationReader;
use crate::{Uid, Version};

pub use disk::DiskIndex;
pub use dispenser::ReaderDispenser;
pub use ram::RamIndex;
pub use signature::IndexSignature;

/// One mutable index generation target.
///
/// Updates carry delete-then-insert semantics: the uids in `delete_uids`
/// are resolved to rows through the freshest reader's uid mapper and
/// tombstoned before the new documents are appended, all published as one
/// commit.
pub trait SearchIndex<D>: Send + Sync {
    /// Highest version this index has durably applied.
    fn version(&self) -> Version;

    /// Record a new version. Versions only move forward.
    fn set_version(&self, version: Version) -> Result<()>;

    /// Number of live documents.
    fn num_docs(&self) -> u32;

    /// Number of events applied over this index's lifetime.
    fn events_handled(&self) -> u64;

    /// Bump the applied-event counter.
    fn add_events_handled(&self, count: u64);

    /// The current reader generation, if the index holds any commit.
    fn open_reader(&self) -> Result<Option<Arc<GenerationReader<D>>>>;

    /// Apply one deduplicated batch: tombstone `delete_uids`, then append
    /// `inserts`.
    fn update(&self, delete_uids: &AHashSet<Uid>, inserts: &[(Uid, IndexRequest)]) -> Result<()>;

    /// Release resources. Readers already handed out stay usable.
    fn close(&self);
}

/// Shared delete-then-insert application used by both adapter variants.
pub(crate) fn apply_update<D>(
    engine: &SegmentIndex,
    reader: Option<&GenerationReader<D>>,
    delete_uids: &AHashSet<Uid>,
    inserts: &[(Uid, IndexRequest)],
) -> Result<()> {
    if delete_uids.is_empty() && inserts.is_empty() {
        return Ok(());
    }

    let mut writer = engine.writer()?;

    if !delete_uids.is_empty() {
        if let Some(reader) = reader {
            let mapper = reader.uid_mapper();
            for &uid in delete_uids {
                // a uid with no live row is simply not present yet
                if let Some(row) = mapper.get_row(uid) {
                    writer.delete_row(row)?;
                }
            }
        }
    }

    for (uid, request) in inserts {
        writer.add_document(*uid, &request.document, request.analyzer.as_ref());
    }

    writer.commit()?;
    Ok(())
}
