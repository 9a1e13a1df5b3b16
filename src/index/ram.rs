//! The ephemeral memory index adapter.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use ahash::AHashSet;
use log::error;
use parking_lot::{Mutex, RwLock};

use crate::analysis::Analyzer;
use crate::engine::{SegmentIndex, SegmentSnapshot};
use crate::error::Result;
use crate::index::{SearchIndex, apply_update};
use crate::indexable::IndexRequest;
use crate::reader::{GenerationReader, ReaderDecorator};
use crate::storage::RamDirectory;
use crate::{Uid, Version};

/// A memory-backed search index generation.
///
/// Every update commits to an in-memory directory, records the superseded
/// uids into the cumulative deleted set and republishes a fresh reader
/// whose modified set is a snapshot of that cumulative set. The reader and
/// its modified set therefore always form a consistent pair.
pub struct RamIndex<D> {
    engine: SegmentIndex,
    decorator: Arc<dyn ReaderDecorator<D>>,
    version: AtomicU64,
    events_handled: AtomicU64,

    /// Uids this index has superseded over its lifetime.
    deleted: Mutex<AHashSet<Uid>>,

    /// Consistent reader/modified-set pair published after each update.
    current_reader: RwLock<Option<Arc<GenerationReader<D>>>>,
}

impl<D: Send + Sync + 'static> RamIndex<D> {
    /// Create an empty memory index starting at `version` (the disk
    /// version at creation time).
    pub fn new(
        version: Version,
        analyzer: Arc<dyn Analyzer>,
        decorator: Arc<dyn ReaderDecorator<D>>,
    ) -> Self {
        let engine = SegmentIndex::new(Arc::new(RamDirectory::new()), analyzer);
        RamIndex {
            engine,
            decorator,
            version: AtomicU64::new(version),
            events_handled: AtomicU64::new(0),
            deleted: Mutex::new(AHashSet::new()),
            current_reader: RwLock::new(None),
        }
    }

    /// The engine index backing this adapter.
    pub fn engine(&self) -> &SegmentIndex {
        &self.engine
    }
}

impl<D: Send + Sync + 'static> SearchIndex<D> for RamIndex<D> {
    fn version(&self) -> Version {
        self.version.load(Ordering::Acquire)
    }

    fn set_version(&self, version: Version) -> Result<()> {
        self.version.store(version, Ordering::Release);
        Ok(())
    }

    fn num_docs(&self) -> u32 {
        match self.current_reader.read().as_ref() {
            Some(reader) => reader.snapshot().num_live_rows(),
            None => 0,
        }
    }

    fn events_handled(&self) -> u64 {
        self.events_handled.load(Ordering::Acquire)
    }

    fn add_events_handled(&self, count: u64) {
        self.events_handled.fetch_add(count, Ordering::AcqRel);
    }

    fn open_reader(&self) -> Result<Option<Arc<GenerationReader<D>>>> {
        Ok(self.current_reader.read().clone())
    }

    fn update(&self, delete_uids: &AHashSet<Uid>, inserts: &[(Uid, IndexRequest)]) -> Result<()> {
        let reader = self.current_reader.read().clone();
        apply_update(&self.engine, reader.as_deref(), delete_uids, inserts)?;

        let modified = {
            let mut deleted = self.deleted.lock();
            deleted.extend(delete_uids.iter().copied());
            deleted.clone()
        };

        // a delete-only update on an empty index still publishes a reader,
        // so the modified set reaches the composed view and the drain
        let snapshot = match self.engine.reader() {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => SegmentSnapshot::empty(),
            Err(e) => {
                error!("cannot reopen memory reader: {e}");
                return Err(e);
            }
        };
        let reader = Arc::new(GenerationReader::open(
            snapshot,
            self.version(),
            Some(modified),
            Arc::clone(&self.decorator),
        ));
        *self.current_reader.write() = Some(reader);
        Ok(())
    }

    fn close(&self) {
        *self.current_reader.write() = None;
    }
}
