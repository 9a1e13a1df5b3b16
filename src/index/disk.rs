//! The durable disk index adapter.

use std::fs;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use ahash::AHashSet;
use log::info;
use uuid::Uuid;

use crate::analysis::Analyzer;
use crate::engine::SegmentIndex;
use crate::error::Result;
use crate::index::dispenser::ReaderDispenser;
use crate::index::signature::{INDEX_DIR_NAME, IndexSignature, SIGNATURE_FILE};
use crate::index::{SearchIndex, apply_update, snapshot};
use crate::indexable::IndexRequest;
use crate::reader::{GenerationReader, ReaderDecorator};
use crate::storage::FsDirectory;
use crate::{Uid, Version};

/// A file-system backed search index.
///
/// The index home holds the signature file plus the engine directory the
/// signature points at. Readers are opened through a retrying dispenser,
/// and the version survives restarts through the signature.
pub struct DiskIndex<D> {
    home: PathBuf,
    index_path: String,
    engine: SegmentIndex,
    dispenser: ReaderDispenser<D>,
    events_handled: AtomicU64,
}

impl<D: Send + Sync + 'static> DiskIndex<D> {
    /// Open or create a disk index at `home`. An existing index is
    /// recovered: its signature supplies the version and a reader is
    /// opened right away.
    pub fn new(
        home: PathBuf,
        analyzer: Arc<dyn Analyzer>,
        decorator: Arc<dyn ReaderDecorator<D>>,
    ) -> Result<Self> {
        fs::create_dir_all(&home)?;

        let signature_path = home.join(SIGNATURE_FILE);
        let signature = match IndexSignature::read(&signature_path)? {
            Some(signature) => signature,
            None => {
                let signature = IndexSignature::new(INDEX_DIR_NAME, 0);
                signature.save(&signature_path)?;
                signature
            }
        };

        let dir = FsDirectory::open(home.join(&signature.index_path))?;
        let engine = SegmentIndex::new(Arc::new(dir), analyzer);
        let dispenser = ReaderDispenser::new(home.clone(), engine.clone(), decorator);

        Ok(DiskIndex {
            home,
            index_path: signature.index_path,
            engine,
            dispenser,
            events_handled: AtomicU64::new(0),
        })
    }

    /// Engine directory path, relative to the index home.
    pub(crate) fn index_path(&self) -> &str {
        &self.index_path
    }

    /// The index home directory.
    pub fn home(&self) -> &PathBuf {
        &self.home
    }

    /// The engine index backing this adapter.
    pub fn engine(&self) -> &SegmentIndex {
        &self.engine
    }

    /// Open a fresh reader, replacing the dispensed one.
    pub fn get_new_reader(&self) -> Result<Option<Arc<GenerationReader<D>>>> {
        self.dispenser.get_new_reader()
    }

    /// Drop the current reader; actual reopening is deferred to the next
    /// [`DiskIndex::get_new_reader`] call.
    pub fn refresh(&self) {
        self.dispenser.close_reader();
    }

    /// Fold a memory generation into this index: tombstone the rows the
    /// memory generation superseded, then copy its segments wholesale.
    pub fn load_from_ram(&self, ram: &dyn SearchIndex<D>) -> Result<()> {
        let Some(src_reader) = ram.open_reader()? else {
            return Ok(());
        };

        let mut writer = self.engine.writer()?;
        if let Some(modified) = src_reader.modified_set() {
            if let Some(disk_reader) = self.dispenser.current_reader() {
                let mapper = disk_reader.uid_mapper();
                for &uid in modified {
                    if let Some(row) = mapper.get_row(uid) {
                        writer.delete_row(row)?;
                    }
                }
            }
        }
        writer.add_snapshot(src_reader.snapshot());
        writer.commit()?;
        Ok(())
    }

    /// Merge the whole index down to a single segment.
    pub fn optimize(&self) -> Result<()> {
        info!("optimizing disk index ...");
        let writer = self.engine.writer()?;
        writer.force_merge()?;
        info!("disk index optimized");
        Ok(())
    }

    /// Rewrite segments carrying tombstones, reclaiming deleted rows.
    pub fn expunge_deletes(&self) -> Result<()> {
        info!("expunging deletes ...");
        let writer = self.engine.writer()?;
        writer.expunge_deletes()?;
        info!("deletes expunged");
        Ok(())
    }

    /// Remove all index data and start empty at version 0. The previous
    /// directory is renamed aside first so a crash mid-delete cannot leave
    /// a partially removed index under the live name.
    pub fn purge(&self) -> Result<()> {
        info!("purging index at {}", self.home.display());
        self.dispenser.close_reader();

        if self.home.exists() {
            let name = self
                .home
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("index-home");
            let aside = self
                .home
                .with_file_name(format!("{name}-purged-{}", Uuid::new_v4().simple()));
            fs::rename(&self.home, &aside)?;
            // best effort: a leftover renamed directory holds no live data
            let _ = fs::remove_dir_all(&aside);
        }

        fs::create_dir_all(&self.home)?;
        IndexSignature::new(self.index_path.as_str(), 0)
            .save(&self.home.join(SIGNATURE_FILE))?;
        fs::create_dir_all(self.home.join(&self.index_path))?;
        info!("index purged");
        Ok(())
    }

    /// Stream the current commit (file set and version) into `writer`.
    /// Returns the number of bytes written.
    pub fn export_snapshot(&self, writer: &mut dyn Write) -> Result<u64> {
        snapshot::export_snapshot(self, writer)
    }

    /// Replace this index with a previously exported snapshot. The stream
    /// is fully staged and verified before the destination is touched; an
    /// interrupted transfer leaves the prior state intact.
    pub fn import_snapshot(&self, reader: &mut dyn Read) -> Result<()> {
        snapshot::import_snapshot(self, reader)
    }
}

impl<D: Send + Sync + 'static> SearchIndex<D> for DiskIndex<D> {
    fn version(&self) -> Version {
        self.dispenser.current_version()
    }

    fn set_version(&self, version: Version) -> Result<()> {
        let signature_path = self.home.join(SIGNATURE_FILE);
        let mut signature = IndexSignature::read(&signature_path)?
            .unwrap_or_else(|| IndexSignature::new(INDEX_DIR_NAME, 0));
        signature.version = version;
        signature.save(&signature_path)
    }

    fn num_docs(&self) -> u32 {
        match self.dispenser.current_reader() {
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
        Ok(self.dispenser.current_reader())
    }

    fn update(&self, delete_uids: &AHashSet<Uid>, inserts: &[(Uid, IndexRequest)]) -> Result<()> {
        let reader = self.dispenser.current_reader();
        apply_update(&self.engine, reader.as_deref(), delete_uids, inserts)
    }

    fn close(&self) {
        self.dispenser.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::StandardAnalyzer;
    use crate::engine::Document;
    use crate::reader::{DefaultDecorator, DefaultReader};
    use tempfile::TempDir;

    fn disk_index(home: &std::path::Path) -> DiskIndex<DefaultReader> {
        DiskIndex::new(
            home.to_path_buf(),
            Arc::new(StandardAnalyzer::new()),
            Arc::new(DefaultDecorator),
        )
        .unwrap()
    }

    fn insert(uid: Uid, body: &str) -> (Uid, IndexRequest) {
        (
            uid,
            IndexRequest::new(Document::new().with_field("body", body)),
        )
    }

    #[test]
    fn test_create_writes_signature() {
        let tmp = TempDir::new().unwrap();
        let index = disk_index(tmp.path());

        assert!(tmp.path().join(SIGNATURE_FILE).exists());
        assert_eq!(index.version(), 0);
        assert_eq!(index.num_docs(), 0);
    }

    #[test]
    fn test_update_and_reader_refresh() {
        let tmp = TempDir::new().unwrap();
        let index = disk_index(tmp.path());

        index
            .update(&AHashSet::new(), &[insert(1, "hello"), insert(2, "world")])
            .unwrap();
        // readers are opened explicitly, not as a side effect of updates
        assert_eq!(index.num_docs(), 0);

        index.get_new_reader().unwrap();
        assert_eq!(index.num_docs(), 2);
    }

    #[test]
    fn test_version_survives_reopen() {
        let tmp = TempDir::new().unwrap();
        {
            let index = disk_index(tmp.path());
            index.update(&AHashSet::new(), &[insert(1, "persist")]).unwrap();
            index.set_version(17).unwrap();
        }
        let index = disk_index(tmp.path());
        assert_eq!(index.version(), 17);
        assert_eq!(index.num_docs(), 1);
    }

    #[test]
    fn test_delete_resolves_through_mapper() {
        let tmp = TempDir::new().unwrap();
        let index = disk_index(tmp.path());

        index
            .update(&AHashSet::new(), &[insert(1, "aaa"), insert(2, "bbb")])
            .unwrap();
        index.get_new_reader().unwrap();

        let mut del = AHashSet::new();
        del.insert(1);
        index.update(&del, &[]).unwrap();
        index.get_new_reader().unwrap();

        assert_eq!(index.num_docs(), 1);
        let reader = index.open_reader().unwrap().unwrap();
        assert!(reader.term_rows("body", "aaa", None).is_empty());
        assert_eq!(reader.term_rows("body", "bbb", None).len(), 1);
    }

    #[test]
    fn test_purge_resets_index() {
        let tmp = TempDir::new().unwrap();
        let home = tmp.path().join("zone");
        let index = disk_index(&home);

        index.update(&AHashSet::new(), &[insert(1, "gone")]).unwrap();
        index.set_version(5).unwrap();
        index.get_new_reader().unwrap();

        index.purge().unwrap();
        assert_eq!(index.num_docs(), 0);
        assert!(index.get_new_reader().unwrap().is_none());

        let signature = IndexSignature::read(&home.join(SIGNATURE_FILE))
            .unwrap()
            .unwrap();
        assert_eq!(signature.version, 0);
    }
}
