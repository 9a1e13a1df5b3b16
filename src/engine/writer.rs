//! Index writer: buffers documents, tombstones rows, publishes commits.

use bit_vec::BitVec;
use log::debug;
use std::sync::Arc;
use uuid::Uuid;

use crate::analysis::Analyzer;
use crate::engine::meta::{self, CommitMeta, SegmentEntry};
use crate::engine::policy::DeletionPolicy;
use crate::engine::segment::{SegmentBuilder, SegmentData, merge_segment_views};
use crate::engine::snapshot::SegmentSnapshot;
use crate::engine::Document;
use crate::error::{PilumError, Result};
use crate::storage::Directory;
use crate::{RowId, Uid};

/// A segment carried over from the commit the writer opened on, with a
/// mutable tombstone overlay.
#[derive(Debug)]
struct MutableSegment {
    entry: SegmentEntry,
    data: Arc<SegmentData>,
    deleted: BitVec,
    base: RowId,
    dirty: bool,
}

/// Writes one new commit generation: at most one instance should be open
/// per index at a time, which the batching pipeline guarantees by holding
/// the adapter during an update.
///
/// Dropping a writer without calling one of the terminal operations
/// abandons all buffered changes.
pub struct IndexWriter {
    dir: Arc<dyn Directory>,
    analyzer: Arc<dyn Analyzer>,
    policy: Arc<DeletionPolicy>,
    base_generation: u64,
    segments: Vec<MutableSegment>,
    appended: Vec<(Arc<SegmentData>, BitVec)>,
    builder: SegmentBuilder,
}

impl IndexWriter {
    /// Open a writer positioned on the latest commit (or on an empty index).
    pub fn open(
        dir: Arc<dyn Directory>,
        analyzer: Arc<dyn Analyzer>,
        policy: Arc<DeletionPolicy>,
    ) -> Result<IndexWriter> {
        let (base_generation, segments) = match meta::latest_generation(dir.as_ref())? {
            Some(generation) => {
                let meta = CommitMeta::load(dir.as_ref(), generation)?;
                let snapshot = SegmentSnapshot::open_commit(dir.as_ref(), &meta)?;
                let mut segments = Vec::with_capacity(meta.segments.len());
                for (entry, loaded) in meta.segments.iter().zip(snapshot.segments()) {
                    segments.push(MutableSegment {
                        entry: entry.clone(),
                        data: Arc::clone(&loaded.data),
                        deleted: loaded.deleted.clone(),
                        base: loaded.base,
                        dirty: false,
                    });
                }
                (generation, segments)
            }
            None => (0, Vec::new()),
        };

        Ok(IndexWriter {
            dir,
            analyzer,
            policy,
            base_generation,
            segments,
            appended: Vec::new(),
            builder: SegmentBuilder::new(),
        })
    }

    /// The commit generation this writer opened on.
    pub fn base_generation(&self) -> u64 {
        self.base_generation
    }

    /// Number of documents buffered but not yet committed.
    pub fn num_pending(&self) -> u32 {
        self.builder.num_rows()
    }

    /// Buffer one document for the next commit. Returns the global row id
    /// the document will occupy.
    pub fn add_document(
        &mut self,
        uid: Uid,
        document: &Document,
        analyzer: Option<&Arc<dyn Analyzer>>,
    ) -> RowId {
        let analyzer: &dyn Analyzer = match analyzer {
            Some(a) => a.as_ref(),
            None => self.analyzer.as_ref(),
        };
        let base = self.existing_rows() + self.appended_rows();
        base + self.builder.add_document(uid, document, analyzer)
    }

    /// Tombstone a row of the commit this writer opened on. Deleting an
    /// already-deleted row is a no-op.
    pub fn delete_row(&mut self, row: RowId) -> Result<()> {
        if row >= self.existing_rows() {
            return Err(PilumError::invalid_argument(format!(
                "row {row} is not addressable in generation {}",
                self.base_generation
            )));
        }
        let idx = self
            .segments
            .partition_point(|s| s.base + s.data.num_rows() <= row);
        let segment = &mut self.segments[idx];
        let local = (row - segment.base) as usize;
        if !segment.deleted.get(local).unwrap_or(false) {
            segment.deleted.set(local, true);
            segment.dirty = true;
        }
        Ok(())
    }

    /// Copy every segment of another snapshot into the next commit,
    /// tombstones included. This is the drain primitive used to fold a
    /// memory generation into the disk index.
    pub fn add_snapshot(&mut self, src: &SegmentSnapshot) {
        for segment in src.segments() {
            self.appended
                .push((Arc::clone(&segment.data), segment.deleted.clone()));
        }
    }

    /// Publish buffered changes as a new commit generation.
    ///
    /// Returns the generation written, or the base generation unchanged if
    /// there was nothing to publish.
    pub fn commit(mut self) -> Result<u64> {
        let has_dirty = self.segments.iter().any(|s| s.dirty);
        if !has_dirty && self.appended.is_empty() && self.builder.is_empty() {
            return Ok(self.base_generation);
        }

        let generation = self.base_generation + 1;
        let mut entries = Vec::new();

        for segment in &self.segments {
            // fully tombstoned segments are dropped from the commit
            if segment.deleted.iter().all(|d| d) && !segment.data.uids.is_empty() {
                continue;
            }
            let mut entry = segment.entry.clone();
            if segment.dirty {
                let del_file = del_file_name(&entry.data_file, generation);
                self.dir
                    .write_file(&del_file, &segment.deleted.to_bytes())?;
                entry.del_file = Some(del_file);
            }
            entries.push(entry);
        }

        let appended = std::mem::take(&mut self.appended);
        for (data, deleted) in appended {
            if let Some(entry) = self.write_segment(&data, &deleted, generation)? {
                entries.push(entry);
            }
        }

        if !self.builder.is_empty() {
            let data = std::mem::take(&mut self.builder).build();
            let empty = BitVec::from_elem(data.uids.len(), false);
            if let Some(entry) = self.write_segment(&data, &empty, generation)? {
                entries.push(entry);
            }
        }

        self.publish(generation, entries)
    }

    /// Rewrite the whole index as one segment, dropping tombstoned rows.
    pub fn force_merge(mut self) -> Result<u64> {
        let generation = self.base_generation + 1;
        let views: Vec<(&SegmentData, &BitVec)> = self
            .segments
            .iter()
            .map(|s| (s.data.as_ref(), &s.deleted))
            .collect();
        let merged = merge_segment_views(&views);
        self.segments.clear();

        let mut entries = Vec::new();
        let empty = BitVec::from_elem(merged.uids.len(), false);
        if let Some(entry) = self.write_segment(&merged, &empty, generation)? {
            entries.push(entry);
        }
        self.publish(generation, entries)
    }

    /// Rewrite only the segments that carry tombstones, reclaiming their
    /// deleted rows. Clean segments are left untouched.
    pub fn expunge_deletes(mut self) -> Result<u64> {
        if !self.segments.iter().any(|s| s.deleted.iter().any(|d| d)) {
            return Ok(self.base_generation);
        }

        let generation = self.base_generation + 1;
        let mut entries = Vec::new();
        let segments = std::mem::take(&mut self.segments);
        for segment in segments {
            if segment.deleted.iter().any(|d| d) {
                let merged =
                    merge_segment_views(&[(segment.data.as_ref(), &segment.deleted)]);
                let empty = BitVec::from_elem(merged.uids.len(), false);
                if let Some(entry) = self.write_segment(&merged, &empty, generation)? {
                    entries.push(entry);
                }
            } else {
                entries.push(segment.entry);
            }
        }
        self.publish(generation, entries)
    }

    fn existing_rows(&self) -> RowId {
        self.segments
            .last()
            .map(|s| s.base + s.data.num_rows())
            .unwrap_or(0)
    }

    fn appended_rows(&self) -> RowId {
        self.appended.iter().map(|(d, _)| d.num_rows()).sum()
    }

    /// Serialize one segment, skipping it entirely when no row is live.
    fn write_segment(
        &self,
        data: &SegmentData,
        deleted: &BitVec,
        generation: u64,
    ) -> Result<Option<SegmentEntry>> {
        let live = data.uids.len() - deleted.iter().filter(|d| *d).count();
        if live == 0 {
            return Ok(None);
        }

        let data_file = format!("{}{}.dat", meta::SEGMENT_FILE_PREFIX, Uuid::new_v4().simple());
        let encoded = bincode::serialize(data)
            .map_err(|e| PilumError::serialization(format!("cannot encode segment: {e}")))?;
        self.dir.write_file(&data_file, &encoded)?;

        let del_file = if deleted.iter().any(|d| d) {
            let del_file = del_file_name(&data_file, generation);
            self.dir.write_file(&del_file, &deleted.to_bytes())?;
            Some(del_file)
        } else {
            None
        };

        Ok(Some(SegmentEntry {
            data_file,
            rows: data.num_rows(),
            del_file,
        }))
    }

    fn publish(self, generation: u64, entries: Vec<SegmentEntry>) -> Result<u64> {
        let meta = CommitMeta {
            generation,
            segments: entries,
        };
        meta.save(self.dir.as_ref())?;
        self.policy.commit(self.dir.as_ref(), &meta)?;
        self.dir.sync()?;
        debug!(
            "committed generation {generation} with {} segments",
            meta.segments.len()
        );
        Ok(generation)
    }
}

fn del_file_name(data_file: &str, generation: u64) -> String {
    let stem = data_file.strip_suffix(".dat").unwrap_or(data_file);
    format!("{stem}.del.{generation}")
}
