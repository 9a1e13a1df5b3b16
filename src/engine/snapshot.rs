//! Point-in-time read view over one commit generation.

use std::sync::Arc;

use bit_vec::BitVec;

use crate::engine::meta::{self, CommitMeta};
use crate::engine::segment::SegmentData;
use crate::error::{PilumError, Result};
use crate::storage::Directory;
use crate::{ABSENT_UID, RowId, Uid};

/// One segment loaded into a snapshot.
#[derive(Debug, Clone)]
pub struct LoadedSegment {
    /// Immutable segment contents.
    pub data: Arc<SegmentData>,

    /// Tombstones as of the snapshot's commit.
    pub deleted: BitVec,

    /// Global row id of this segment's first row.
    pub base: RowId,

    /// Name of the segment data file.
    pub data_file: String,
}

impl LoadedSegment {
    /// Number of live rows in this segment.
    pub fn num_live_rows(&self) -> u32 {
        let deleted = self.deleted.iter().filter(|d| *d).count() as u32;
        self.data.num_rows() - deleted
    }
}

/// An immutable view of the index at one commit generation.
///
/// Rows are numbered globally across segments in commit order. Tombstoned
/// rows stay addressable (their uid reads as the absent sentinel) until a
/// merge rewrites the segment.
#[derive(Debug, Clone)]
pub struct SegmentSnapshot {
    generation: u64,
    segments: Vec<LoadedSegment>,
    num_rows: u32,
}

impl SegmentSnapshot {
    /// Open a snapshot of the latest commit. Returns `None` when the
    /// directory holds no commit.
    pub fn open(dir: &dyn Directory) -> Result<Option<SegmentSnapshot>> {
        let Some(generation) = meta::latest_generation(dir)? else {
            return Ok(None);
        };
        let meta = CommitMeta::load(dir, generation)?;
        Ok(Some(Self::open_commit(dir, &meta)?))
    }

    /// A snapshot of nothing: no segments, no rows.
    pub fn empty() -> SegmentSnapshot {
        SegmentSnapshot {
            generation: 0,
            segments: Vec::new(),
            num_rows: 0,
        }
    }

    /// Open a snapshot of one specific commit record.
    pub fn open_commit(dir: &dyn Directory, meta: &CommitMeta) -> Result<SegmentSnapshot> {
        let mut segments = Vec::with_capacity(meta.segments.len());
        let mut base: RowId = 0;

        for entry in &meta.segments {
            let raw = dir.read_file(&entry.data_file)?;
            let data: SegmentData = bincode::deserialize(&raw).map_err(|e| {
                PilumError::corruption(format!("cannot decode segment {}: {e}", entry.data_file))
            })?;
            if data.num_rows() != entry.rows {
                return Err(PilumError::corruption(format!(
                    "segment {} holds {} rows, commit record says {}",
                    entry.data_file,
                    data.num_rows(),
                    entry.rows
                )));
            }

            let deleted = match &entry.del_file {
                Some(del_file) => {
                    let raw = dir.read_file(del_file)?;
                    let mut bits = BitVec::from_bytes(&raw);
                    bits.truncate(entry.rows as usize);
                    bits
                }
                None => BitVec::from_elem(entry.rows as usize, false),
            };

            segments.push(LoadedSegment {
                data: Arc::new(data),
                deleted,
                base,
                data_file: entry.data_file.clone(),
            });
            base += entry.rows;
        }

        Ok(SegmentSnapshot {
            generation: meta.generation,
            segments,
            num_rows: base,
        })
    }

    /// The commit generation this snapshot reads.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Total number of rows, deleted or not.
    pub fn num_rows(&self) -> u32 {
        self.num_rows
    }

    /// Number of rows not tombstoned.
    pub fn num_live_rows(&self) -> u32 {
        self.segments.iter().map(|s| s.num_live_rows()).sum()
    }

    /// The loaded segments, in global row order.
    pub fn segments(&self) -> &[LoadedSegment] {
        &self.segments
    }

    /// Locate a global row: segment index plus local row id.
    pub fn locate(&self, row: RowId) -> Option<(usize, RowId)> {
        if row >= self.num_rows {
            return None;
        }
        // segments are ordered by base; partition_point finds the owner
        let idx = self
            .segments
            .partition_point(|s| s.base + s.data.num_rows() <= row);
        let segment = &self.segments[idx];
        Some((idx, row - segment.base))
    }

    /// Whether a row is tombstoned. Out-of-bounds rows read as deleted.
    pub fn is_row_deleted(&self, row: RowId) -> bool {
        match self.locate(row) {
            Some((idx, local)) => self.segments[idx].deleted.get(local as usize).unwrap_or(true),
            None => true,
        }
    }

    /// Uid stored at a row, or the absent sentinel for tombstoned and
    /// out-of-bounds rows.
    pub fn uid(&self, row: RowId) -> Uid {
        match self.locate(row) {
            Some((idx, local)) => {
                let segment = &self.segments[idx];
                if segment.deleted.get(local as usize).unwrap_or(true) {
                    ABSENT_UID
                } else {
                    segment.data.uids[local as usize]
                }
            }
            None => ABSENT_UID,
        }
    }

    /// Dense uid-per-row array; tombstoned rows carry the absent sentinel.
    pub fn uids(&self) -> Vec<Uid> {
        let mut uids = Vec::with_capacity(self.num_rows as usize);
        for segment in &self.segments {
            for (local, uid) in segment.data.uids.iter().enumerate() {
                if segment.deleted.get(local).unwrap_or(true) {
                    uids.push(ABSENT_UID);
                } else {
                    uids.push(*uid);
                }
            }
        }
        uids
    }

    /// Global row ids of live rows containing `term` in `field`, ascending.
    pub fn term_rows(&self, field: &str, term: &str) -> Vec<RowId> {
        let mut rows = Vec::new();
        for segment in &self.segments {
            if let Some(local_rows) = segment
                .data
                .postings
                .get(field)
                .and_then(|terms| terms.get(term))
            {
                for local in local_rows {
                    if !segment.deleted.get(*local as usize).unwrap_or(true) {
                        rows.push(segment.base + local);
                    }
                }
            }
        }
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::StandardAnalyzer;
    use crate::engine::{Document, SegmentIndex};
    use crate::storage::RamDirectory;

    fn sample_index() -> SegmentIndex {
        let index = SegmentIndex::new(
            Arc::new(RamDirectory::new()),
            Arc::new(StandardAnalyzer::new()),
        );
        let mut writer = index.writer().unwrap();
        writer.add_document(100, &Document::new().with_field("body", "red apple"), None);
        writer.add_document(200, &Document::new().with_field("body", "green apple"), None);
        writer.commit().unwrap();

        let mut writer = index.writer().unwrap();
        writer.add_document(300, &Document::new().with_field("body", "red grape"), None);
        writer.commit().unwrap();
        index
    }

    #[test]
    fn test_rows_span_segments() {
        let index = sample_index();
        let snapshot = index.reader().unwrap().unwrap();

        assert_eq!(snapshot.num_rows(), 3);
        assert_eq!(snapshot.segments().len(), 2);
        assert_eq!(snapshot.uid(0), 100);
        assert_eq!(snapshot.uid(2), 300);
        assert_eq!(snapshot.uid(99), ABSENT_UID);
        assert_eq!(snapshot.uids(), vec![100, 200, 300]);
    }

    #[test]
    fn test_term_rows_across_segments() {
        let index = sample_index();
        let snapshot = index.reader().unwrap().unwrap();

        assert_eq!(snapshot.term_rows("body", "red"), vec![0, 2]);
        assert_eq!(snapshot.term_rows("body", "apple"), vec![0, 1]);
        assert!(snapshot.term_rows("body", "kiwi").is_empty());
        assert!(snapshot.term_rows("title", "red").is_empty());
    }

    #[test]
    fn test_tombstoned_row_hidden() {
        let index = sample_index();
        let mut writer = index.writer().unwrap();
        writer.delete_row(0).unwrap();
        writer.commit().unwrap();

        let snapshot = index.reader().unwrap().unwrap();
        assert_eq!(snapshot.num_rows(), 3);
        assert_eq!(snapshot.num_live_rows(), 2);
        assert!(snapshot.is_row_deleted(0));
        assert_eq!(snapshot.uid(0), ABSENT_UID);
        assert_eq!(snapshot.uids(), vec![ABSENT_UID, 200, 300]);
        assert_eq!(snapshot.term_rows("body", "red"), vec![2]);
    }
}
