//! Commit records: the durable list of segments making up one generation.

use serde::{Deserialize, Serialize};

use crate::error::{PilumError, Result};
use crate::storage::Directory;

/// Prefix of segment data and tombstone files.
pub const SEGMENT_FILE_PREFIX: &str = "seg_";

/// Prefix of commit record files.
pub const COMMIT_FILE_PREFIX: &str = "segments_";

/// One segment as referenced from a commit record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SegmentEntry {
    /// Name of the segment data file.
    pub data_file: String,

    /// Number of rows in the segment, deleted or not.
    pub rows: u32,

    /// Name of the tombstone file, if any row is deleted.
    pub del_file: Option<String>,
}

/// A commit record. Writing a new record under the next generation number
/// publishes a new point-in-time view of the index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommitMeta {
    /// Commit generation, starting at 1.
    pub generation: u64,

    /// Segments in global row order.
    pub segments: Vec<SegmentEntry>,
}

impl CommitMeta {
    /// Load the commit record for `generation`.
    pub fn load(dir: &dyn Directory, generation: u64) -> Result<CommitMeta> {
        let data = dir.read_file(&commit_file_name(generation))?;
        let meta: CommitMeta = serde_json::from_slice(&data)?;
        if meta.generation != generation {
            return Err(PilumError::corruption(format!(
                "commit record {} claims generation {}",
                commit_file_name(generation),
                meta.generation
            )));
        }
        Ok(meta)
    }

    /// Persist this commit record.
    pub fn save(&self, dir: &dyn Directory) -> Result<()> {
        let data = serde_json::to_vec_pretty(self)?;
        dir.write_file(&commit_file_name(self.generation), &data)
    }

    /// All files referenced by this commit, including the record itself.
    pub fn files(&self) -> Vec<String> {
        let mut files = vec![commit_file_name(self.generation)];
        for entry in &self.segments {
            files.push(entry.data_file.clone());
            if let Some(del) = &entry.del_file {
                files.push(del.clone());
            }
        }
        files
    }

    /// Total number of rows across all segments.
    pub fn num_rows(&self) -> u32 {
        self.segments.iter().map(|e| e.rows).sum()
    }
}

/// File name of the commit record for a generation.
pub fn commit_file_name(generation: u64) -> String {
    format!("{COMMIT_FILE_PREFIX}{generation}.json")
}

/// Parses a generation number out of a commit record file name.
pub fn parse_commit_file_name(name: &str) -> Option<u64> {
    name.strip_prefix(COMMIT_FILE_PREFIX)?
        .strip_suffix(".json")?
        .parse()
        .ok()
}

/// The highest commit generation present in the directory, if any.
pub fn latest_generation(dir: &dyn Directory) -> Result<Option<u64>> {
    let mut latest = None;
    for name in dir.list_files()? {
        if let Some(generation) = parse_commit_file_name(&name) {
            latest = latest.max(Some(generation));
        }
    }
    Ok(latest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::RamDirectory;

    #[test]
    fn test_commit_file_name_roundtrip() {
        assert_eq!(commit_file_name(7), "segments_7.json");
        assert_eq!(parse_commit_file_name("segments_7.json"), Some(7));
        assert_eq!(parse_commit_file_name("segments_x.json"), None);
        assert_eq!(parse_commit_file_name("seg_abc.dat"), None);
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = RamDirectory::new();
        let meta = CommitMeta {
            generation: 3,
            segments: vec![SegmentEntry {
                data_file: "seg_a.dat".to_string(),
                rows: 12,
                del_file: Some("seg_a.del.3".to_string()),
            }],
        };
        meta.save(&dir).unwrap();

        let loaded = CommitMeta::load(&dir, 3).unwrap();
        assert_eq!(loaded, meta);
        assert_eq!(loaded.num_rows(), 12);
        assert_eq!(
            loaded.files(),
            vec!["segments_3.json", "seg_a.dat", "seg_a.del.3"]
        );
    }

    #[test]
    fn test_latest_generation() {
        let dir = RamDirectory::new();
        assert_eq!(latest_generation(&dir).unwrap(), None);

        for generation in [1, 3, 2] {
            CommitMeta {
                generation,
                segments: Vec::new(),
            }
            .save(&dir)
            .unwrap();
        }
        assert_eq!(latest_generation(&dir).unwrap(), Some(3));
    }
}
