//! Commit retention policy.
//!
//! Each commit supersedes the previous one, but a commit whose files are
//! being streamed out (snapshot export) must survive until the stream is
//! done. The policy keeps a refcount per pinned generation and garbage
//! collects everything else after each commit.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use log::warn;
use parking_lot::Mutex;

use crate::engine::meta::{self, CommitMeta};
use crate::error::Result;
use crate::storage::Directory;

/// Decides which commit generations stay on storage.
#[derive(Debug, Default)]
pub struct DeletionPolicy {
    /// generation -> number of outstanding pins.
    pinned: Mutex<HashMap<u64, usize>>,
}

impl DeletionPolicy {
    /// Create a policy with no pinned commits.
    pub fn new() -> Self {
        DeletionPolicy {
            pinned: Mutex::new(HashMap::new()),
        }
    }

    /// Called after a new commit record has been written. Deletes index
    /// files belonging to generations that are neither the latest nor
    /// pinned. Deletion failures are logged and skipped; a leftover file is
    /// reclaimed by a later commit.
    pub fn commit(&self, dir: &dyn Directory, latest: &CommitMeta) -> Result<()> {
        let pinned = self.pinned.lock();

        let mut retained: HashSet<u64> = pinned.keys().copied().collect();
        retained.insert(latest.generation);

        let mut referenced: HashSet<String> = HashSet::new();
        for generation in &retained {
            let meta = if *generation == latest.generation {
                latest.clone()
            } else {
                match CommitMeta::load(dir, *generation) {
                    Ok(meta) => meta,
                    Err(e) => {
                        warn!("cannot load pinned commit {generation}: {e}");
                        continue;
                    }
                }
            };
            referenced.extend(meta.files());
        }

        for name in dir.list_files()? {
            let is_index_file = name.starts_with(meta::SEGMENT_FILE_PREFIX)
                || name.starts_with(meta::COMMIT_FILE_PREFIX);
            if is_index_file && !referenced.contains(&name) {
                if let Err(e) = dir.delete_file(&name) {
                    warn!("cannot delete obsolete file {name}: {e}");
                }
            }
        }
        Ok(())
    }

    /// Pin the latest commit, keeping its file set alive until the returned
    /// handle is dropped. Returns `None` when no commit exists yet.
    pub fn pin_latest(this: &Arc<Self>, dir: &dyn Directory) -> Result<Option<PinnedCommit>> {
        let mut pinned = this.pinned.lock();

        let Some(generation) = meta::latest_generation(dir)? else {
            return Ok(None);
        };
        let meta = CommitMeta::load(dir, generation)?;
        *pinned.entry(generation).or_insert(0) += 1;

        Ok(Some(PinnedCommit {
            policy: Arc::clone(this),
            meta,
        }))
    }

    fn unpin(&self, generation: u64) {
        let mut pinned = self.pinned.lock();
        if let Some(count) = pinned.get_mut(&generation) {
            *count -= 1;
            if *count == 0 {
                pinned.remove(&generation);
            }
        }
    }

    /// Number of generations currently pinned.
    pub fn num_pinned(&self) -> usize {
        self.pinned.lock().len()
    }
}

/// Keeps one commit generation's files alive while in scope.
#[derive(Debug)]
pub struct PinnedCommit {
    policy: Arc<DeletionPolicy>,
    meta: CommitMeta,
}

impl PinnedCommit {
    /// The pinned commit record.
    pub fn meta(&self) -> &CommitMeta {
        &self.meta
    }

    /// The pinned generation number.
    pub fn generation(&self) -> u64 {
        self.meta.generation
    }

    /// Files belonging to the pinned commit, record included.
    pub fn files(&self) -> Vec<String> {
        self.meta.files()
    }
}

impl Drop for PinnedCommit {
    fn drop(&mut self) {
        self.policy.unpin(self.meta.generation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::StandardAnalyzer;
    use crate::engine::{Document, SegmentIndex};
    use crate::storage::RamDirectory;

    fn new_index() -> SegmentIndex {
        SegmentIndex::new(
            Arc::new(RamDirectory::new()),
            Arc::new(StandardAnalyzer::new()),
        )
    }

    fn commit_doc(index: &SegmentIndex, uid: i32) {
        let mut writer = index.writer().unwrap();
        writer.add_document(uid, &Document::new().with_field("body", "text"), None);
        writer.commit().unwrap();
    }

    #[test]
    fn test_old_commits_collected() {
        let index = new_index();
        commit_doc(&index, 1);
        commit_doc(&index, 2);

        let files = index.directory().list_files().unwrap();
        let commits: Vec<_> = files
            .iter()
            .filter(|f| f.starts_with(meta::COMMIT_FILE_PREFIX))
            .collect();
        assert_eq!(commits.len(), 1, "only the latest commit should remain");
        assert_eq!(commits[0], "segments_2.json");
    }

    #[test]
    fn test_pinned_commit_survives() {
        let index = new_index();
        commit_doc(&index, 1);

        let pin = DeletionPolicy::pin_latest(index.policy(), index.directory().as_ref())
            .unwrap()
            .unwrap();
        assert_eq!(pin.generation(), 1);

        commit_doc(&index, 2);

        let files = index.directory().list_files().unwrap();
        assert!(files.contains(&"segments_1.json".to_string()));
        assert!(files.contains(&"segments_2.json".to_string()));

        drop(pin);
        assert_eq!(index.policy().num_pinned(), 0);

        // next commit reclaims the no-longer-pinned generation
        commit_doc(&index, 3);
        let files = index.directory().list_files().unwrap();
        assert!(!files.contains(&"segments_1.json".to_string()));
    }
}
