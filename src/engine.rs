//! Minimal immutable-segment index engine.
//!
//! This module provides the indexing substrate the real-time layer sits on:
//! a writer that buffers documents into segments, point-in-time segment
//! snapshots for reading, per-segment tombstones for row deletion, and a
//! deletion policy that keeps commit file sets alive while snapshot exports
//! are in flight. Scoring and query parsing are deliberately absent; the
//! engine answers "which live rows contain this term" and nothing more.

pub mod meta;
pub mod policy;
pub mod segment;
pub mod snapshot;
pub mod writer;

use std::fmt::Debug;
use std::sync::Arc;

use crate::analysis::Analyzer;
use crate::error::Result;
use crate::storage::Directory;

pub use meta::{CommitMeta, SegmentEntry};
pub use policy::{DeletionPolicy, PinnedCommit};
pub use segment::{SegmentBuilder, SegmentData};
pub use snapshot::SegmentSnapshot;
pub use writer::IndexWriter;

/// A document to be indexed: an ordered list of named text fields.
#[derive(Debug, Clone, Default)]
pub struct Document {
    /// Field name / field text pairs, in indexing order.
    pub fields: Vec<(String, String)>,
}

impl Document {
    /// Create an empty document.
    pub fn new() -> Self {
        Document { fields: Vec::new() }
    }

    /// Add a field, builder style.
    pub fn with_field<N: Into<String>, T: Into<String>>(mut self, name: N, text: T) -> Self {
        self.fields.push((name.into(), text.into()));
        self
    }

    /// Text of the first field with the given name, if present.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, t)| t.as_str())
    }
}

/// One index instance over a [`Directory`]: the unit the base index
/// adapters own.
///
/// The index itself is stateless between operations; all state lives in the
/// directory and in the shared [`DeletionPolicy`].
#[derive(Debug, Clone)]
pub struct SegmentIndex {
    directory: Arc<dyn Directory>,
    analyzer: Arc<dyn Analyzer>,
    policy: Arc<DeletionPolicy>,
}

impl SegmentIndex {
    /// Create an index handle over a directory.
    pub fn new(directory: Arc<dyn Directory>, analyzer: Arc<dyn Analyzer>) -> Self {
        SegmentIndex {
            directory,
            analyzer,
            policy: Arc::new(DeletionPolicy::new()),
        }
    }

    /// Open a writer positioned on the latest commit.
    pub fn writer(&self) -> Result<IndexWriter> {
        IndexWriter::open(
            Arc::clone(&self.directory),
            Arc::clone(&self.analyzer),
            Arc::clone(&self.policy),
        )
    }

    /// Open a read-only snapshot of the latest commit. Returns `None` when
    /// the directory holds no commit yet.
    pub fn reader(&self) -> Result<Option<SegmentSnapshot>> {
        SegmentSnapshot::open(self.directory.as_ref())
    }

    /// Whether at least one commit exists.
    pub fn exists(&self) -> Result<bool> {
        Ok(meta::latest_generation(self.directory.as_ref())?.is_some())
    }

    /// The directory backing this index.
    pub fn directory(&self) -> &Arc<dyn Directory> {
        &self.directory
    }

    /// The default analyzer for documents without an override.
    pub fn analyzer(&self) -> &Arc<dyn Analyzer> {
        &self.analyzer
    }

    /// The commit retention policy shared by all writers of this index.
    pub fn policy(&self) -> &Arc<DeletionPolicy> {
        &self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::StandardAnalyzer;
    use crate::storage::RamDirectory;

    #[test]
    fn test_document_builder() {
        let doc = Document::new()
            .with_field("title", "hello")
            .with_field("body", "hello world");

        assert_eq!(doc.field("title"), Some("hello"));
        assert_eq!(doc.field("body"), Some("hello world"));
        assert_eq!(doc.field("missing"), None);
    }

    #[test]
    fn test_empty_index_has_no_reader() {
        let index = SegmentIndex::new(
            Arc::new(RamDirectory::new()),
            Arc::new(StandardAnalyzer::new()),
        );

        assert!(!index.exists().unwrap());
        assert!(index.reader().unwrap().is_none());
    }
}
