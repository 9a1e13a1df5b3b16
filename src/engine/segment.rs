//! Segment data and the in-memory segment builder.

use std::collections::BTreeMap;

use bit_vec::BitVec;
use serde::{Deserialize, Serialize};

use crate::analysis::Analyzer;
use crate::engine::Document;
use crate::{RowId, Uid};

/// The immutable contents of one segment.
///
/// Row ids are local to the segment. Posting lists are sorted ascending and
/// contain each row at most once per term.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SegmentData {
    /// Uid of each row, indexed by local row id.
    pub uids: Vec<Uid>,

    /// field name -> term -> sorted local row ids.
    pub postings: BTreeMap<String, BTreeMap<String, Vec<RowId>>>,
}

impl SegmentData {
    /// Number of rows in this segment, deleted or not.
    pub fn num_rows(&self) -> u32 {
        self.uids.len() as u32
    }
}

/// Accumulates documents into a [`SegmentData`].
#[derive(Debug)]
pub struct SegmentBuilder {
    uids: Vec<Uid>,
    postings: BTreeMap<String, BTreeMap<String, Vec<RowId>>>,
}

impl SegmentBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        SegmentBuilder {
            uids: Vec::new(),
            postings: BTreeMap::new(),
        }
    }

    /// Whether no document has been added yet.
    pub fn is_empty(&self) -> bool {
        self.uids.is_empty()
    }

    /// Number of buffered rows.
    pub fn num_rows(&self) -> u32 {
        self.uids.len() as u32
    }

    /// Add one document, returning its local row id.
    pub fn add_document(&mut self, uid: Uid, document: &Document, analyzer: &dyn Analyzer) -> RowId {
        let row = self.uids.len() as RowId;
        self.uids.push(uid);

        for (field, text) in &document.fields {
            let terms = analyzer.analyze(text);
            let field_postings = self.postings.entry(field.clone()).or_default();
            for term in terms {
                let rows = field_postings.entry(term).or_default();
                // a term may occur several times in one document
                if rows.last() != Some(&row) {
                    rows.push(row);
                }
            }
        }
        row
    }

    /// Consume the builder, producing segment data.
    pub fn build(self) -> SegmentData {
        SegmentData {
            uids: self.uids,
            postings: self.postings,
        }
    }
}

impl Default for SegmentBuilder {
    fn default() -> Self {
        SegmentBuilder::new()
    }
}

/// Merges segment views into one, dropping tombstoned rows and remapping
/// the surviving postings. Views are concatenated in order, so merged row
/// ids preserve the original global ordering.
pub(crate) fn merge_segment_views(views: &[(&SegmentData, &BitVec)]) -> SegmentData {
    let mut uids = Vec::new();
    let mut row_maps: Vec<Vec<Option<RowId>>> = Vec::with_capacity(views.len());

    for (data, deleted) in views {
        let mut map = vec![None; data.uids.len()];
        for (local, uid) in data.uids.iter().enumerate() {
            if deleted.get(local).unwrap_or(false) {
                continue;
            }
            map[local] = Some(uids.len() as RowId);
            uids.push(*uid);
        }
        row_maps.push(map);
    }

    let mut postings: BTreeMap<String, BTreeMap<String, Vec<RowId>>> = BTreeMap::new();
    for (view_idx, (data, _)) in views.iter().enumerate() {
        let map = &row_maps[view_idx];
        for (field, terms) in &data.postings {
            let field_postings = postings.entry(field.clone()).or_default();
            for (term, rows) in terms {
                let out = field_postings.entry(term.clone()).or_default();
                for row in rows {
                    if let Some(new_row) = map[*row as usize] {
                        out.push(new_row);
                    }
                }
            }
        }
    }
    // drop terms whose rows were all tombstoned
    for terms in postings.values_mut() {
        terms.retain(|_, rows| !rows.is_empty());
    }
    postings.retain(|_, terms| !terms.is_empty());

    SegmentData { uids, postings }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::StandardAnalyzer;

    fn doc(body: &str) -> Document {
        Document::new().with_field("body", body)
    }

    #[test]
    fn test_builder_assigns_sequential_rows() {
        let analyzer = StandardAnalyzer::new();
        let mut builder = SegmentBuilder::new();

        assert_eq!(builder.add_document(10, &doc("alpha beta"), &analyzer), 0);
        assert_eq!(builder.add_document(20, &doc("beta gamma"), &analyzer), 1);

        let data = builder.build();
        assert_eq!(data.uids, vec![10, 20]);
        assert_eq!(data.postings["body"]["beta"], vec![0, 1]);
        assert_eq!(data.postings["body"]["alpha"], vec![0]);
        assert_eq!(data.postings["body"]["gamma"], vec![1]);
    }

    #[test]
    fn test_repeated_term_recorded_once() {
        let analyzer = StandardAnalyzer::new();
        let mut builder = SegmentBuilder::new();
        builder.add_document(1, &doc("echo echo echo"), &analyzer);

        let data = builder.build();
        assert_eq!(data.postings["body"]["echo"], vec![0]);
    }

    #[test]
    fn test_merge_drops_deleted_rows() {
        let analyzer = StandardAnalyzer::new();

        let mut b1 = SegmentBuilder::new();
        b1.add_document(1, &doc("alpha"), &analyzer);
        b1.add_document(2, &doc("beta"), &analyzer);
        let s1 = b1.build();
        let mut d1 = BitVec::from_elem(2, false);
        d1.set(0, true); // uid 1 deleted

        let mut b2 = SegmentBuilder::new();
        b2.add_document(3, &doc("alpha beta"), &analyzer);
        let s2 = b2.build();
        let d2 = BitVec::from_elem(1, false);

        let merged = merge_segment_views(&[(&s1, &d1), (&s2, &d2)]);
        assert_eq!(merged.uids, vec![2, 3]);
        assert_eq!(merged.postings["body"]["beta"], vec![0, 1]);
        assert_eq!(merged.postings["body"]["alpha"], vec![1]);
    }

    #[test]
    fn test_merge_prunes_empty_terms() {
        let analyzer = StandardAnalyzer::new();
        let mut b = SegmentBuilder::new();
        b.add_document(1, &doc("solo"), &analyzer);
        let s = b.build();
        let mut d = BitVec::from_elem(1, false);
        d.set(0, true);

        let merged = merge_segment_views(&[(&s, &d)]);
        assert!(merged.uids.is_empty());
        assert!(merged.postings.is_empty());
    }
}
