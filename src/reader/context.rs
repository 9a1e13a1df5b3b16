//! Per-query reader context: one generation plus its delete set.

use std::sync::Arc;

use ahash::AHashSet;

use crate::reader::generation::GenerationReader;
use crate::{RowId, Uid};

/// What searchers receive for each generation of a composed read view: the
/// generation reader, its decorated domain view and the delete set that
/// hides rows superseded by newer generations.
///
/// The context is a cheap value; the heavy state is shared behind `Arc`s.
/// A context keeps its generation alive for as long as it is held, so a
/// query that obtained a view before a rotation keeps reading a fully
/// consistent generation even after newer snapshots are published.
#[derive(Debug, Clone)]
pub struct ReaderContext<D> {
    reader: Arc<GenerationReader<D>>,
    decorated: Arc<D>,
    delete_set: Option<Arc<AHashSet<Uid>>>,
}

impl<D> ReaderContext<D> {
    /// Bundle a generation with its per-view delete set.
    pub fn new(
        reader: Arc<GenerationReader<D>>,
        decorated: Arc<D>,
        delete_set: Option<Arc<AHashSet<Uid>>>,
    ) -> Self {
        ReaderContext {
            reader,
            decorated,
            delete_set,
        }
    }

    /// The raw generation reader.
    pub fn reader(&self) -> &Arc<GenerationReader<D>> {
        &self.reader
    }

    /// The decorated domain view.
    pub fn decorated(&self) -> &Arc<D> {
        &self.decorated
    }

    /// The delete set attached to this view, if any.
    pub fn delete_set(&self) -> Option<&AHashSet<Uid>> {
        self.delete_set.as_deref()
    }

    /// Whether this view hides any rows at all.
    pub fn has_duplicates(&self) -> bool {
        self.delete_set.as_ref().map(|s| !s.is_empty()).unwrap_or(false)
    }

    /// Whether `row` is visible in this view.
    pub fn is_visible(&self, row: RowId) -> bool {
        self.reader.is_visible(row, self.delete_set())
    }

    /// Uid stored at `row`, or the absent sentinel.
    pub fn uid(&self, row: RowId) -> Uid {
        self.reader.uid(row)
    }

    /// Visible rows containing `term` in `field`, in underlying order.
    pub fn term_rows(&self, field: &str, term: &str) -> Vec<RowId> {
        self.reader.term_rows(field, term, self.delete_set())
    }

    /// Number of rows visible in this view.
    pub fn num_visible_rows(&self) -> u32 {
        self.reader.num_visible_rows(self.delete_set())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::StandardAnalyzer;
    use crate::engine::{Document, SegmentIndex};
    use crate::reader::decorator::{DefaultDecorator, DefaultReader};
    use crate::storage::RamDirectory;

    fn context(delete: Option<AHashSet<Uid>>) -> ReaderContext<DefaultReader> {
        let index = SegmentIndex::new(
            Arc::new(RamDirectory::new()),
            Arc::new(StandardAnalyzer::new()),
        );
        let mut writer = index.writer().unwrap();
        writer.add_document(1, &Document::new().with_field("body", "apple"), None);
        writer.add_document(2, &Document::new().with_field("body", "apple pie"), None);
        writer.commit().unwrap();

        let reader = Arc::new(GenerationReader::open(
            index.reader().unwrap().unwrap(),
            1,
            None,
            Arc::new(DefaultDecorator),
        ));
        let decorated = GenerationReader::decorated(&reader).unwrap();
        ReaderContext::new(reader, decorated, delete.map(Arc::new))
    }

    #[test]
    fn test_context_without_deletes() {
        let ctx = context(None);
        assert!(!ctx.has_duplicates());
        assert_eq!(ctx.num_visible_rows(), 2);
        assert_eq!(ctx.term_rows("body", "apple"), vec![0, 1]);
    }

    #[test]
    fn test_context_applies_delete_set() {
        let mut del = AHashSet::new();
        del.insert(1);
        let ctx = context(Some(del));

        assert!(ctx.has_duplicates());
        assert!(!ctx.is_visible(0));
        assert!(ctx.is_visible(1));
        assert_eq!(ctx.term_rows("body", "apple"), vec![1]);
        assert_eq!(ctx.num_visible_rows(), 1);
    }
}
