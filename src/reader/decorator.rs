//! Reader decoration: turning a raw generation reader into the domain
//! specific read handle searchers actually use.

use std::fmt::Debug;
use std::sync::Arc;

use crate::error::Result;
use crate::reader::generation::GenerationReader;

/// Transforms a raw generation reader into a domain reader of type `D`.
///
/// Decoration runs lazily, at most once per generation, and the result is
/// cached for the generation's lifetime.
pub trait ReaderDecorator<D>: Send + Sync + Debug {
    /// Build the decorated view for one generation.
    fn decorate(&self, reader: &Arc<GenerationReader<D>>) -> Result<D>;
}

/// The identity decoration: the domain reader is just a handle back onto
/// the generation itself.
#[derive(Debug, Clone, Default)]
pub struct DefaultDecorator;

/// Decorated view produced by [`DefaultDecorator`].
#[derive(Debug, Clone)]
pub struct DefaultReader {
    reader: Arc<GenerationReader<DefaultReader>>,
}

impl DefaultReader {
    /// The underlying generation reader.
    pub fn reader(&self) -> &Arc<GenerationReader<DefaultReader>> {
        &self.reader
    }
}

impl ReaderDecorator<DefaultReader> for DefaultDecorator {
    fn decorate(&self, reader: &Arc<GenerationReader<DefaultReader>>) -> Result<DefaultReader> {
        Ok(DefaultReader {
            reader: Arc::clone(reader),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::StandardAnalyzer;
    use crate::engine::{Document, SegmentIndex};
    use crate::storage::RamDirectory;

    #[test]
    fn test_default_decorator_wraps_reader() {
        let index = SegmentIndex::new(
            Arc::new(RamDirectory::new()),
            Arc::new(StandardAnalyzer::new()),
        );
        let mut writer = index.writer().unwrap();
        writer.add_document(1, &Document::new().with_field("body", "x"), None);
        writer.commit().unwrap();

        let reader = Arc::new(GenerationReader::open(
            index.reader().unwrap().unwrap(),
            1,
            None,
            Arc::new(DefaultDecorator),
        ));
        let decorated = GenerationReader::decorated(&reader).unwrap();
        assert!(Arc::ptr_eq(decorated.reader(), &reader));
    }
}
