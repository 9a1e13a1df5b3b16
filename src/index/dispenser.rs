//! Reader dispenser for the disk index.
//!
//! Opening a disk reader can race with a concurrent commit that is swapping
//! segment files, so opening is retried a bounded number of times with a
//! short backoff before the error is surfaced. The previously dispensed
//! reader stays published while a new one is being opened.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, error, warn};
use parking_lot::RwLock;

use crate::engine::SegmentIndex;
use crate::error::{PilumError, Result};
use crate::index::signature::{IndexSignature, SIGNATURE_FILE};
use crate::reader::{GenerationReader, ReaderDecorator};
use crate::Version;

/// Attempts before an open failure is surfaced to the caller.
pub const INDEX_OPEN_NUM_RETRIES: usize = 5;

/// Backoff between open attempts.
const RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// Caches the current disk reader generation and opens fresh ones.
pub struct ReaderDispenser<D> {
    home: PathBuf,
    engine: SegmentIndex,
    decorator: Arc<dyn ReaderDecorator<D>>,
    current: RwLock<Option<Arc<GenerationReader<D>>>>,
}

impl<D: Send + Sync + 'static> ReaderDispenser<D> {
    /// Create a dispenser and open the initial reader if a signature is
    /// already present. A failed initial open is logged, not fatal; the
    /// dispenser simply starts without a reader.
    pub fn new(
        home: PathBuf,
        engine: SegmentIndex,
        decorator: Arc<dyn ReaderDecorator<D>>,
    ) -> Self {
        let dispenser = ReaderDispenser {
            home,
            engine,
            decorator,
            current: RwLock::new(None),
        };
        if dispenser.home.join(SIGNATURE_FILE).exists() {
            if let Err(e) = dispenser.get_new_reader() {
                error!("cannot open initial disk reader: {e}");
            }
        }
        dispenser
    }

    /// Version recorded with the current reader generation, 0 when no
    /// reader has been opened.
    pub fn current_version(&self) -> Version {
        self.current
            .read()
            .as_ref()
            .map(|r| r.version())
            .unwrap_or(0)
    }

    /// The currently dispensed reader.
    pub fn current_reader(&self) -> Option<Arc<GenerationReader<D>>> {
        self.current.read().clone()
    }

    /// Open a fresh reader and swap it in, retrying transient failures.
    ///
    /// Returns the new reader, or `None` when the index holds no commit
    /// yet. On persistent failure the previous reader stays published and
    /// the error is returned.
    pub fn get_new_reader(&self) -> Result<Option<Arc<GenerationReader<D>>>> {
        let mut last_error: Option<PilumError> = None;

        for attempt in 0..INDEX_OPEN_NUM_RETRIES {
            match self.try_open() {
                Ok(reader) => {
                    // decorate before swapping so readers never race the
                    // one-shot decoration
                    if let Some(reader) = &reader {
                        GenerationReader::decorated(reader)?;
                    }
                    *self.current.write() = reader.clone();
                    return Ok(reader);
                }
                Err(e) => {
                    warn!("disk reader open attempt {} failed: {e}", attempt + 1);
                    last_error = Some(e);
                    thread::sleep(RETRY_BACKOFF);
                }
            }
        }

        error!("problem refreshing disk index, all attempts failed");
        Err(last_error
            .unwrap_or_else(|| PilumError::index("cannot open a new disk reader")))
    }

    fn try_open(&self) -> Result<Option<Arc<GenerationReader<D>>>> {
        let signature = IndexSignature::read(&self.home.join(SIGNATURE_FILE))?
            .ok_or_else(|| PilumError::index("no index signature exists"))?;

        let Some(snapshot) = self.engine.reader()? else {
            debug!("no commit in index directory yet");
            return Ok(None);
        };
        Ok(Some(Arc::new(GenerationReader::open(
            snapshot,
            signature.version,
            None,
            Arc::clone(&self.decorator),
        ))))
    }

    /// Drop the current reader. The next request will open a fresh one.
    pub fn close_reader(&self) {
        *self.current.write() = None;
    }

    /// Release the dispenser's reader.
    pub fn close(&self) {
        self.close_reader();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::StandardAnalyzer;
    use crate::engine::Document;
    use crate::index::signature::INDEX_DIR_NAME;
    use crate::reader::DefaultDecorator;
    use crate::storage::FsDirectory;
    use tempfile::TempDir;

    fn setup(home: &std::path::Path) -> SegmentIndex {
        IndexSignature::new(INDEX_DIR_NAME, 0)
            .save(&home.join(SIGNATURE_FILE))
            .unwrap();
        let dir = FsDirectory::open(home.join(INDEX_DIR_NAME)).unwrap();
        SegmentIndex::new(Arc::new(dir), Arc::new(StandardAnalyzer::new()))
    }

    #[test]
    fn test_empty_index_dispenses_none() {
        let tmp = TempDir::new().unwrap();
        let engine = setup(tmp.path());
        let dispenser =
            ReaderDispenser::new(tmp.path().to_path_buf(), engine, Arc::new(DefaultDecorator));

        assert!(dispenser.current_reader().is_none());
        assert_eq!(dispenser.current_version(), 0);
        assert!(dispenser.get_new_reader().unwrap().is_none());
    }

    #[test]
    fn test_reader_carries_signature_version() {
        let tmp = TempDir::new().unwrap();
        let engine = setup(tmp.path());

        let mut writer = engine.writer().unwrap();
        writer.add_document(1, &Document::new().with_field("body", "x"), None);
        writer.commit().unwrap();
        IndexSignature::new(INDEX_DIR_NAME, 9)
            .save(&tmp.path().join(SIGNATURE_FILE))
            .unwrap();

        let dispenser =
            ReaderDispenser::new(tmp.path().to_path_buf(), engine, Arc::new(DefaultDecorator));
        let reader = dispenser.current_reader().unwrap();
        assert_eq!(reader.version(), 9);
        assert_eq!(dispenser.current_version(), 9);
        assert_eq!(reader.num_rows(), 1);
    }

    #[test]
    fn test_close_reader_clears_cache() {
        let tmp = TempDir::new().unwrap();
        let engine = setup(tmp.path());
        let mut writer = engine.writer().unwrap();
        writer.add_document(1, &Document::new().with_field("body", "x"), None);
        writer.commit().unwrap();

        let dispenser =
            ReaderDispenser::new(tmp.path().to_path_buf(), engine, Arc::new(DefaultDecorator));
        assert!(dispenser.current_reader().is_some());

        dispenser.close_reader();
        assert!(dispenser.current_reader().is_none());

        dispenser.get_new_reader().unwrap();
        assert!(dispenser.current_reader().is_some());
    }
}
