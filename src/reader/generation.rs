//! Deduplicating overlay over one immutable index generation.

use std::fmt;
use std::sync::{Arc, OnceLock};

use ahash::AHashSet;
use parking_lot::Mutex;

use crate::engine::SegmentSnapshot;
use crate::error::Result;
use crate::reader::decorator::ReaderDecorator;
use crate::uid::{UidMapper, UidRowSet};
use crate::{ABSENT_UID, RowId, Uid, Version};

/// A read view of one generation that hides rows superseded by newer
/// generations.
///
/// The overlay is the single place where "logically deleted but physically
/// present" rows disappear: a row is visible iff it is live in the
/// underlying segments and its uid is absent from the delete set supplied
/// with the read. Delete sets are per-query context, passed explicitly into
/// every operation, so one generation object can serve many concurrent
/// readers each with their own view.
///
/// The generation also owns its lazily built [`UidMapper`] and the one-shot
/// decorated view produced by the injected [`ReaderDecorator`].
pub struct GenerationReader<D> {
    snapshot: SegmentSnapshot,
    uids: Vec<Uid>,
    version: Version,

    /// Uids superseded within this generation's own lifetime. Folded into
    /// older generations' delete sets when composing a read view.
    modified: Option<AHashSet<Uid>>,

    mapper: OnceLock<Arc<UidMapper>>,

    decorator: Arc<dyn ReaderDecorator<D>>,
    decorated: OnceLock<Arc<D>>,
    decoration_lock: Mutex<()>,
}

impl<D> GenerationReader<D> {
    /// Wrap a snapshot. `modified` carries the uids this generation has
    /// superseded so far; `version` is the owning adapter's version at open
    /// time.
    pub fn open(
        snapshot: SegmentSnapshot,
        version: Version,
        modified: Option<AHashSet<Uid>>,
        decorator: Arc<dyn ReaderDecorator<D>>,
    ) -> Self {
        let uids = snapshot.uids();
        GenerationReader {
            snapshot,
            uids,
            version,
            modified,
            mapper: OnceLock::new(),
            decorator,
            decorated: OnceLock::new(),
            decoration_lock: Mutex::new(()),
        }
    }

    /// The wrapped snapshot.
    pub fn snapshot(&self) -> &SegmentSnapshot {
        &self.snapshot
    }

    /// Version of the owning adapter when this reader was opened.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Physical row count, tombstoned rows included.
    pub fn num_rows(&self) -> u32 {
        self.uids.len() as u32
    }

    /// Dense uid-per-row array; tombstoned rows carry the absent sentinel.
    pub fn uids(&self) -> &[Uid] {
        &self.uids
    }

    /// Uid stored at `row`, or the absent sentinel.
    pub fn uid(&self, row: RowId) -> Uid {
        self.uids
            .get(row as usize)
            .copied()
            .unwrap_or(ABSENT_UID)
    }

    /// The uids this generation has superseded, if any.
    pub fn modified_set(&self) -> Option<&AHashSet<Uid>> {
        self.modified.as_ref()
    }

    /// The uid mapper for this generation, built on first use.
    pub fn uid_mapper(&self) -> Arc<UidMapper> {
        self.mapper
            .get_or_init(|| Arc::new(UidMapper::new(&self.uids)))
            .clone()
    }

    /// Whether `uid` is hidden by the supplied delete set.
    pub fn is_superseded(&self, uid: Uid, delete_set: Option<&AHashSet<Uid>>) -> bool {
        match delete_set {
            Some(set) => set.contains(&uid),
            None => false,
        }
    }

    /// Whether `row` is visible: live in the underlying segments and not
    /// superseded by the supplied delete set.
    pub fn is_visible(&self, row: RowId, delete_set: Option<&AHashSet<Uid>>) -> bool {
        let uid = self.uid(row);
        if uid == ABSENT_UID {
            return false;
        }
        !self.is_superseded(uid, delete_set)
    }

    /// Visible rows containing `term` in `field`, in underlying order.
    pub fn term_rows(
        &self,
        field: &str,
        term: &str,
        delete_set: Option<&AHashSet<Uid>>,
    ) -> Vec<RowId> {
        let rows = self.snapshot.term_rows(field, term);
        match delete_set {
            Some(set) if !set.is_empty() => rows
                .into_iter()
                .filter(|&row| !set.contains(&self.uid(row)))
                .collect(),
            _ => rows,
        }
    }

    /// Number of rows visible under the supplied delete set.
    pub fn num_visible_rows(&self, delete_set: Option<&AHashSet<Uid>>) -> u32 {
        self.uids
            .iter()
            .filter(|&&uid| uid != ABSENT_UID && !self.is_superseded(uid, delete_set))
            .count() as u32
    }

    /// Resolve an external uid list to rows of this generation.
    pub fn rows_for_uids(&self, uids: &[Uid]) -> UidRowSet {
        UidRowSet::from_uids(uids, &self.uid_mapper())
    }

    /// The decorated view of this generation, built exactly once.
    pub fn decorated(this: &Arc<Self>) -> Result<Arc<D>> {
        if let Some(decorated) = this.decorated.get() {
            return Ok(Arc::clone(decorated));
        }
        let _guard = this.decoration_lock.lock();
        if let Some(decorated) = this.decorated.get() {
            return Ok(Arc::clone(decorated));
        }
        let decorated = Arc::new(this.decorator.decorate(this)?);
        let _ = this.decorated.set(Arc::clone(&decorated));
        Ok(decorated)
    }
}

impl<D> fmt::Debug for GenerationReader<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationReader")
            .field("generation", &self.snapshot.generation())
            .field("version", &self.version)
            .field("num_rows", &self.num_rows())
            .field(
                "modified",
                &self.modified.as_ref().map(|m| m.len()).unwrap_or(0),
            )
            .finish()
    }
}
