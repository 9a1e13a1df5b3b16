//! Buffer rotation manager.
//!
//! Owns one disk index and up to two memory indexes, "A" and "B". Exactly
//! one memory index is writable at a time; the other, when present, is the
//! read-only generation being drained to disk. The published generation set
//! is an immutable snapshot value swapped atomically, so concurrent readers
//! always compose a fully consistent view.

use std::path::PathBuf;
use std::sync::Arc;

use ahash::AHashSet;
use log::info;
use parking_lot::{Mutex, RwLock};

use crate::analysis::Analyzer;
use crate::error::Result;
use crate::index::{DiskIndex, RamIndex, SearchIndex};
use crate::reader::{GenerationReader, ReaderContext, ReaderDecorator};
use crate::{Uid, Version};

/// State of the disk-drain subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// One writable memory index, nothing draining.
    Sleeping,

    /// A fresh writable index collects new events while the previous one
    /// is being drained into the disk index.
    Working,
}

/// The immutable generation set: a value, never updated in place.
struct MemSnapshot<D> {
    mem_a: Option<Arc<RamIndex<D>>>,
    mem_b: Option<Arc<RamIndex<D>>>,
    writable: Option<Arc<RamIndex<D>>>,
    read_only: Option<Arc<RamIndex<D>>>,
    disk_reader: Option<Arc<GenerationReader<D>>>,
}

impl<D> Clone for MemSnapshot<D> {
    fn clone(&self) -> Self {
        MemSnapshot {
            mem_a: self.mem_a.clone(),
            mem_b: self.mem_b.clone(),
            writable: self.writable.clone(),
            read_only: self.read_only.clone(),
            disk_reader: self.disk_reader.clone(),
        }
    }
}

/// Rotates memory generations and publishes the composed read view.
pub struct IndexManager<D> {
    location: PathBuf,
    analyzer: Arc<dyn Analyzer>,
    decorator: Arc<dyn ReaderDecorator<D>>,
    disk: Arc<DiskIndex<D>>,
    status: Mutex<Status>,
    mem: RwLock<Arc<MemSnapshot<D>>>,
}

impl<D: Send + Sync + 'static> IndexManager<D> {
    /// Open or recover the disk index at `location` and start with a fresh
    /// writable memory index "A" at the disk version.
    pub fn new(
        location: PathBuf,
        analyzer: Arc<dyn Analyzer>,
        decorator: Arc<dyn ReaderDecorator<D>>,
    ) -> Result<Self> {
        let disk = Arc::new(DiskIndex::new(
            location.clone(),
            Arc::clone(&analyzer),
            Arc::clone(&decorator),
        )?);
        let disk_reader = disk.open_reader()?;

        let mem_a = Arc::new(RamIndex::new(
            disk.version(),
            Arc::clone(&analyzer),
            Arc::clone(&decorator),
        ));
        let mem = MemSnapshot {
            mem_a: Some(Arc::clone(&mem_a)),
            mem_b: None,
            writable: Some(mem_a),
            read_only: None,
            disk_reader,
        };

        Ok(IndexManager {
            location,
            analyzer,
            decorator,
            disk,
            status: Mutex::new(Status::Sleeping),
            mem: RwLock::new(Arc::new(mem)),
        })
    }

    /// The disk index location.
    pub fn location(&self) -> &PathBuf {
        &self.location
    }

    /// The disk index adapter.
    pub fn disk_index(&self) -> Arc<DiskIndex<D>> {
        Arc::clone(&self.disk)
    }

    /// The currently writable memory index.
    pub fn current_writable(&self) -> Option<Arc<RamIndex<D>>> {
        self.mem.read().writable.clone()
    }

    /// The read-only memory index being drained, if a drain is under way.
    pub fn current_read_only(&self) -> Option<Arc<RamIndex<D>>> {
        self.mem.read().read_only.clone()
    }

    /// Current rotation status.
    pub fn status(&self) -> Status {
        *self.status.lock()
    }

    /// Transition the rotation state machine. Setting the current status
    /// again is a no-op; no new generation snapshot is published.
    ///
    /// Entering `Working` opens a fresh writable index "B" and demotes "A"
    /// to the read-only draining generation. Returning to `Sleeping` opens
    /// a new disk reader, promotes "B" to be the new "A" and drops the
    /// drained generation. If the disk reader cannot be opened the
    /// rotation is aborted: the previous generation set stays published,
    /// the status is unchanged and the error goes back to the drain
    /// caller.
    pub fn set_status(&self, status: Status) -> Result<()> {
        let mut current = self.status.lock();
        if *current == status {
            return Ok(());
        }
        info!("updating batch indexer status from {current:?} to {status:?}");

        match status {
            Status::Working => {
                let version = self.disk.version();
                let mem_b = Arc::new(RamIndex::new(
                    version,
                    Arc::clone(&self.analyzer),
                    Arc::clone(&self.decorator),
                ));
                let old = self.mem.read().clone();
                let new = MemSnapshot {
                    mem_a: old.mem_a.clone(),
                    mem_b: Some(Arc::clone(&mem_b)),
                    writable: Some(mem_b),
                    read_only: old.mem_a.clone(),
                    disk_reader: old.disk_reader.clone(),
                };
                *self.mem.write() = Arc::new(new);
                info!("current writable index is B, new B created");
            }
            Status::Sleeping => {
                // open the new reader outside the published snapshot so
                // concurrent readers are never blocked on the open
                let disk_reader = self.disk.get_new_reader()?;
                let old = self.mem.read().clone();
                let new = MemSnapshot {
                    mem_a: old.mem_b.clone(),
                    mem_b: None,
                    writable: old.mem_b.clone(),
                    read_only: None,
                    disk_reader,
                };
                *self.mem.write() = Arc::new(new);
                info!("current writable index is A, B is flushed");
            }
        }
        *current = status;
        Ok(())
    }

    /// Compose the consistent reader list for search, in disk, "A", "B"
    /// order.
    ///
    /// Deletes recorded by "B" are folded onto "A"'s view, and the union
    /// of both memory delete sets is folded onto the disk view, so a uid
    /// updated in a newer generation is hidden in every older generation
    /// that still physically contains it.
    pub fn get_index_readers(&self) -> Result<Vec<ReaderContext<D>>> {
        let mem = self.mem.read().clone();

        let mut mem_del: Option<AHashSet<Uid>> = None;
        let mut disk_del: Option<AHashSet<Uid>> = None;
        let mut b_context = None;
        let mut a_context = None;

        if let Some(mem_b) = &mem.mem_b {
            if let Some(reader) = mem_b.open_reader()? {
                if let Some(modified) = reader.modified_set() {
                    if !modified.is_empty() {
                        mem_del = Some(modified.clone());
                        disk_del = Some(modified.clone());
                    }
                }
                let decorated = GenerationReader::decorated(&reader)?;
                b_context = Some(ReaderContext::new(reader, decorated, None));
            }
        }

        if let Some(mem_a) = &mem.mem_a {
            if let Some(reader) = mem_a.open_reader()? {
                if let Some(modified) = reader.modified_set() {
                    if !modified.is_empty() {
                        match &mut disk_del {
                            Some(set) => set.extend(modified.iter().copied()),
                            None => disk_del = Some(modified.clone()),
                        }
                    }
                }
                let decorated = GenerationReader::decorated(&reader)?;
                a_context = Some(ReaderContext::new(
                    reader,
                    decorated,
                    mem_del.map(Arc::new),
                ));
            }
        }

        let mut contexts = Vec::with_capacity(3);
        if let Some(reader) = &mem.disk_reader {
            let decorated = GenerationReader::decorated(reader)?;
            contexts.push(ReaderContext::new(
                Arc::clone(reader),
                decorated,
                disk_del.map(Arc::new),
            ));
        }
        contexts.extend(a_context);
        contexts.extend(b_context);
        Ok(contexts)
    }

    /// Open a fresh disk reader and publish it without touching the memory
    /// generations.
    pub fn refresh_disk_reader(&self) -> Result<()> {
        info!("refreshing disk reader ...");
        let disk_reader = self.disk.get_new_reader()?;
        let old = self.mem.read().clone();
        let new = MemSnapshot {
            disk_reader,
            ..(*old).clone()
        };
        *self.mem.write() = Arc::new(new);
        info!("disk reader refreshed");
        Ok(())
    }

    /// Drop all index data and publish an empty generation set.
    pub fn purge_index(&self) -> Result<()> {
        self.disk.purge()?;

        let mem_a = Arc::new(RamIndex::new(
            self.disk.version(),
            Arc::clone(&self.analyzer),
            Arc::clone(&self.decorator),
        ));
        let new = MemSnapshot {
            mem_a: Some(Arc::clone(&mem_a)),
            mem_b: None,
            writable: Some(mem_a),
            read_only: None,
            disk_reader: None,
        };
        *self.mem.write() = Arc::new(new);
        Ok(())
    }

    /// Version of the disk index.
    pub fn disk_version(&self) -> Version {
        self.disk.version()
    }

    /// Live documents on disk.
    pub fn disk_num_docs(&self) -> u32 {
        self.disk.num_docs()
    }

    /// Live documents in memory index "A", 0 when absent.
    pub fn ram_a_num_docs(&self) -> u32 {
        self.mem.read().mem_a.as_ref().map(|a| a.num_docs()).unwrap_or(0)
    }

    /// Version of memory index "A", 0 when absent.
    pub fn ram_a_version(&self) -> Version {
        self.mem.read().mem_a.as_ref().map(|a| a.version()).unwrap_or(0)
    }

    /// Live documents in memory index "B", 0 when absent.
    pub fn ram_b_num_docs(&self) -> u32 {
        self.mem.read().mem_b.as_ref().map(|b| b.num_docs()).unwrap_or(0)
    }

    /// Version of memory index "B", 0 when absent.
    pub fn ram_b_version(&self) -> Version {
        self.mem.read().mem_b.as_ref().map(|b| b.version()).unwrap_or(0)
    }

    /// Release all resources.
    pub fn close(&self) {
        self.disk.close();
        let mem = self.mem.read().clone();
        if let Some(mem_a) = &mem.mem_a {
            mem_a.close();
        }
        if let Some(mem_b) = &mem.mem_b {
            mem_b.close();
        }
    }
}
