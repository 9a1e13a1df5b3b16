//! Batch appliers: turn deduplicated event batches into index updates.

use std::sync::Arc;
use std::time::Duration;

use ahash::{AHashMap, AHashSet};
use log::{error, info};
use parking_lot::Mutex;

use crate::error::Result;
use crate::event::DataEvent;
use crate::index::{RamIndex, SearchIndex};
use crate::indexable::{IndexRequest, Indexable};
use crate::manager::{IndexManager, Status};
use crate::pipeline::scheduler::{NullOptimizeScheduler, OptimizeKind, OptimizeScheduler};
use crate::pipeline::EventConsumer;
use crate::{Uid, Version};

/// Apply a batch of interpreted events to one index adapter.
///
/// Events are applied in non-decreasing version order, stable on ties by
/// arrival. Within the batch only the latest action per uid survives: an
/// update after a delete, or a delete after an update, for the same uid
/// collapses to one effective action. The adapter's version advances to
/// the batch maximum only after a successful apply.
pub(crate) fn apply_events<D>(
    index: &dyn SearchIndex<D>,
    mut events: Vec<DataEvent<Indexable>>,
) -> Result<()> {
    if events.is_empty() {
        return Ok(());
    }
    let count = events.len() as u64;
    events.sort_by_key(|e| e.version);

    let mut version: Version = index.version();
    let mut delete_set: AHashSet<Uid> = AHashSet::new();
    let mut add_map: AHashMap<Uid, Vec<IndexRequest>> = AHashMap::new();

    for event in events {
        version = version.max(event.version);
        let indexable = event.payload;
        if indexable.skip {
            continue;
        }

        let uid = indexable.uid;
        delete_set.insert(uid);
        add_map.remove(&uid);
        if !indexable.deleted {
            add_map.entry(uid).or_default().extend(indexable.requests);
        }
    }

    let mut inserts: Vec<(Uid, IndexRequest)> = Vec::new();
    for (uid, requests) in add_map {
        for request in requests {
            inserts.push((uid, request));
        }
    }

    index.update(&delete_set, &inserts)?;
    index.add_events_handled(count);
    index.set_version(version)?;
    Ok(())
}

/// Applies batches to the currently writable memory index.
pub struct RamApplier<D> {
    manager: Arc<IndexManager<D>>,
}

impl<D: Send + Sync + 'static> RamApplier<D> {
    /// Create an applier bound to the manager's writable generation.
    pub fn new(manager: Arc<IndexManager<D>>) -> Self {
        RamApplier { manager }
    }
}

impl<D: Send + Sync + 'static> EventConsumer<Indexable> for RamApplier<D> {
    fn consume(&self, events: Vec<DataEvent<Indexable>>) -> Result<()> {
        let Some(index) = self.manager.current_writable() else {
            return Ok(());
        };
        apply_events(index.as_ref(), events)
    }
}

/// Applies batches to the disk index, bracketing every drain with the
/// rotation status transitions.
///
/// One monitor serializes drains, maintenance and snapshot transfer, so a
/// second drain can never start while one is in flight.
pub struct DiskApplier<D> {
    manager: Arc<IndexManager<D>>,
    monitor: Mutex<()>,
    scheduler: Mutex<Arc<dyn OptimizeScheduler>>,
}

impl<D: Send + Sync + 'static> DiskApplier<D> {
    /// Create a disk applier with no scheduled maintenance.
    pub fn new(manager: Arc<IndexManager<D>>) -> Self {
        DiskApplier {
            manager,
            monitor: Mutex::new(()),
            scheduler: Mutex::new(Arc::new(NullOptimizeScheduler)),
        }
    }

    /// Replace the optimize scheduler.
    pub fn set_optimize_scheduler(&self, scheduler: Arc<dyn OptimizeScheduler>) {
        *self.scheduler.lock() = scheduler;
    }

    /// The current optimize scheduler.
    pub fn optimize_scheduler(&self) -> Arc<dyn OptimizeScheduler> {
        self.scheduler.lock().clone()
    }

    /// Drain a read-only memory generation into the disk index by copying
    /// its segments (the copy-merge strategy).
    pub fn load_from_index(&self, ram: Arc<RamIndex<D>>) -> Result<()> {
        let _guard = self.monitor.lock();
        self.manager.set_status(Status::Working)?;

        let disk = self.manager.disk_index();
        let result = (|| -> Result<()> {
            disk.load_from_ram(ram.as_ref())?;
            disk.add_events_handled(ram.events_handled());
            disk.set_version(disk.version().max(ram.version()))?;
            Ok(())
        })();
        if let Err(e) = &result {
            log_apply_error("problem copying segments", e);
        }

        self.run_scheduled_maintenance();
        self.finish_drain()?;
        result
    }

    /// Merge the disk index down to one segment and refresh its reader.
    pub fn optimize(&self) -> Result<()> {
        let _guard = self.monitor.lock();
        self.manager.disk_index().optimize()?;
        self.manager.refresh_disk_reader()
    }

    /// Expunge deleted rows and refresh the disk reader.
    pub fn expunge_deletes(&self) -> Result<()> {
        let _guard = self.monitor.lock();
        self.manager.disk_index().expunge_deletes()?;
        self.manager.refresh_disk_reader()
    }

    /// Stream the disk generation's current commit into `writer`. The
    /// commit is pinned under the drain monitor, then streamed outside it
    /// so drains are not blocked for the duration of the transfer.
    pub fn export_snapshot(&self, writer: &mut dyn std::io::Write) -> Result<u64> {
        let disk = {
            let _guard = self.monitor.lock();
            self.manager.disk_index()
        };
        disk.export_snapshot(writer)
    }

    /// Replace the whole index with a streamed snapshot.
    pub fn import_snapshot(&self, reader: &mut dyn std::io::Read) -> Result<()> {
        let _guard = self.monitor.lock();
        self.manager.purge_index()?;
        self.manager.disk_index().import_snapshot(reader)?;
        self.manager.refresh_disk_reader()
    }

    fn run_scheduled_maintenance(&self) {
        let scheduler = self.optimize_scheduler();
        let kind = scheduler.scheduled_optimize();
        let disk = self.manager.disk_index();
        let result = match kind {
            OptimizeKind::None => Ok(()),
            OptimizeKind::ExpungeDeletes => disk.expunge_deletes(),
            OptimizeKind::FullMerge => disk.optimize(),
        };
        if let Err(e) = result {
            error!("scheduled maintenance failed: {e}");
        }
        scheduler.finished();
    }

    /// Leave `Working`. On failure the status stays `Working` and the
    /// previous generation set remains published; the next drain retries
    /// the transition.
    fn finish_drain(&self) -> Result<()> {
        if let Err(e) = self.manager.set_status(Status::Sleeping) {
            error!("cannot finish rotation, keeping previous generation: {e}");
            return Err(e);
        }
        Ok(())
    }
}

impl<D: Send + Sync + 'static> EventConsumer<Indexable> for DiskApplier<D> {
    fn consume(&self, events: Vec<DataEvent<Indexable>>) -> Result<()> {
        let _guard = self.monitor.lock();
        self.manager.set_status(Status::Working)?;

        let count = events.len();
        let started = std::time::Instant::now();
        let result = apply_events(self.manager.disk_index().as_ref(), events);
        if let Err(e) = &result {
            log_apply_error("problem indexing batch", e);
        } else if count > 0 {
            info!(
                "disk indexing requests flushed: {count} events in {}",
                humanize(started.elapsed())
            );
        }

        self.run_scheduled_maintenance();
        self.finish_drain()?;
        result
    }
}

fn humanize(duration: Duration) -> String {
    format!("{}ms", duration.as_millis())
}

/// Corruption is alarm-worthy and logged apart from ordinary I/O trouble;
/// no automatic recovery is attempted for it.
fn log_apply_error(context: &str, error: &crate::error::PilumError) {
    match error {
        crate::error::PilumError::Corruption(_) => {
            error!("possible index corruption! {context}: {error}");
        }
        _ => error!("{context}: {error}"),
    }
}
