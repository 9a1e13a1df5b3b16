//! The assembled real-time indexing system.
//!
//! Wires the rotation manager, both pipeline stages and the delegating
//! consumer into one ingestion front end with a consistent multi
//! generation read view.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::Serialize;

use crate::analysis::{Analyzer, StandardAnalyzer};
use crate::error::Result;
use crate::event::DataEvent;
use crate::index::signature::SIGNATURE_FILE;
use crate::indexable::{Indexable, Interpreter};
use crate::manager::{IndexManager, Status};
use crate::pipeline::{
    AsyncPipeline, BatchedLoader, CopyingLoader, DelegatingConsumer, DiskApplier, DiskLoader,
    EventConsumer, IndexingEventListener, OptimizeScheduler, RamApplier,
};
use crate::reader::{ReaderContext, ReaderDecorator};
use crate::Version;

/// Tuning knobs for a [`RealtimeIndex`].
#[derive(Debug, Clone)]
pub struct RealtimeIndexConfig {
    /// Disk batch size that triggers a drain.
    pub batch_size: usize,

    /// Outstanding disk events above which producers block.
    pub max_batch_size: usize,

    /// Maximum delay before a non-empty disk batch is drained.
    pub batch_delay: Duration,

    /// Memory buffer capacity before producers block.
    pub mem_batch_size: usize,

    /// Whether events become searchable from memory before they reach
    /// disk. When off, the memory generations stay empty and the disk
    /// loader applies events directly.
    pub realtime: bool,
}

impl Default for RealtimeIndexConfig {
    fn default() -> Self {
        RealtimeIndexConfig {
            batch_size: 100,
            max_batch_size: 100_000,
            batch_delay: Duration::from_secs(60),
            mem_batch_size: 100,
            realtime: true,
        }
    }
}

/// Point-in-time view of the system for the administrative surface.
#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    /// Disk index location.
    pub index_dir: String,

    /// Rotation state of the disk-drain subsystem.
    pub rotation_working: bool,

    /// Version and live document count of the disk generation.
    pub disk_version: Version,
    pub disk_num_docs: u32,

    /// Version and live document count of memory generation "A".
    pub ram_a_version: Version,
    pub ram_a_num_docs: u32,

    /// Version and live document count of memory generation "B".
    pub ram_b_version: Version,
    pub ram_b_num_docs: u32,

    /// Events buffered in the memory pipeline.
    pub pending_mem_events: usize,

    /// Events consumed but not yet applied to disk.
    pub pending_disk_events: usize,

    /// Disk batching settings.
    pub batch_size: usize,
    pub max_batch_size: usize,
    pub batch_delay_ms: u64,

    /// Whether memory indexing is enabled.
    pub realtime: bool,

    /// Last modification of the persisted index signature.
    pub signature_modified: Option<DateTime<Utc>>,
}

/// A real-time incremental index over one disk location.
///
/// `V` is the producer's payload type, `D` the decorated reader type
/// handed to searchers.
pub struct RealtimeIndex<V, D> {
    location: PathBuf,
    manager: Arc<IndexManager<D>>,
    disk_applier: Arc<DiskApplier<D>>,
    disk_loader: Arc<dyn DiskLoader<Indexable>>,
    mem_pipeline: AsyncPipeline<V>,
    realtime: bool,
}

impl<V, D> RealtimeIndex<V, D>
where
    V: Send + Sync + 'static,
    D: Send + Sync + 'static,
{
    /// Create a system over `location` with the default analyzer.
    pub fn new<P: AsRef<Path>>(
        location: P,
        interpreter: Arc<dyn Interpreter<V>>,
        decorator: Arc<dyn ReaderDecorator<D>>,
        config: RealtimeIndexConfig,
    ) -> Result<Self> {
        Self::with_analyzer(
            location,
            interpreter,
            decorator,
            Arc::new(StandardAnalyzer::new()),
            config,
        )
    }

    /// Create a system with an explicit default analyzer.
    pub fn with_analyzer<P: AsRef<Path>>(
        location: P,
        interpreter: Arc<dyn Interpreter<V>>,
        decorator: Arc<dyn ReaderDecorator<D>>,
        analyzer: Arc<dyn Analyzer>,
        config: RealtimeIndexConfig,
    ) -> Result<Self> {
        let location = location.as_ref().to_path_buf();
        let manager = Arc::new(IndexManager::new(location.clone(), analyzer, decorator)?);
        let disk_applier = Arc::new(DiskApplier::new(Arc::clone(&manager)));
        let disk_consumer: Arc<dyn EventConsumer<Indexable>> = disk_applier.clone();

        let disk_loader: Arc<dyn DiskLoader<Indexable>> = if config.realtime {
            Arc::new(CopyingLoader::<Indexable, D>::new(
                Arc::clone(&disk_applier),
                Arc::clone(&manager),
                config.batch_size,
                config.max_batch_size,
                config.batch_delay,
            ))
        } else {
            Arc::new(BatchedLoader::<Indexable, D>::new(
                Arc::clone(&disk_consumer),
                Arc::clone(&manager),
                config.batch_size,
                config.max_batch_size,
                config.batch_delay,
            ))
        };

        let ram: Option<Arc<dyn EventConsumer<Indexable>>> = if config.realtime {
            Some(Arc::new(RamApplier::new(Arc::clone(&manager))))
        } else {
            None
        };

        let delegate = Arc::new(DelegatingConsumer::new(
            interpreter,
            ram,
            Some(Arc::clone(&disk_loader)),
        ));
        let mem_pipeline = AsyncPipeline::new(delegate, config.mem_batch_size);

        Ok(RealtimeIndex {
            location,
            manager,
            disk_applier,
            disk_loader,
            mem_pipeline,
            realtime: config.realtime,
        })
    }

    /// Start both pipeline workers.
    pub fn start(&self) -> Result<()> {
        info!("starting realtime index ...");
        self.disk_loader.start()?;
        self.mem_pipeline.start()?;
        info!("realtime index started");
        Ok(())
    }

    /// Stop both pipeline workers, letting in-flight batches complete.
    pub fn shutdown(&self) {
        info!("shutting down realtime index ...");
        self.mem_pipeline.stop();
        self.disk_loader.shutdown();
        self.manager.close();
        info!("realtime index shut down");
    }

    /// Ingest a batch of versioned events. Blocks under back-pressure.
    pub fn consume(&self, events: Vec<DataEvent<V>>) -> Result<()> {
        self.mem_pipeline.consume(events)
    }

    /// Block until everything ingested so far is applied to memory and
    /// disk, or fail with a timeout.
    pub fn flush(&self, timeout: Duration) -> Result<()> {
        self.mem_pipeline.flush(timeout)?;
        self.disk_loader.flush_events(timeout)
    }

    /// Block until every event with version at most `version` has been
    /// applied to the memory view.
    pub fn flush_to_version(&self, version: Version, timeout: Duration) -> Result<()> {
        self.mem_pipeline.flush_to_version(version, timeout)
    }

    /// The consistent multi-generation reader list for search.
    pub fn get_index_readers(&self) -> Result<Vec<ReaderContext<D>>> {
        self.manager.get_index_readers()
    }

    /// Version of the disk generation.
    pub fn current_disk_version(&self) -> Version {
        self.manager.disk_version()
    }

    /// Whether events are searchable from memory before reaching disk.
    pub fn is_realtime(&self) -> bool {
        self.realtime
    }

    /// Publish a freshly opened disk reader.
    pub fn refresh_disk_reader(&self) -> Result<()> {
        self.manager.refresh_disk_reader()
    }

    /// Merge the disk index down to one segment.
    pub fn optimize(&self) -> Result<()> {
        self.disk_applier.optimize()
    }

    /// Reclaim tombstoned rows on disk.
    pub fn expunge_deletes(&self) -> Result<()> {
        self.disk_applier.expunge_deletes()
    }

    /// Flush what can be flushed, then drop all index data.
    pub fn purge_index(&self) -> Result<()> {
        if let Err(e) = self.flush(Duration::from_secs(20)) {
            warn!("flush before purge failed: {e}");
        }
        self.manager.purge_index()
    }

    /// Stream the disk generation's current commit into `writer`.
    pub fn export_snapshot(&self, writer: &mut dyn Write) -> Result<u64> {
        self.disk_applier.export_snapshot(writer)
    }

    /// Replace the whole index with a streamed snapshot.
    pub fn import_snapshot(&self, reader: &mut dyn Read) -> Result<()> {
        self.disk_applier.import_snapshot(reader)
    }

    /// Replace the disk maintenance scheduler.
    pub fn set_optimize_scheduler(&self, scheduler: Arc<dyn OptimizeScheduler>) {
        self.disk_applier.set_optimize_scheduler(scheduler);
    }

    /// Observe disk indexing events.
    pub fn add_indexing_event_listener(&self, listener: Box<dyn IndexingEventListener>) {
        self.disk_loader.add_listener(listener);
    }

    /// Disk batch size that triggers a drain.
    pub fn batch_size(&self) -> usize {
        self.disk_loader.batch_size()
    }

    /// Change the disk drain trigger size.
    pub fn set_batch_size(&self, batch_size: usize) {
        self.disk_loader.set_batch_size(batch_size);
    }

    /// Back-pressure bound of the disk stage.
    pub fn max_batch_size(&self) -> usize {
        self.disk_loader.max_batch_size()
    }

    /// Change the back-pressure bound of the disk stage.
    pub fn set_max_batch_size(&self, max_batch_size: usize) {
        self.disk_loader.set_max_batch_size(max_batch_size);
    }

    /// Maximum delay before a non-empty disk batch is drained.
    pub fn batch_delay(&self) -> Duration {
        self.disk_loader.delay()
    }

    /// Change the maximum disk drain delay.
    pub fn set_batch_delay(&self, delay: Duration) {
        self.disk_loader.set_delay(delay);
    }

    /// Read-only snapshot of the system state.
    pub fn status(&self) -> SystemStatus {
        let signature_modified = std::fs::metadata(self.location.join(SIGNATURE_FILE))
            .and_then(|m| m.modified())
            .ok()
            .map(DateTime::<Utc>::from);

        SystemStatus {
            index_dir: self.location.display().to_string(),
            rotation_working: self.manager.status() == Status::Working,
            disk_version: self.manager.disk_version(),
            disk_num_docs: self.manager.disk_num_docs(),
            ram_a_version: self.manager.ram_a_version(),
            ram_a_num_docs: self.manager.ram_a_num_docs(),
            ram_b_version: self.manager.ram_b_version(),
            ram_b_num_docs: self.manager.ram_b_num_docs(),
            pending_mem_events: self.mem_pipeline.pending_events(),
            pending_disk_events: self.disk_loader.pending_events(),
            batch_size: self.disk_loader.batch_size(),
            max_batch_size: self.disk_loader.max_batch_size(),
            batch_delay_ms: self.disk_loader.delay().as_millis() as u64,
            realtime: self.realtime,
            signature_modified,
        }
    }
}
