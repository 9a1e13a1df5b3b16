//! The asynchronous, version-ordered batching pipeline.
//!
//! Two layered stages share one contract: `consume` accepts a collection
//! of versioned events and blocks under back-pressure; a dedicated drain
//! worker forms batches bounded by size and time and applies them to the
//! target index in version order. The memory stage favors latency, the
//! disk stage favors throughput, and both expose flush guarantees bounded
//! by explicit timeouts.

pub mod applier;
pub mod async_consumer;
pub mod batched;
pub mod copying;
pub mod delegate;
pub mod scheduler;

use std::time::Duration;

use crate::error::Result;
use crate::event::DataEvent;

pub use applier::{DiskApplier, RamApplier};
pub use async_consumer::AsyncPipeline;
pub use batched::BatchedLoader;
pub use copying::CopyingLoader;
pub use delegate::DelegatingConsumer;
pub use scheduler::{NullOptimizeScheduler, OptimizeKind, OptimizeScheduler, PeriodicOptimizeScheduler};

/// Consumes collections of versioned events.
pub trait EventConsumer<V>: Send + Sync {
    /// Apply a batch of events. Implementations decide whether the call is
    /// synchronous or merely enqueues.
    fn consume(&self, events: Vec<DataEvent<V>>) -> Result<()>;
}

/// Notifications fired by the disk loaders.
#[derive(Debug, Clone)]
pub enum IndexingEvent {
    /// A batch was flushed to the disk indexer.
    IndexUpdated {
        /// Events in the flushed batch.
        events: usize,

        /// Wall-clock duration of the flush.
        duration: Duration,

        /// Events still outstanding after the flush.
        remaining: usize,
    },
}

/// Observer of [`IndexingEvent`]s. Listener failures are logged and do not
/// disturb the pipeline.
pub trait IndexingEventListener: Send + Sync {
    /// Handle one event.
    fn handle_indexing_event(&self, event: &IndexingEvent);
}

/// The disk-side batching stage: one of two interchangeable drain
/// strategies behind a common interface.
///
/// `consume_with` optionally applies the same events to the memory stage
/// under the loader's own lock before enqueueing them for disk, so the
/// count the drain takes at rotation time matches exactly what the drained
/// memory generation contains.
pub trait DiskLoader<V>: Send + Sync {
    /// Start the drain worker.
    fn start(&self) -> Result<()>;

    /// Stop the drain worker, letting an in-flight batch complete.
    fn shutdown(&self);

    /// Consume events, feeding `ram` first when present. Blocks under
    /// back-pressure.
    fn consume_with(
        &self,
        events: Vec<DataEvent<V>>,
        ram: Option<&dyn EventConsumer<V>>,
    ) -> Result<()>;

    /// Block until every outstanding event has been applied to disk, or
    /// fail with a timeout.
    fn flush_events(&self, timeout: Duration) -> Result<()>;

    /// Events consumed but not yet applied to disk.
    fn pending_events(&self) -> usize;

    /// Batch size that triggers a drain.
    fn batch_size(&self) -> usize;

    /// Change the drain trigger size.
    fn set_batch_size(&self, batch_size: usize);

    /// Pending-event bound above which `consume_with` blocks.
    fn max_batch_size(&self) -> usize;

    /// Change the back-pressure bound.
    fn set_max_batch_size(&self, max_batch_size: usize);

    /// Maximum delay before a non-empty batch is drained.
    fn delay(&self) -> Duration;

    /// Change the maximum drain delay.
    fn set_delay(&self, delay: Duration);

    /// Register a listener for indexing events.
    fn add_listener(&self, listener: Box<dyn IndexingEventListener>);
}

impl<V: Send + Sync> EventConsumer<V> for dyn DiskLoader<V> {
    fn consume(&self, events: Vec<DataEvent<V>>) -> Result<()> {
        self.consume_with(events, None)
    }
}
