//! The direct disk-batching stage: events are buffered and applied to the
//! disk indexer document by document.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error, info};
use parking_lot::{Condvar, Mutex};

use crate::error::{PilumError, Result};
use crate::event::DataEvent;
use crate::manager::{IndexManager, Status};
use crate::pipeline::{DiskLoader, EventConsumer, IndexingEvent, IndexingEventListener};

/// How long a blocked producer waits before rechecking worker liveness.
const CONSUME_RECHECK: Duration = Duration::from_secs(60);

struct BatchedState<V> {
    batch: Vec<DataEvent<V>>,
    /// Consumed events not yet applied to disk, in-flight batch included.
    event_count: usize,
    flush_requested: bool,
    last_flush: Instant,
}

struct BatchedShared<V, D> {
    inner: Arc<dyn EventConsumer<V>>,
    manager: Arc<IndexManager<D>>,
    state: Mutex<BatchedState<V>>,
    cond: Condvar,
    stop: AtomicBool,
    worker_alive: AtomicBool,
    batch_size: AtomicUsize,
    max_batch_size: AtomicUsize,
    delay_ms: AtomicU64,
    listeners: Mutex<Vec<Box<dyn IndexingEventListener>>>,
}

impl<V, D> BatchedShared<V, D> {
    fn fire(&self, event: &IndexingEvent) {
        for listener in self.listeners.lock().iter() {
            listener.handle_indexing_event(event);
        }
    }
}

/// Size/time-bounded batching loader feeding the disk applier directly.
pub struct BatchedLoader<V, D> {
    shared: Arc<BatchedShared<V, D>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl<V, D> BatchedLoader<V, D>
where
    V: Clone + Send + Sync + 'static,
    D: Send + Sync + 'static,
{
    /// Create a loader draining into `inner` (the disk applier).
    pub fn new(
        inner: Arc<dyn EventConsumer<V>>,
        manager: Arc<IndexManager<D>>,
        batch_size: usize,
        max_batch_size: usize,
        delay: Duration,
    ) -> Self {
        let max_batch_size = max_batch_size.max(1);
        let batch_size = batch_size.clamp(1, max_batch_size);
        BatchedLoader {
            shared: Arc::new(BatchedShared {
                inner,
                manager,
                state: Mutex::new(BatchedState {
                    batch: Vec::new(),
                    event_count: 0,
                    flush_requested: false,
                    last_flush: Instant::now(),
                }),
                cond: Condvar::new(),
                stop: AtomicBool::new(false),
                worker_alive: AtomicBool::new(false),
                batch_size: AtomicUsize::new(batch_size),
                max_batch_size: AtomicUsize::new(max_batch_size),
                delay_ms: AtomicU64::new(delay.as_millis() as u64),
                listeners: Mutex::new(Vec::new()),
            }),
            handle: Mutex::new(None),
        }
    }
}

impl<V, D> DiskLoader<V> for BatchedLoader<V, D>
where
    V: Clone + Send + Sync + 'static,
    D: Send + Sync + 'static,
{
    fn start(&self) -> Result<()> {
        let mut handle = self.handle.lock();
        if handle.is_some() {
            return Err(PilumError::index("disk loader already running"));
        }
        self.shared.stop.store(false, Ordering::Release);
        self.shared.worker_alive.store(true, Ordering::Release);

        let shared = Arc::clone(&self.shared);
        let worker = thread::Builder::new()
            .name("disk-indexer-data-loader".to_string())
            .spawn(move || {
                while !shared.stop.load(Ordering::Acquire) {
                    process_batch(&shared);
                }
                shared.worker_alive.store(false, Ordering::Release);
                shared.cond.notify_all();
            })?;
        *handle = Some(worker);
        Ok(())
    }

    fn shutdown(&self) {
        self.shared.stop.store(true, Ordering::Release);
        self.shared.cond.notify_all();
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }

    fn consume_with(
        &self,
        events: Vec<DataEvent<V>>,
        ram: Option<&dyn EventConsumer<V>>,
    ) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }
        let mut state = self.shared.state.lock();
        while state.batch.len() > self.max_batch_size() {
            if !self.shared.worker_alive.load(Ordering::Acquire) {
                return Err(PilumError::pipeline_stopped("load manager has stopped"));
            }
            self.shared.cond.wait_for(&mut state, CONSUME_RECHECK);
        }

        // the memory stage is fed under this lock so the batch the drain
        // takes at rotation time matches the drained memory generation
        if let Some(ram) = ram {
            ram.consume(events.clone())?;
        }

        state.event_count += events.len();
        state.batch.extend(events);
        self.shared.cond.notify_all();
        Ok(())
    }

    fn flush_events(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while state.event_count > 0 {
            state.flush_requested = true;
            self.shared.cond.notify_all();

            let now = Instant::now();
            if now >= deadline {
                error!("sync timed out");
                return Err(PilumError::timeout("timed out waiting for disk flush"));
            }
            if !self.shared.worker_alive.load(Ordering::Acquire) {
                return Err(PilumError::pipeline_stopped("load manager has stopped"));
            }
            let wait = (deadline - now).min(Duration::from_secs(1));
            self.shared.cond.wait_for(&mut state, wait);
        }
        Ok(())
    }

    fn pending_events(&self) -> usize {
        self.shared.state.lock().event_count
    }

    fn batch_size(&self) -> usize {
        self.shared.batch_size.load(Ordering::Acquire)
    }

    fn set_batch_size(&self, batch_size: usize) {
        let clamped = batch_size.clamp(1, self.max_batch_size());
        self.shared.batch_size.store(clamped, Ordering::Release);
        self.shared.cond.notify_all();
    }

    fn max_batch_size(&self) -> usize {
        self.shared.max_batch_size.load(Ordering::Acquire)
    }

    fn set_max_batch_size(&self, max_batch_size: usize) {
        let max_batch_size = max_batch_size.max(1);
        self.shared
            .max_batch_size
            .store(max_batch_size, Ordering::Release);
        if self.batch_size() > max_batch_size {
            self.shared
                .batch_size
                .store(max_batch_size, Ordering::Release);
        }
        self.shared.cond.notify_all();
    }

    fn delay(&self) -> Duration {
        Duration::from_millis(self.shared.delay_ms.load(Ordering::Acquire))
    }

    fn set_delay(&self, delay: Duration) {
        self.shared
            .delay_ms
            .store(delay.as_millis() as u64, Ordering::Release);
        self.shared.cond.notify_all();
    }

    fn add_listener(&self, listener: Box<dyn IndexingEventListener>) {
        self.shared.listeners.lock().push(listener);
    }
}

/// One drain iteration: wait for a trigger, take the whole batch, apply.
fn process_batch<V, D>(shared: &BatchedShared<V, D>)
where
    D: Send + Sync + 'static,
{
    let batch;
    {
        let mut state = shared.state.lock();
        loop {
            let batch_size = shared.batch_size.load(Ordering::Acquire);
            let delay = Duration::from_millis(shared.delay_ms.load(Ordering::Acquire));
            let elapsed = state.last_flush.elapsed();

            if state.batch.len() >= batch_size
                || shared.stop.load(Ordering::Acquire)
                || state.flush_requested
                || elapsed >= delay
            {
                break;
            }
            shared.cond.wait_for(&mut state, delay - elapsed);
        }
        state.flush_requested = false;
        state.last_flush = Instant::now();

        if state.batch.is_empty() {
            debug!("batch size is 0");
            return;
        }
        // flip the rotation status while still holding the batch lock so
        // no event can slip between the take and the transition
        if let Err(e) = shared.manager.set_status(Status::Working) {
            error!("cannot start rotation: {e}");
            return;
        }
        batch = std::mem::take(&mut state.batch);
    }

    let count = batch.len();
    let started = Instant::now();
    if let Err(e) = shared.inner.consume(batch) {
        error!("problem flushing batch to disk indexer: {e}");
    }

    let mut state = shared.state.lock();
    state.event_count -= count;
    let remaining = state.event_count;
    info!(
        "flushed batch of {count} events to disk indexer, took {}ms, current event count: {remaining}",
        started.elapsed().as_millis()
    );
    shared.fire(&IndexingEvent::IndexUpdated {
        events: count,
        duration: started.elapsed(),
        remaining,
    });
    shared.cond.notify_all();
}
