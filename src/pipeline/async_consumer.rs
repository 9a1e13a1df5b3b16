//! The low-latency asynchronous consumption stage.
//!
//! Producers hand events to `consume`, which buffers them and returns.
//! A dedicated drain worker swaps the whole buffer out and applies it to
//! the inner consumer; producers are blocked only while the buffer is at
//! capacity. `flush_to_version` turns the applied-version watermark into a
//! synchronization point with a hard deadline.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::error;
use parking_lot::{Condvar, Mutex};

use crate::error::{PilumError, Result};
use crate::event::DataEvent;
use crate::pipeline::EventConsumer;
use crate::Version;

struct PipelineState<V> {
    batch: Vec<DataEvent<V>>,
    buffered_version: Version,
    current_version: Version,
}

struct PipelineShared<V> {
    inner: Arc<dyn EventConsumer<V>>,
    state: Mutex<PipelineState<V>>,
    cond: Condvar,
    stop: AtomicBool,
    started: AtomicBool,
    worker_alive: AtomicBool,
    batch_size: AtomicUsize,
}

/// Clears the liveness flag when the worker exits, normally or by panic.
struct WorkerBomb<V> {
    shared: Arc<PipelineShared<V>>,
}

impl<V> Drop for WorkerBomb<V> {
    fn drop(&mut self) {
        self.shared.worker_alive.store(false, Ordering::Release);
        self.shared.cond.notify_all();
    }
}

/// Version-ordered asynchronous event buffer with back-pressure and
/// flush-to-version guarantees.
pub struct AsyncPipeline<V> {
    shared: Arc<PipelineShared<V>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl<V: Send + Sync + 'static> AsyncPipeline<V> {
    /// Create a pipeline feeding `inner`. Nothing drains until
    /// [`AsyncPipeline::start`] is called.
    pub fn new(inner: Arc<dyn EventConsumer<V>>, batch_size: usize) -> Self {
        AsyncPipeline {
            shared: Arc::new(PipelineShared {
                inner,
                state: Mutex::new(PipelineState {
                    batch: Vec::new(),
                    buffered_version: 0,
                    current_version: 0,
                }),
                cond: Condvar::new(),
                stop: AtomicBool::new(false),
                started: AtomicBool::new(false),
                worker_alive: AtomicBool::new(false),
                batch_size: AtomicUsize::new(batch_size.max(1)),
            }),
            handle: Mutex::new(None),
        }
    }

    /// Start the drain worker.
    pub fn start(&self) -> Result<()> {
        let mut handle = self.handle.lock();
        if handle.is_some() {
            return Err(PilumError::index("pipeline already running"));
        }
        self.shared.stop.store(false, Ordering::Release);
        self.shared.worker_alive.store(true, Ordering::Release);
        self.shared.started.store(true, Ordering::Release);

        let shared = Arc::clone(&self.shared);
        let worker = thread::Builder::new()
            .name("async-data-consumer".to_string())
            .spawn(move || {
                let _bomb = WorkerBomb {
                    shared: Arc::clone(&shared),
                };
                loop {
                    if flush_buffer(&shared) {
                        return;
                    }
                }
            })?;
        *handle = Some(worker);
        Ok(())
    }

    /// Stop the drain worker. An in-flight batch application is allowed to
    /// complete; events still buffered afterwards are dropped.
    pub fn stop(&self) {
        self.shared.stop.store(true, Ordering::Release);
        self.shared.cond.notify_all();
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }

    /// Buffer events for application, blocking under back-pressure. The
    /// wait is bounded and rechecks that the drain worker is alive.
    pub fn consume(&self, events: Vec<DataEvent<V>>) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }
        let mut state = self.shared.state.lock();
        while state.batch.len() >= self.batch_size() {
            if !self.worker_running() {
                return Err(PilumError::pipeline_stopped(
                    "consumer thread has stopped",
                ));
            }
            self.shared
                .cond
                .wait_for(&mut state, Duration::from_secs(1));
        }
        for event in &events {
            state.buffered_version = state.buffered_version.max(event.version);
        }
        state.batch.extend(events);
        self.shared.cond.notify_all();
        Ok(())
    }

    /// Block until every event with version at most `version` has been
    /// applied, or fail with a timeout once the deadline elapses.
    pub fn flush_to_version(&self, version: Version, timeout: Duration) -> Result<()> {
        if !self.shared.started.load(Ordering::Acquire) {
            return Err(PilumError::pipeline_stopped("not running"));
        }
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while state.current_version < version {
            let now = Instant::now();
            if now >= deadline {
                return Err(PilumError::timeout(format!(
                    "sync to version {version} timed out"
                )));
            }
            if !self.shared.worker_alive.load(Ordering::Acquire) {
                return Err(PilumError::pipeline_stopped(
                    "consumer thread has stopped",
                ));
            }
            let wait = (deadline - now).min(Duration::from_secs(1));
            self.shared.cond.wait_for(&mut state, wait);
        }
        Ok(())
    }

    /// Block until everything buffered so far has been applied.
    pub fn flush(&self, timeout: Duration) -> Result<()> {
        let target = self.shared.state.lock().buffered_version;
        self.flush_to_version(target, timeout)
    }

    /// Highest version known to be fully applied.
    pub fn current_version(&self) -> Version {
        self.shared.state.lock().current_version
    }

    /// Highest version buffered so far.
    pub fn buffered_version(&self) -> Version {
        self.shared.state.lock().buffered_version
    }

    /// Events buffered but not yet taken by the drain worker.
    pub fn pending_events(&self) -> usize {
        self.shared.state.lock().batch.len()
    }

    /// Buffer capacity before producers block.
    pub fn batch_size(&self) -> usize {
        self.shared.batch_size.load(Ordering::Acquire)
    }

    /// Change the buffer capacity.
    pub fn set_batch_size(&self, batch_size: usize) {
        self.shared
            .batch_size
            .store(batch_size.max(1), Ordering::Release);
    }

    fn worker_running(&self) -> bool {
        self.shared.started.load(Ordering::Acquire)
            && self.shared.worker_alive.load(Ordering::Acquire)
            && !self.shared.stop.load(Ordering::Acquire)
    }
}

/// One drain iteration. Returns `true` when the worker should exit.
fn flush_buffer<V>(shared: &PipelineShared<V>) -> bool {
    let batch;
    let target;
    {
        let mut state = shared.state.lock();
        while state.batch.is_empty() {
            if shared.stop.load(Ordering::Acquire) {
                return true;
            }
            shared.cond.wait(&mut state);
        }
        batch = std::mem::take(&mut state.batch);
        target = state.current_version.max(state.buffered_version);
        // wake producers blocked on back-pressure
        shared.cond.notify_all();
    }

    match shared.inner.consume(batch) {
        Ok(()) => {
            let mut state = shared.state.lock();
            state.current_version = target;
        }
        Err(e) => {
            // the version watermark stays put so flush callers are not
            // fooled into thinking the batch applied
            error!("problem consuming batch: {e}");
        }
    }
    shared.cond.notify_all();
    false
}

impl<V> Drop for AsyncPipeline<V> {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        self.shared.cond.notify_all();
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;

    struct Recorder {
        batches: PlMutex<Vec<Vec<DataEvent<u32>>>>,
    }

    impl Recorder {
        fn new() -> Arc<Self> {
            Arc::new(Recorder {
                batches: PlMutex::new(Vec::new()),
            })
        }

        fn event_count(&self) -> usize {
            self.batches.lock().iter().map(|b| b.len()).sum()
        }
    }

    impl EventConsumer<u32> for Recorder {
        fn consume(&self, events: Vec<DataEvent<u32>>) -> Result<()> {
            self.batches.lock().push(events);
            Ok(())
        }
    }

    struct Failing;

    impl EventConsumer<u32> for Failing {
        fn consume(&self, _events: Vec<DataEvent<u32>>) -> Result<()> {
            Err(PilumError::index("boom"))
        }
    }

    #[test]
    fn test_events_reach_inner_consumer() {
        let recorder = Recorder::new();
        let pipeline = AsyncPipeline::<u32>::new(recorder.clone(), 100);
        pipeline.start().unwrap();

        pipeline
            .consume(vec![
                DataEvent::new(1, 10),
                DataEvent::new(2, 20),
                DataEvent::new(3, 30),
            ])
            .unwrap();
        pipeline.flush(Duration::from_secs(5)).unwrap();

        assert_eq!(recorder.event_count(), 3);
        assert_eq!(pipeline.current_version(), 3);
        pipeline.stop();
    }

    #[test]
    fn test_flush_to_future_version_times_out() {
        let recorder = Recorder::new();
        let pipeline = AsyncPipeline::<u32>::new(recorder, 100);
        pipeline.start().unwrap();

        pipeline.consume(vec![DataEvent::new(1, 10)]).unwrap();
        pipeline.flush(Duration::from_secs(5)).unwrap();

        let err = pipeline
            .flush_to_version(pipeline.current_version() + 1, Duration::ZERO)
            .unwrap_err();
        assert!(matches!(err, PilumError::Timeout(_)));
        pipeline.stop();
    }

    #[test]
    fn test_flush_before_start_fails() {
        let recorder = Recorder::new();
        let pipeline = AsyncPipeline::<u32>::new(recorder, 100);
        let err = pipeline.flush(Duration::ZERO).unwrap_err();
        assert!(matches!(err, PilumError::PipelineStopped(_)));
    }

    #[test]
    fn test_failed_apply_keeps_version() {
        let pipeline = AsyncPipeline::<u32>::new(Arc::new(Failing), 100);
        pipeline.start().unwrap();

        pipeline.consume(vec![DataEvent::new(9, 1)]).unwrap();
        let err = pipeline
            .flush_to_version(9, Duration::from_millis(50))
            .unwrap_err();
        assert!(matches!(err, PilumError::Timeout(_)));
        assert_eq!(pipeline.current_version(), 0);
        pipeline.stop();
    }

    #[test]
    fn test_stop_drains_in_flight_batch() {
        let recorder = Recorder::new();
        let pipeline = AsyncPipeline::<u32>::new(recorder.clone(), 100);
        pipeline.start().unwrap();

        pipeline.consume(vec![DataEvent::new(1, 10)]).unwrap();
        pipeline.flush(Duration::from_secs(5)).unwrap();
        pipeline.stop();

        assert_eq!(recorder.event_count(), 1);
        // a flush after stop reports the pipeline as stopped
        let err = pipeline
            .flush_to_version(99, Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, PilumError::PipelineStopped(_)));
    }
}
