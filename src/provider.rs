//! Data providers: producer-side plumbing that pumps versioned events
//! into a consumer from a dedicated thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use log::{error, warn};
use parking_lot::{Condvar, Mutex};

use crate::error::Result;
use crate::event::DataEvent;
use crate::pipeline::EventConsumer;

/// How long the producer thread idles when the provider has nothing.
const IDLE_WAIT: Duration = Duration::from_millis(100);

/// Source of versioned events for a [`StreamDataProvider`].
pub trait DataProvider<V>: Send + 'static {
    /// The next event, or `None` when nothing is available right now.
    fn next_event(&mut self) -> Result<Option<DataEvent<V>>>;
}

struct ProviderShared {
    stop: AtomicBool,
    paused: Mutex<bool>,
    pause_cond: Condvar,
    batch_size: AtomicUsize,
}

/// Pumps events from a [`DataProvider`] into a consumer in small batches
/// from a named producer thread. Supports pause, resume and stop.
pub struct StreamDataProvider<V> {
    consumer: Arc<dyn EventConsumer<V>>,
    shared: Arc<ProviderShared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl<V: Send + Sync + 'static> StreamDataProvider<V> {
    /// Create a provider pump feeding `consumer`.
    pub fn new(consumer: Arc<dyn EventConsumer<V>>, batch_size: usize) -> Self {
        StreamDataProvider {
            consumer,
            shared: Arc::new(ProviderShared {
                stop: AtomicBool::new(false),
                paused: Mutex::new(false),
                pause_cond: Condvar::new(),
                batch_size: AtomicUsize::new(batch_size.max(1)),
            }),
            handle: Mutex::new(None),
        }
    }

    /// Start pumping from `provider`.
    pub fn start<P: DataProvider<V>>(&self, mut provider: P) -> Result<()> {
        let mut handle = self.handle.lock();
        if handle.is_some() {
            return Err(crate::error::PilumError::index(
                "data provider already running",
            ));
        }
        self.shared.stop.store(false, Ordering::Release);

        let consumer = Arc::clone(&self.consumer);
        let shared = Arc::clone(&self.shared);
        let worker = thread::Builder::new()
            .name("stream-data-provider".to_string())
            .spawn(move || {
                while !shared.stop.load(Ordering::Acquire) {
                    // honor pause requests
                    {
                        let mut paused = shared.paused.lock();
                        while *paused && !shared.stop.load(Ordering::Acquire) {
                            shared
                                .pause_cond
                                .wait_for(&mut paused, Duration::from_millis(200));
                        }
                    }
                    if shared.stop.load(Ordering::Acquire) {
                        break;
                    }

                    let target = shared.batch_size.load(Ordering::Acquire);
                    let mut batch = Vec::with_capacity(target);
                    while batch.len() < target {
                        match provider.next_event() {
                            Ok(Some(event)) => batch.push(event),
                            Ok(None) => break,
                            Err(e) => {
                                warn!("data provider error: {e}");
                                break;
                            }
                        }
                    }

                    if batch.is_empty() {
                        thread::sleep(IDLE_WAIT);
                        continue;
                    }
                    if let Err(e) = consumer.consume(batch) {
                        error!("problem consuming provided events: {e}");
                    }
                }
            })?;
        *handle = Some(worker);
        Ok(())
    }

    /// Suspend event delivery.
    pub fn pause(&self) {
        *self.shared.paused.lock() = true;
    }

    /// Resume event delivery.
    pub fn resume(&self) {
        *self.shared.paused.lock() = false;
        self.shared.pause_cond.notify_all();
    }

    /// Stop the producer thread.
    pub fn stop(&self) {
        self.shared.stop.store(true, Ordering::Release);
        self.shared.pause_cond.notify_all();
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }

    /// Events handed to the consumer per batch.
    pub fn batch_size(&self) -> usize {
        self.shared.batch_size.load(Ordering::Acquire)
    }

    /// Change the per-batch event count.
    pub fn set_batch_size(&self, batch_size: usize) {
        self.shared
            .batch_size
            .store(batch_size.max(1), Ordering::Release);
    }
}

impl<V> Drop for StreamDataProvider<V> {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        self.shared.pause_cond.notify_all();
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }
}

/// A [`DataProvider`] fed through a channel, convenient for services and
/// tests that push events from other threads.
pub struct ChannelDataProvider<V> {
    receiver: Receiver<DataEvent<V>>,
}

impl<V: Send + 'static> ChannelDataProvider<V> {
    /// Create a provider and the sender half feeding it.
    pub fn new() -> (Sender<DataEvent<V>>, ChannelDataProvider<V>) {
        let (sender, receiver) = unbounded();
        (sender, ChannelDataProvider { receiver })
    }
}

impl<V: Send + 'static> DataProvider<V> for ChannelDataProvider<V> {
    fn next_event(&mut self) -> Result<Option<DataEvent<V>>> {
        match self.receiver.recv_timeout(IDLE_WAIT) {
            Ok(event) => Ok(Some(event)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    struct Recorder {
        events: Mutex<Vec<DataEvent<u32>>>,
    }

    impl EventConsumer<u32> for Recorder {
        fn consume(&self, events: Vec<DataEvent<u32>>) -> Result<()> {
            self.events.lock().extend(events);
            Ok(())
        }
    }

    fn wait_for<F: Fn() -> bool>(predicate: F) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !predicate() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn test_channel_provider_pumps_events() {
        let recorder = Arc::new(Recorder {
            events: Mutex::new(Vec::new()),
        });
        let pump = StreamDataProvider::<u32>::new(recorder.clone(), 10);
        let (sender, provider) = ChannelDataProvider::new();
        pump.start(provider).unwrap();

        for version in 1..=5u64 {
            sender.send(DataEvent::new(version, version as u32)).unwrap();
        }
        wait_for(|| recorder.events.lock().len() == 5);
        pump.stop();

        let events = recorder.events.lock();
        assert_eq!(events.len(), 5);
        assert_eq!(events[0].version, 1);
        assert_eq!(events[4].version, 5);
    }

    #[test]
    fn test_pause_holds_delivery() {
        let recorder = Arc::new(Recorder {
            events: Mutex::new(Vec::new()),
        });
        let pump = StreamDataProvider::<u32>::new(recorder.clone(), 10);
        let (sender, provider) = ChannelDataProvider::new();

        pump.pause();
        pump.start(provider).unwrap();
        sender.send(DataEvent::new(1, 1)).unwrap();

        thread::sleep(Duration::from_millis(300));
        assert!(recorder.events.lock().is_empty());

        pump.resume();
        wait_for(|| !recorder.events.lock().is_empty());
        assert_eq!(recorder.events.lock().len(), 1);
        pump.stop();
    }
}
