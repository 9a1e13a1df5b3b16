//! The delegating consumer: interprets each event once and fans it out to
//! the memory and disk stages.

use std::sync::Arc;

use log::error;

use crate::error::Result;
use crate::event::DataEvent;
use crate::indexable::{Indexable, Interpreter};
use crate::pipeline::{DiskLoader, EventConsumer};

/// Converts payloads into indexable documents exactly once per event and
/// hands the interpreted batch to both pipelines.
///
/// An event whose interpretation fails is dropped with a logged error; the
/// rest of the batch proceeds. Failure isolation is per event, never per
/// batch.
pub struct DelegatingConsumer<V> {
    interpreter: Arc<dyn Interpreter<V>>,
    ram: Option<Arc<dyn EventConsumer<Indexable>>>,
    disk: Option<Arc<dyn DiskLoader<Indexable>>>,
}

impl<V> DelegatingConsumer<V> {
    /// Create a delegating consumer. Either stage may be absent.
    pub fn new(
        interpreter: Arc<dyn Interpreter<V>>,
        ram: Option<Arc<dyn EventConsumer<Indexable>>>,
        disk: Option<Arc<dyn DiskLoader<Indexable>>>,
    ) -> Self {
        DelegatingConsumer {
            interpreter,
            ram,
            disk,
        }
    }
}

impl<V: Send + Sync> EventConsumer<V> for DelegatingConsumer<V> {
    fn consume(&self, events: Vec<DataEvent<V>>) -> Result<()> {
        let mut interpreted = Vec::with_capacity(events.len());
        for event in events {
            match self.interpreter.interpret(&event.payload) {
                Ok(indexable) => interpreted.push(DataEvent::new(event.version, indexable)),
                Err(e) => {
                    error!(
                        "dropping uninterpretable event at version {}: {e}",
                        event.version
                    );
                }
            }
        }

        match (&self.disk, &self.ram) {
            // the disk loader feeds the memory stage under its own lock so
            // rotation counts stay consistent with the memory contents
            (Some(disk), ram) => disk.consume_with(
                interpreted,
                ram.as_ref().map(|consumer| consumer.as_ref()),
            ),
            (None, Some(ram)) => ram.consume(interpreted),
            (None, None) => Ok(()),
        }
    }
}
