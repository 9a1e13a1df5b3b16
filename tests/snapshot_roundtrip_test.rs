//! Snapshot export/import across whole systems.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use pilum::Uid;
use pilum::engine::Document;
use pilum::error::Result;
use pilum::event::DataEvent;
use pilum::indexable::{Indexable, Interpreter};
use pilum::reader::{DefaultDecorator, DefaultReader};
use pilum::system::{RealtimeIndex, RealtimeIndexConfig};

struct TextInterpreter;

impl Interpreter<(Uid, String)> for TextInterpreter {
    fn interpret(&self, payload: &(Uid, String)) -> Result<Indexable> {
        Ok(Indexable::insert(
            payload.0,
            Document::new().with_field("body", payload.1.clone()),
        ))
    }
}

type System = RealtimeIndex<(Uid, String), DefaultReader>;

fn new_system(dir: &TempDir) -> System {
    let system = RealtimeIndex::new(
        dir.path().join("zone"),
        Arc::new(TextInterpreter),
        Arc::new(DefaultDecorator),
        RealtimeIndexConfig {
            batch_size: 10_000,
            max_batch_size: 100_000,
            batch_delay: Duration::from_secs(3600),
            mem_batch_size: 100,
            realtime: true,
        },
    )
    .unwrap();
    system.start().unwrap();
    system
}

fn put(version: u64, uid: Uid, text: &str) -> DataEvent<(Uid, String)> {
    DataEvent::new(version, (uid, text.to_string()))
}

fn search(system: &System, term: &str) -> usize {
    system
        .get_index_readers()
        .unwrap()
        .iter()
        .map(|ctx| ctx.term_rows("body", term).len())
        .sum()
}

#[test]
fn test_snapshot_roundtrip_reproduces_document_set_and_version() {
    let src_dir = TempDir::new().unwrap();
    let source = new_system(&src_dir);

    source
        .consume(vec![
            put(1, 1, "first document"),
            put(2, 2, "second document"),
            put(3, 3, "third document"),
        ])
        .unwrap();
    source.flush(Duration::from_secs(30)).unwrap();
    assert_eq!(source.current_disk_version(), 3);

    let mut stream = Vec::new();
    let written = source.export_snapshot(&mut stream).unwrap();
    assert_eq!(written as usize, stream.len());

    let dst_dir = TempDir::new().unwrap();
    let destination = new_system(&dst_dir);
    destination.import_snapshot(&mut stream.as_slice()).unwrap();

    assert_eq!(destination.current_disk_version(), 3);
    assert_eq!(destination.status().disk_num_docs, 3);
    assert_eq!(search(&destination, "document"), 3);
    assert_eq!(search(&destination, "second"), 1);

    source.shutdown();
    destination.shutdown();
}

#[test]
fn test_import_purges_previous_destination_state() {
    let src_dir = TempDir::new().unwrap();
    let source = new_system(&src_dir);
    source.consume(vec![put(5, 1, "replacement")]).unwrap();
    source.flush(Duration::from_secs(30)).unwrap();

    let mut stream = Vec::new();
    source.export_snapshot(&mut stream).unwrap();

    let dst_dir = TempDir::new().unwrap();
    let destination = new_system(&dst_dir);
    destination
        .consume(vec![put(1, 9, "previous state"), put(2, 10, "more of it")])
        .unwrap();
    destination.flush(Duration::from_secs(30)).unwrap();
    assert_eq!(search(&destination, "previous"), 1);

    destination.import_snapshot(&mut stream.as_slice()).unwrap();

    assert_eq!(search(&destination, "previous"), 0);
    assert_eq!(search(&destination, "more"), 0);
    assert_eq!(search(&destination, "replacement"), 1);
    assert_eq!(destination.current_disk_version(), 5);

    source.shutdown();
    destination.shutdown();
}

#[test]
fn test_source_stays_live_during_and_after_export() {
    let src_dir = TempDir::new().unwrap();
    let source = new_system(&src_dir);
    source.consume(vec![put(1, 1, "exported doc")]).unwrap();
    source.flush(Duration::from_secs(30)).unwrap();

    let mut stream = Vec::new();
    source.export_snapshot(&mut stream).unwrap();

    // keep indexing after the export; the stream is unaffected
    source.consume(vec![put(2, 2, "later doc")]).unwrap();
    source.flush(Duration::from_secs(30)).unwrap();
    assert_eq!(search(&source, "later"), 1);

    let dst_dir = TempDir::new().unwrap();
    let destination = new_system(&dst_dir);
    destination.import_snapshot(&mut stream.as_slice()).unwrap();
    assert_eq!(search(&destination, "exported"), 1);
    assert_eq!(search(&destination, "later"), 0);

    source.shutdown();
    destination.shutdown();
}
