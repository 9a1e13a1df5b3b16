//! End-to-end tests for the realtime indexing system.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use pilum::Uid;
use pilum::engine::Document;
use pilum::error::{PilumError, Result};
use pilum::event::DataEvent;
use pilum::indexable::{Indexable, Interpreter};
use pilum::reader::{DefaultDecorator, DefaultReader};
use pilum::system::{RealtimeIndex, RealtimeIndexConfig};

/// The producer-side payload used by these tests.
#[derive(Debug, Clone)]
enum Op {
    Put { uid: Uid, text: String },
    Del { uid: Uid },
    Junk,
}

struct OpInterpreter;

impl Interpreter<Op> for OpInterpreter {
    fn interpret(&self, payload: &Op) -> Result<Indexable> {
        match payload {
            Op::Put { uid, text } => Ok(Indexable::insert(
                *uid,
                Document::new().with_field("body", text.clone()),
            )),
            Op::Del { uid } => Ok(Indexable::delete(*uid)),
            Op::Junk => Err(PilumError::interpretation("junk payload")),
        }
    }
}

type System = RealtimeIndex<Op, DefaultReader>;

fn new_system(dir: &TempDir, config: RealtimeIndexConfig) -> System {
    let system = RealtimeIndex::new(
        dir.path().join("zone"),
        Arc::new(OpInterpreter),
        Arc::new(DefaultDecorator),
        config,
    )
    .unwrap();
    system.start().unwrap();
    system
}

fn manual_drain_config() -> RealtimeIndexConfig {
    // large batch and delay: disk drains only on explicit flush
    RealtimeIndexConfig {
        batch_size: 10_000,
        max_batch_size: 100_000,
        batch_delay: Duration::from_secs(3600),
        mem_batch_size: 100,
        realtime: true,
    }
}

fn put(version: u64, uid: Uid, text: &str) -> DataEvent<Op> {
    DataEvent::new(
        version,
        Op::Put {
            uid,
            text: text.to_string(),
        },
    )
}

fn del(version: u64, uid: Uid) -> DataEvent<Op> {
    DataEvent::new(version, Op::Del { uid })
}

/// Visible rows matching `term` across the whole composed view.
fn search(system: &System, term: &str) -> usize {
    system
        .get_index_readers()
        .unwrap()
        .iter()
        .map(|ctx| ctx.term_rows("body", term).len())
        .sum()
}

/// Visible rows across the whole composed view.
fn total_visible(system: &System) -> u32 {
    system
        .get_index_readers()
        .unwrap()
        .iter()
        .map(|ctx| ctx.num_visible_rows())
        .sum()
}

#[test]
fn test_events_become_searchable_from_memory() {
    let dir = TempDir::new().unwrap();
    let system = new_system(&dir, manual_drain_config());

    system
        .consume(vec![put(1, 1, "hello world"), put(2, 2, "hello index")])
        .unwrap();
    system
        .flush_to_version(2, Duration::from_secs(10))
        .unwrap();

    assert_eq!(search(&system, "hello"), 2);
    assert_eq!(search(&system, "world"), 1);
    assert_eq!(total_visible(&system), 2);
    // nothing has reached disk yet
    assert_eq!(system.status().disk_num_docs, 0);

    system.shutdown();
}

#[test]
fn test_update_and_delete_stay_deduplicated() {
    let dir = TempDir::new().unwrap();
    let system = new_system(&dir, manual_drain_config());

    system
        .consume(vec![put(1, 1, "first revision"), put(2, 2, "other doc")])
        .unwrap();
    system
        .flush_to_version(2, Duration::from_secs(10))
        .unwrap();

    system.consume(vec![put(3, 1, "second revision")]).unwrap();
    system
        .flush_to_version(3, Duration::from_secs(10))
        .unwrap();

    assert_eq!(search(&system, "first"), 0);
    assert_eq!(search(&system, "second"), 1);
    assert_eq!(total_visible(&system), 2);

    system.consume(vec![del(4, 2)]).unwrap();
    system
        .flush_to_version(4, Duration::from_secs(10))
        .unwrap();
    assert_eq!(search(&system, "other"), 0);
    assert_eq!(total_visible(&system), 1);

    system.shutdown();
}

#[test]
fn test_flush_drains_to_disk() {
    let dir = TempDir::new().unwrap();
    let system = new_system(&dir, manual_drain_config());

    system
        .consume(vec![put(1, 1, "durable doc"), put(2, 2, "also durable")])
        .unwrap();
    system.flush(Duration::from_secs(30)).unwrap();

    let status = system.status();
    assert_eq!(status.disk_num_docs, 2);
    assert_eq!(status.disk_version, 2);
    assert_eq!(status.pending_disk_events, 0);
    assert!(!status.rotation_working);

    // still exactly one view of each document
    assert_eq!(search(&system, "durable"), 2);
    assert_eq!(total_visible(&system), 2);

    system.shutdown();
}

#[test]
fn test_version_ordering_within_batch() {
    let dir = TempDir::new().unwrap();
    let system = new_system(&dir, manual_drain_config());

    // versions {5,3,7,3} applied to a fresh adapter must end at 7, and
    // uid 42's insert at version 7 must win over its delete at version 3
    // regardless of arrival order
    system
        .consume(vec![
            put(5, 1, "five"),
            del(3, 42),
            put(7, 42, "resurrected"),
            put(3, 2, "three"),
        ])
        .unwrap();
    system
        .flush_to_version(7, Duration::from_secs(10))
        .unwrap();

    assert_eq!(system.status().ram_a_version, 7);
    assert_eq!(search(&system, "resurrected"), 1);
    assert_eq!(total_visible(&system), 3);

    system.shutdown();
}

#[test]
fn test_interpretation_failure_drops_single_event() {
    let dir = TempDir::new().unwrap();
    let system = new_system(&dir, manual_drain_config());

    system
        .consume(vec![
            put(1, 1, "good"),
            DataEvent::new(2, Op::Junk),
            put(3, 2, "also good"),
        ])
        .unwrap();
    system
        .flush_to_version(3, Duration::from_secs(10))
        .unwrap();

    assert_eq!(search(&system, "good"), 2);
    assert_eq!(total_visible(&system), 2);

    system.shutdown();
}

#[test]
fn test_repeated_deletes_are_idempotent() {
    let dir = TempDir::new().unwrap();
    let system = new_system(&dir, manual_drain_config());

    system.consume(vec![put(1, 5, "here today")]).unwrap();
    system.consume(vec![del(2, 5), del(3, 5)]).unwrap();
    system.consume(vec![del(4, 5)]).unwrap();
    system
        .flush_to_version(4, Duration::from_secs(10))
        .unwrap();

    assert_eq!(total_visible(&system), 0);
    system.shutdown();
}

#[test]
fn test_non_realtime_mode_indexes_directly_to_disk() {
    let dir = TempDir::new().unwrap();
    let mut config = manual_drain_config();
    config.realtime = false;
    let system = new_system(&dir, config);
    assert!(!system.is_realtime());

    system
        .consume(vec![put(1, 1, "direct"), put(2, 2, "to disk")])
        .unwrap();
    system.flush(Duration::from_secs(30)).unwrap();

    let status = system.status();
    assert_eq!(status.disk_num_docs, 2);
    assert_eq!(status.ram_a_num_docs, 0);
    assert_eq!(search(&system, "direct"), 1);

    system.shutdown();
}

#[test]
fn test_restart_recovers_disk_state() {
    let dir = TempDir::new().unwrap();
    {
        let system = new_system(&dir, manual_drain_config());
        system.consume(vec![put(9, 1, "survives restart")]).unwrap();
        system.flush(Duration::from_secs(30)).unwrap();
        assert_eq!(system.current_disk_version(), 9);
        system.shutdown();
    }

    let system = new_system(&dir, manual_drain_config());
    assert_eq!(system.current_disk_version(), 9);
    assert_eq!(search(&system, "survives"), 1);
    system.shutdown();
}

#[test]
fn test_purge_empties_everything() {
    let dir = TempDir::new().unwrap();
    let system = new_system(&dir, manual_drain_config());

    system.consume(vec![put(1, 1, "doomed")]).unwrap();
    system.flush(Duration::from_secs(30)).unwrap();

    system.purge_index().unwrap();
    assert_eq!(total_visible(&system), 0);
    assert_eq!(system.current_disk_version(), 0);
    assert_eq!(system.status().disk_num_docs, 0);

    system.shutdown();
}

#[test]
fn test_optimize_and_expunge_keep_results_stable() {
    let dir = TempDir::new().unwrap();
    let system = new_system(&dir, manual_drain_config());

    for round in 0..3u64 {
        let base = round * 10;
        system
            .consume(vec![
                put(base + 1, (base as Uid) + 1, "stable corpus"),
                put(base + 2, (base as Uid) + 2, "stable corpus"),
            ])
            .unwrap();
        system.flush(Duration::from_secs(30)).unwrap();
    }
    system.consume(vec![del(100, 1)]).unwrap();
    system.flush(Duration::from_secs(30)).unwrap();

    assert_eq!(search(&system, "stable"), 5);

    system.expunge_deletes().unwrap();
    assert_eq!(search(&system, "stable"), 5);

    system.optimize().unwrap();
    assert_eq!(search(&system, "stable"), 5);
    assert_eq!(system.status().disk_num_docs, 5);

    system.shutdown();
}

#[test]
fn test_concurrent_readers_see_consistent_generations() {
    let dir = TempDir::new().unwrap();
    // small batch and delay so rotations happen while readers run
    let config = RealtimeIndexConfig {
        batch_size: 4,
        max_batch_size: 1000,
        batch_delay: Duration::from_millis(50),
        mem_batch_size: 10,
        realtime: true,
    };
    let system = Arc::new(new_system(&dir, config));

    let reader_system = Arc::clone(&system);
    let probe = std::thread::spawn(move || {
        for _ in 0..200 {
            let readers = reader_system.get_index_readers().unwrap();
            let visible: usize = readers
                .iter()
                .map(|ctx| ctx.term_rows("body", "singleton").len())
                .sum();
            // the single uid is never visible twice, no matter where the
            // rotation currently stands
            assert!(visible <= 1, "uid visible {visible} times");
            std::thread::sleep(Duration::from_millis(2));
        }
    });

    for version in 1..=60u64 {
        system
            .consume(vec![put(version, 77, "singleton document")])
            .unwrap();
        std::thread::sleep(Duration::from_millis(5));
    }
    probe.join().unwrap();

    system.flush(Duration::from_secs(30)).unwrap();
    assert_eq!(search(&system, "singleton"), 1);
    assert_eq!(system.current_disk_version(), 60);

    system.shutdown();
}
