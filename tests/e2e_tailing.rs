// LogTrail - tests/e2e_tailing.rs
//
// End-to-end tests for paging and tailing.
//
// Local tests use the real filesystem and real watcher threads. Remote tests
// drive the same controller through the in-memory accessor, so the full path
// from a byte range on the "server" to consumer callbacks is exercised
// without a network.

use logtrail::app::controller::{AccessorFactory, Controller};
use logtrail::app::reader::{read_new_lines, LocalPagedReader, PagedLoader};
use logtrail::app::remote_reader::RemotePagedReader;
use logtrail::core::codec::PlainCodec;
use logtrail::core::model::{DeliveryMode, LogEntry, WatchEvent};
use logtrail::core::profile::{EndpointProfile, RemoteTarget};
use logtrail::platform::config::AppConfig;
use logtrail::platform::remote::{EndpointSession, MemoryAccessor, RemoteFileAccessor};
use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

// =============================================================================
// Helpers
// =============================================================================

fn fast_config() -> AppConfig {
    AppConfig {
        local_poll_interval: Duration::from_millis(100),
        remote_poll_interval: Duration::from_millis(100),
        worker_threads: 2,
        ..AppConfig::default()
    }
}

fn messages(entries: &[LogEntry]) -> Vec<String> {
    entries.iter().map(|e| e.message.clone()).collect()
}

/// Pump until `done` holds for the recorded events (5 s ceiling).
fn pump_until(
    ctl: &mut Controller,
    events: &mut Vec<WatchEvent>,
    mut done: impl FnMut(&[WatchEvent]) -> bool,
) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        ctl.pump(events);
        if done(events.as_slice()) {
            return;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    panic!("condition not reached; events so far: {events:?}");
}

/// Pump for a fixed duration and return everything delivered.
fn pump_for(ctl: &mut Controller, duration: Duration) -> Vec<WatchEvent> {
    let mut events = Vec::new();
    let deadline = Instant::now() + duration;
    while Instant::now() < deadline {
        ctl.pump(&mut events);
        std::thread::sleep(Duration::from_millis(20));
    }
    events
}

fn count_scans_finished(events: &[WatchEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, WatchEvent::ScanChanged(false)))
        .count()
}

fn memory_factory(acc: &Arc<MemoryAccessor>) -> AccessorFactory {
    let shared = Arc::clone(acc);
    Box::new(move |_t: &RemoteTarget| Arc::clone(&shared) as Arc<dyn RemoteFileAccessor>)
}

fn memory_profile() -> EndpointProfile {
    let target = RemoteTarget {
        host: "mem".to_string(),
        port: 22,
        username: "u".to_string(),
        secret: String::new(),
        path: "/logs".to_string(),
    };
    EndpointProfile::remote("mem", target, "plain")
}

// =============================================================================
// Paging
// =============================================================================

/// Pages delivered newest first, each in file order, rebuild the whole file
/// when concatenated in reverse delivery order. A reset starts over.
#[test]
fn e2e_local_pages_rebuild_file_and_reset_restarts() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.log");
    let lines: Vec<String> = (0..10).map(|i| format!("entry {i}")).collect();
    std::fs::write(&path, lines.join("\n") + "\n").unwrap();

    let mut reader = LocalPagedReader::open(&path, Arc::new(PlainCodec), 3, 1 << 20).unwrap();
    let first = reader.load_next_page().unwrap();
    let mut pages = vec![messages(&first)];
    while reader.has_more() {
        pages.push(messages(&reader.load_next_page().unwrap()));
    }
    assert_eq!(pages.len(), 4);
    let rebuilt: Vec<String> = pages.into_iter().rev().flatten().collect();
    assert_eq!(rebuilt, lines);

    reader.reset().unwrap();
    assert_eq!(reader.load_next_page().unwrap(), first);
}

#[test]
fn e2e_remote_pages_survive_small_chunks() {
    let acc = Arc::new(MemoryAccessor::new("mem:22/u"));
    let lines: Vec<String> = (0..25).map(|i| format!("{i}:{}", "x".repeat(i % 7))).collect();
    acc.put_file("/logs/app.log", (lines.join("\n") + "\n").as_bytes());

    let session = EndpointSession::new(acc.clone());
    let mut reader = RemotePagedReader::new(session, "/logs/app.log", Arc::new(PlainCodec), 4, 16);
    let mut pages = Vec::new();
    while reader.has_more() {
        pages.push(messages(&reader.load_next_page().unwrap()));
    }
    let rebuilt: Vec<String> = pages.into_iter().rev().flatten().collect();
    assert_eq!(rebuilt, lines);
}

// =============================================================================
// Incremental reads
// =============================================================================

/// Reading from the returned size yields nothing until the file grows again.
#[test]
fn e2e_growth_is_read_exactly_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.log");
    std::fs::write(&path, "old\n").unwrap();

    let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
    f.write_all(b"new 1\nnew 2\n").unwrap();
    f.flush().unwrap();

    let first = read_new_lines(&path, &PlainCodec, 4, None, 1 << 20).unwrap();
    assert_eq!(messages(&first.entries), ["new 1", "new 2"]);
    assert_eq!(first.next_offset, 16);

    let second = read_new_lines(&path, &PlainCodec, first.next_offset, None, 1 << 20).unwrap();
    assert!(second.entries.is_empty());
    assert_eq!(second.next_offset, first.next_offset);
}

// =============================================================================
// Controller: local endpoint
// =============================================================================

/// Three lines written to the selected, empty file arrive as one batch, in
/// file order, marked as newer than what is shown.
#[test]
fn e2e_selected_file_growth_arrives_as_one_batch() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.log");
    std::fs::write(&path, "").unwrap();

    let mut ctl = Controller::new(fast_config()).unwrap();
    ctl.select_profile(EndpointProfile::local("dev", dir.path(), "plain"))
        .unwrap();
    let mut events = Vec::new();
    pump_until(&mut ctl, &mut events, |e| count_scans_finished(e) >= 1);

    ctl.select_file("app.log").unwrap();
    pump_until(&mut ctl, &mut events, |e| {
        e.iter().any(|ev| matches!(ev, WatchEvent::LoadingChanged(false)))
    });

    let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
    f.write_all(b"A\nB\nC\n").unwrap();
    f.flush().unwrap();

    events.clear();
    pump_until(&mut ctl, &mut events, |e| {
        e.iter().any(|ev| matches!(ev, WatchEvent::NewEntries { .. }))
    });
    let batches: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            WatchEvent::NewEntries {
                file,
                entries,
                mode,
            } => Some((file.as_str(), messages(entries), *mode)),
            _ => None,
        })
        .collect();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].0, "app.log");
    assert_eq!(batches[0].1, ["A", "B", "C"]);
    assert_eq!(batches[0].2, DeliveryMode::Prepend);
    assert_eq!(messages(ctl.cached_entries("app.log").unwrap()), ["A", "B", "C"]);
}

/// A restarted watch keeps quiet about files the consumer already has; a
/// forced refresh announces everything again.
#[test]
fn e2e_restart_does_not_reannounce_known_files() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.log"), "a\n").unwrap();
    std::fs::write(dir.path().join("b.log"), "b\n").unwrap();

    let mut ctl = Controller::new(fast_config()).unwrap();
    ctl.select_profile(EndpointProfile::local("dev", dir.path(), "plain"))
        .unwrap();
    let mut events = Vec::new();
    pump_until(&mut ctl, &mut events, |e| count_scans_finished(e) >= 1);
    let discovered = events
        .iter()
        .filter(|e| matches!(e, WatchEvent::FileDiscovered { updated: false, .. }))
        .count();
    assert_eq!(discovered, 2);

    ctl.restart_watch();
    let after_restart = pump_for(&mut ctl, Duration::from_millis(500));
    assert!(count_scans_finished(&after_restart) >= 1);
    assert!(!after_restart
        .iter()
        .any(|e| matches!(e, WatchEvent::FileDiscovered { .. })));

    ctl.refresh();
    let mut after_refresh = Vec::new();
    pump_until(&mut ctl, &mut after_refresh, |e| count_scans_finished(e) >= 1);
    let rediscovered = after_refresh
        .iter()
        .filter(|e| matches!(e, WatchEvent::FileDiscovered { .. }))
        .count();
    assert_eq!(rediscovered, 2);
}

// =============================================================================
// Controller: remote endpoint
// =============================================================================

/// A file removed on the server is reported once and leaves the cache.
#[test]
fn e2e_remote_removal_reported_once_and_evicted() {
    let acc = Arc::new(MemoryAccessor::new("mem:22/u"));
    acc.put_file("/logs/x.log", b"one\ntwo\n");
    acc.put_file("/logs/y.log", b"three\n");

    let mut ctl = Controller::with_accessor_factory(fast_config(), memory_factory(&acc)).unwrap();
    ctl.select_profile(memory_profile()).unwrap();
    let mut events = Vec::new();
    pump_until(&mut ctl, &mut events, |e| count_scans_finished(e) >= 1);

    ctl.select_file("x.log").unwrap();
    pump_until(&mut ctl, &mut events, |e| {
        e.iter().any(|ev| matches!(ev, WatchEvent::LoadingChanged(false)))
    });
    assert_eq!(messages(ctl.cached_entries("x.log").unwrap()), ["one", "two"]);

    acc.remove_file("/logs/x.log");
    events.clear();
    pump_until(&mut ctl, &mut events, |e| {
        e.iter().any(|ev| matches!(ev, WatchEvent::FileRemoved { .. }))
    });
    events.extend(pump_for(&mut ctl, Duration::from_millis(400)));

    let removals: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            WatchEvent::FileRemoved { name } => Some(name.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(removals, ["x.log"]);
    assert!(ctl.cached_entries("x.log").is_none());
    assert_eq!(ctl.cached_listing().unwrap(), ["y.log".to_string()]);
}

/// Lines written between a scan and the selection arrive with the first page
/// and are not tailed again; later writes are tailed exactly once.
#[test]
fn e2e_remote_growth_before_selection_is_not_repeated() {
    let acc = Arc::new(MemoryAccessor::new("mem:22/u"));
    acc.put_file("/logs/x.log", b"A\n");

    let mut ctl = Controller::with_accessor_factory(fast_config(), memory_factory(&acc)).unwrap();
    ctl.select_profile(memory_profile()).unwrap();
    let mut events = Vec::new();
    pump_until(&mut ctl, &mut events, |e| count_scans_finished(e) >= 1);

    acc.append("/logs/x.log", b"B\n");
    ctl.select_file("x.log").unwrap();
    events.clear();
    pump_until(&mut ctl, &mut events, |e| {
        e.iter().any(|ev| matches!(ev, WatchEvent::LoadingChanged(false)))
    });
    events.extend(pump_for(&mut ctl, Duration::from_millis(400)));
    assert!(!events.iter().any(|e| matches!(
        e,
        WatchEvent::NewEntries {
            mode: DeliveryMode::Prepend,
            ..
        }
    )));
    assert_eq!(messages(ctl.cached_entries("x.log").unwrap()), ["A", "B"]);

    acc.append("/logs/x.log", b"C\n");
    pump_until(&mut ctl, &mut events, |e| {
        e.iter().any(|ev| matches!(ev, WatchEvent::NewEntries { mode: DeliveryMode::Prepend, .. }))
    });
    events.extend(pump_for(&mut ctl, Duration::from_millis(400)));
    let tailed: Vec<Vec<String>> = events
        .iter()
        .filter_map(|e| match e {
            WatchEvent::NewEntries {
                entries,
                mode: DeliveryMode::Prepend,
                ..
            } => Some(messages(entries)),
            _ => None,
        })
        .collect();
    assert_eq!(tailed, [vec!["C".to_string()]]);
    assert_eq!(messages(ctl.cached_entries("x.log").unwrap()), ["A", "B", "C"]);
}

/// A stopped remote watch leaves the session closed.
#[test]
fn e2e_closed_remote_profile_stays_disconnected() {
    let acc = Arc::new(MemoryAccessor::new("mem:22/u"));
    acc.put_file("/logs/x.log", b"A\n");

    let mut ctl = Controller::with_accessor_factory(fast_config(), memory_factory(&acc)).unwrap();
    ctl.select_profile(memory_profile()).unwrap();
    let mut events = Vec::new();
    pump_until(&mut ctl, &mut events, |e| count_scans_finished(e) >= 1);
    ctl.select_file("x.log").unwrap();
    acc.append("/logs/x.log", b"B\n");

    ctl.close_profile();
    let connects = acc.connect_count();
    std::thread::sleep(Duration::from_millis(400));
    assert!(!acc.is_alive());
    assert_eq!(acc.connect_count(), connects);
}

#[test]
fn e2e_remote_connect_failure_is_reported() {
    let acc = Arc::new(MemoryAccessor::new("mem:22/u"));
    acc.set_refuse_connections(true);

    let mut ctl = Controller::with_accessor_factory(fast_config(), memory_factory(&acc)).unwrap();
    ctl.select_profile(memory_profile()).unwrap();
    let mut events = Vec::new();
    pump_until(&mut ctl, &mut events, |e| {
        e.iter().any(|ev| matches!(ev, WatchEvent::Error { .. }))
    });
    assert!(events
        .iter()
        .any(|e| matches!(e, WatchEvent::Error { title, .. } if title == "Connection failed")));
    assert!(ctl.cached_listing().is_none());
}
