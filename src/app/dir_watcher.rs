// LogTrail - app/dir_watcher.rs
//
// Local directory watcher: polls one directory on a background thread and
// reports new, grown, truncated, and removed log files.
//
// Architecture:
//   - `DirectoryWatcher` lives on the consumer thread; `run_dir_watcher`
//     executes on a background thread ticking at a fixed rate.
//   - An `Arc<AtomicBool>` cancel flag stops the thread; a second flag pauses
//     scanning without cancelling the schedule.
//   - Events travel over an mpsc channel drained by `poll_events`.
//   - Growth of the selected file is decoded on a short-lived thread so a slow
//     read never delays the next tick. Growth of any other file is only
//     flagged with `FileUpdated`.
//   - A decode reads from the selection's tail position (where the first page
//     or the previous decode stopped) up to the size the scan listed. Writes
//     that land after the listing are left for the next tick.
//
// Rule 11 compliance:
//   - Listing and read errors are logged and retried on the next tick.
//   - The offset table is updated before a decode starts, so the same growth
//     never triggers two decodes. Decodes of one file are chained and each
//     advances the tail position, so no byte range is delivered twice.
//   - The poll loop sleeps in sub-intervals so cancel is checked promptly
//     (within WATCH_CANCEL_CHECK_INTERVAL_MS of the cancel flag being set).

use crate::app::reader::{read_new_lines, NewLines};
use crate::app::watch::{
    send, DecodeThreads, FileChange, FixedRate, OffsetTable, Selection, TailAnchor, WatchHandle,
};
use crate::core::codec::LineCodec;
use crate::core::model::{DeliveryMode, WatchEvent};
use crate::platform::fs::{list_log_files, NameFilter};
use crate::util::constants;
use crate::util::error::ReadError;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

// =============================================================================
// Watch configuration
// =============================================================================

/// Configuration for the local directory watcher.
#[derive(Debug, Clone)]
pub struct DirWatchConfig {
    /// Glob patterns (file name only) a file must match to be watched.
    pub include_patterns: Vec<String>,
    /// Time between two scan ticks.
    pub poll_interval: Duration,
    /// Ceiling for one incremental read of the selected file.
    pub max_incremental_read_bytes: usize,
}

impl Default for DirWatchConfig {
    fn default() -> Self {
        Self {
            include_patterns: Vec::new(),
            poll_interval: Duration::from_millis(constants::LOCAL_POLL_INTERVAL_MS),
            max_incremental_read_bytes: constants::DEFAULT_MAX_INCREMENTAL_READ_BYTES,
        }
    }
}

// =============================================================================
// DirectoryWatcher
// =============================================================================

/// Manages a background directory polling watcher.
pub struct DirectoryWatcher {
    handle: WatchHandle,
    /// Cleared to pause scanning; the schedule keeps running.
    active: Arc<AtomicBool>,
    selection: Selection,
}

impl DirectoryWatcher {
    /// Create an inactive watcher sharing `selection` with the consumer.
    /// No thread is started until `start_watch`.
    pub fn new(selection: Selection) -> Self {
        Self {
            handle: WatchHandle::default(),
            active: Arc::new(AtomicBool::new(true)),
            selection,
        }
    }

    /// Returns `true` if a watcher thread is currently running.
    pub fn is_active(&self) -> bool {
        self.handle.is_active()
    }

    /// Start watching `dir`.
    ///
    /// `known` holds names already reported to the consumer; they are tracked
    /// from their current size without a new `FileDiscovered`. Every other
    /// file present on the first scan is reported with `updated = false`.
    ///
    /// Calling `start_watch` while a watcher is already running stops the
    /// previous watcher first. The restart begins from a fresh offset table.
    pub fn start_watch(
        &mut self,
        dir: PathBuf,
        codec: Arc<dyn LineCodec>,
        known: HashSet<String>,
        config: DirWatchConfig,
    ) {
        let (tx, cancel) = self.handle.start();
        let active = Arc::clone(&self.active);
        let selection = self.selection.clone();

        tracing::info!(
            dir = %dir.display(),
            known = known.len(),
            interval_ms = config.poll_interval.as_millis() as u64,
            "Directory watcher started"
        );

        let spawned = std::thread::Builder::new()
            .name("dir-watcher".to_string())
            .spawn(move || {
                run_dir_watcher(dir, codec, known, config, selection, active, tx, cancel);
            });
        if let Err(e) = spawned {
            tracing::error!(error = %e, "Cannot spawn directory watcher thread");
            self.handle.stop();
        }
    }

    /// Signal the background thread to stop. Safe to call repeatedly.
    pub fn stop_watch(&mut self) {
        if self.handle.stop() {
            tracing::info!("Directory watcher stopped");
        }
    }

    /// Pause (`false`) or resume (`true`) scanning without stopping the
    /// schedule.
    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }

    /// Drain at most `max` pending events without blocking.
    pub fn poll_events(&mut self, max: usize) -> Vec<WatchEvent> {
        self.handle.poll_events(max)
    }
}

impl Drop for DirectoryWatcher {
    fn drop(&mut self) {
        self.handle.stop();
    }
}

// =============================================================================
// Background thread
// =============================================================================

#[allow(clippy::too_many_arguments)]
fn run_dir_watcher(
    dir: PathBuf,
    codec: Arc<dyn LineCodec>,
    known: HashSet<String>,
    config: DirWatchConfig,
    selection: Selection,
    active: Arc<AtomicBool>,
    tx: mpsc::Sender<WatchEvent>,
    cancel: Arc<AtomicBool>,
) {
    let filter = NameFilter::new(&config.include_patterns);
    let mut table = OffsetTable::new(known);
    let mut decodes = DecodeThreads::default();
    let mut clock = FixedRate::new(config.poll_interval);

    while clock.wait(&cancel, || {}) {
        if !active.load(Ordering::SeqCst) {
            continue;
        }
        if !send(&tx, WatchEvent::ScanChanged(true)) {
            break;
        }

        let files = list_log_files(&dir, &filter);
        let mut present = HashSet::with_capacity(files.len());

        for file in files {
            if cancel.load(Ordering::SeqCst) {
                return;
            }
            present.insert(file.name.clone());
            let Some(change) = table.observe(&file.name, file.size) else {
                continue;
            };
            let event = match change {
                FileChange::New { updated } => WatchEvent::FileDiscovered {
                    name: file.name,
                    size: file.size,
                    updated,
                },
                FileChange::Truncated => {
                    tracing::info!(file = %file.name, size = file.size, "File truncated; re-baselined");
                    if let Some(anchor) = selection.anchor(&file.name) {
                        let size = file.size;
                        decodes.spawn(&file.name, move || anchor.rebase(size));
                    }
                    WatchEvent::FileUpdated { name: file.name }
                }
                FileChange::Grown if selection.is(&file.name) => {
                    let job = DecodeJob {
                        path: file.path,
                        name: file.name.clone(),
                        codec: Arc::clone(&codec),
                        end: file.size,
                        max_bytes: config.max_incremental_read_bytes,
                        selection: selection.clone(),
                        tx: tx.clone(),
                        cancel: Arc::clone(&cancel),
                    };
                    decodes.spawn(&file.name, move || job.run());
                    continue;
                }
                FileChange::Grown => WatchEvent::FileUpdated { name: file.name },
            };
            if !send(&tx, event) {
                return;
            }
        }

        for name in table.retain_present(&present) {
            tracing::info!(file = %name, "File removed");
            if !send(&tx, WatchEvent::FileRemoved { name }) {
                return;
            }
        }
        table.finish_scan();

        tracing::trace!(dir = %dir.display(), files = table.len(), "Scan complete");
        if !send(&tx, WatchEvent::ScanChanged(false)) {
            break;
        }
    }

    tracing::debug!(dir = %dir.display(), "Directory watcher thread exiting");
}

/// Decode of the selected file from its tail position up to the listed size.
struct DecodeJob {
    path: PathBuf,
    name: String,
    codec: Arc<dyn LineCodec>,
    /// Size in the listing that reported the growth.
    end: u64,
    max_bytes: usize,
    selection: Selection,
    tx: mpsc::Sender<WatchEvent>,
    cancel: Arc<AtomicBool>,
}

impl DecodeJob {
    fn run(self) {
        if self.cancel.load(Ordering::SeqCst) {
            return;
        }
        let Some(anchor) = self.selection.anchor(&self.name) else {
            let _ = send(&self.tx, WatchEvent::FileUpdated { name: self.name });
            return;
        };
        let Some(from) = anchor.tail_from() else {
            tracing::debug!(file = %self.name, "First page not read yet; growth left to it");
            return;
        };
        if from >= self.end {
            return;
        }

        let result = read_new_lines(
            &self.path,
            self.codec.as_ref(),
            from,
            Some(self.end),
            self.max_bytes,
        );
        self.finish(&anchor, result);
    }

    /// Deliver a finished read, unless the selection moved on while it ran.
    fn finish(self, anchor: &TailAnchor, result: Result<NewLines, ReadError>) {
        let current = !self.cancel.load(Ordering::SeqCst)
            && match &result {
                Ok(new_lines) => anchor.advance(new_lines.next_offset),
                Err(_) => anchor.is_current(),
            };
        if !current {
            tracing::debug!(file = %self.name, "Selection changed; decoded growth dropped");
            let _ = send(&self.tx, WatchEvent::FileUpdated { name: self.name });
            return;
        }
        match result {
            Ok(new_lines) => {
                if new_lines.skipped_bytes > 0 {
                    let _ = send(
                        &self.tx,
                        WatchEvent::GrowthSkipped {
                            name: self.name.clone(),
                            skipped_bytes: new_lines.skipped_bytes,
                        },
                    );
                }
                if !new_lines.entries.is_empty() {
                    tracing::debug!(
                        file = %self.name,
                        entries = new_lines.entries.len(),
                        "Tailed new lines"
                    );
                    let _ = send(
                        &self.tx,
                        WatchEvent::NewEntries {
                            file: self.name,
                            entries: new_lines.entries,
                            mode: DeliveryMode::Prepend,
                        },
                    );
                }
            }
            Err(e) => {
                // Background action: logged and left for the next growth.
                tracing::warn!(file = %self.name, error = %e, "Incremental read failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::codec::PlainCodec;
    use std::io::Write;
    use std::time::Instant;

    fn config() -> DirWatchConfig {
        DirWatchConfig {
            poll_interval: Duration::from_millis(100),
            ..DirWatchConfig::default()
        }
    }

    /// Collect events until `done` returns true or the deadline passes.
    fn collect_until(
        watcher: &mut DirectoryWatcher,
        mut done: impl FnMut(&[WatchEvent]) -> bool,
    ) -> Vec<WatchEvent> {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut all = Vec::new();
        while Instant::now() < deadline {
            all.extend(watcher.poll_events(100));
            if done(&all) {
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        all
    }

    fn scans_finished(events: &[WatchEvent]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, WatchEvent::ScanChanged(false)))
            .count()
    }

    #[test]
    fn test_existing_files_reported_not_updated() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.log"), "x\n").unwrap();
        let mut watcher = DirectoryWatcher::new(Selection::default());
        watcher.start_watch(dir.path().to_path_buf(), Arc::new(PlainCodec), HashSet::new(), config());

        let events = collect_until(&mut watcher, |e| scans_finished(e) >= 1);
        assert!(events.iter().any(|e| matches!(
            e,
            WatchEvent::FileDiscovered { name, size: 2, updated: false } if name == "a.log"
        )));
        watcher.stop_watch();
        assert!(!watcher.is_active());
    }

    #[test]
    fn test_growth_of_unselected_file_is_flagged_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.log");
        std::fs::write(&path, "x\n").unwrap();
        let mut watcher = DirectoryWatcher::new(Selection::default());
        watcher.start_watch(dir.path().to_path_buf(), Arc::new(PlainCodec), HashSet::new(), config());
        collect_until(&mut watcher, |e| scans_finished(e) >= 1);

        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(b"y\n").unwrap();
        let events = collect_until(&mut watcher, |e| {
            e.iter().any(|ev| matches!(ev, WatchEvent::FileUpdated { .. }))
        });
        assert!(events
            .iter()
            .any(|e| matches!(e, WatchEvent::FileUpdated { name } if name == "a.log")));
        assert!(!events
            .iter()
            .any(|e| matches!(e, WatchEvent::NewEntries { .. })));
    }

    #[test]
    fn test_paused_watcher_does_not_scan() {
        let dir = tempfile::tempdir().unwrap();
        let mut watcher = DirectoryWatcher::new(Selection::default());
        watcher.set_active(false);
        watcher.start_watch(dir.path().to_path_buf(), Arc::new(PlainCodec), HashSet::new(), config());
        std::thread::sleep(Duration::from_millis(300));
        assert!(watcher.poll_events(100).is_empty());

        watcher.set_active(true);
        let events = collect_until(&mut watcher, |e| scans_finished(e) >= 1);
        assert!(scans_finished(&events) >= 1);
    }

    #[test]
    fn test_removed_file_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone.log");
        std::fs::write(&path, "x\n").unwrap();
        let mut watcher = DirectoryWatcher::new(Selection::default());
        watcher.start_watch(dir.path().to_path_buf(), Arc::new(PlainCodec), HashSet::new(), config());
        collect_until(&mut watcher, |e| scans_finished(e) >= 1);

        std::fs::remove_file(&path).unwrap();
        let events = collect_until(&mut watcher, |e| {
            e.iter().any(|ev| matches!(ev, WatchEvent::FileRemoved { .. }))
        });
        let removed = events
            .iter()
            .filter(|e| matches!(e, WatchEvent::FileRemoved { name } if name == "gone.log"))
            .count();
        assert_eq!(removed, 1);
    }

    fn decode_job(
        path: &std::path::Path,
        end: u64,
        selection: &Selection,
        tx: &mpsc::Sender<WatchEvent>,
    ) -> DecodeJob {
        DecodeJob {
            path: path.to_path_buf(),
            name: "a.log".to_string(),
            codec: Arc::new(PlainCodec),
            end,
            max_bytes: 1 << 20,
            selection: selection.clone(),
            tx: tx.clone(),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    fn tailed(events: &[WatchEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                WatchEvent::NewEntries { entries, .. } => Some(entries),
                _ => None,
            })
            .flatten()
            .map(|e| e.message.clone())
            .collect()
    }

    #[test]
    fn test_write_after_listing_is_left_for_next_decode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.log");
        std::fs::write(&path, "x\n").unwrap();
        let selection = Selection::default();
        selection.set(Some("a.log"));
        selection.anchor("a.log").unwrap().advance(2);
        let (tx, rx) = mpsc::channel();

        // Listed at 4 bytes; another line lands before the decode runs.
        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(b"y\n").unwrap();
        f.write_all(b"z\n").unwrap();
        decode_job(&path, 4, &selection, &tx).run();
        // The next tick lists 6 bytes, and a third sees no change in size.
        decode_job(&path, 6, &selection, &tx).run();
        decode_job(&path, 6, &selection, &tx).run();

        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(tailed(&events), ["y", "z"]);
        assert_eq!(selection.anchor("a.log").unwrap().tail_from(), Some(6));
    }

    #[test]
    fn test_selection_change_during_decode_reports_update() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.log");
        std::fs::write(&path, "x\ny\n").unwrap();
        let selection = Selection::default();
        selection.set(Some("a.log"));
        let anchor = selection.anchor("a.log").unwrap();
        anchor.advance(2);
        let (tx, rx) = mpsc::channel();

        let job = decode_job(&path, 4, &selection, &tx);
        let result = read_new_lines(&path, &PlainCodec, 2, Some(4), 1 << 20);
        // The consumer moves on before the decode completes.
        selection.set(Some("b.log"));
        job.finish(&anchor, result);

        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], WatchEvent::FileUpdated { name } if name == "a.log"));
    }

    #[test]
    fn test_growth_before_first_page_is_left_to_it() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.log");
        std::fs::write(&path, "x\ny\n").unwrap();
        let selection = Selection::default();
        selection.set(Some("a.log"));
        let (tx, rx) = mpsc::channel();

        decode_job(&path, 4, &selection, &tx).run();
        assert!(rx.try_iter().next().is_none());
    }

    #[test]
    fn test_selected_file_quiet_polls_deliver_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.log");
        std::fs::write(&path, "x\n").unwrap();
        let selection = Selection::default();
        selection.set(Some("a.log"));
        selection.anchor("a.log").unwrap().advance(2);
        let mut watcher = DirectoryWatcher::new(selection);
        watcher.start_watch(dir.path().to_path_buf(), Arc::new(PlainCodec), HashSet::new(), config());

        let quiet = collect_until(&mut watcher, |e| scans_finished(e) >= 3);
        assert!(scans_finished(&quiet) >= 3);
        assert!(tailed(&quiet).is_empty());

        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(b"y\n").unwrap();
        let mut events = collect_until(&mut watcher, |e| !tailed(e).is_empty());
        events.extend(collect_until(&mut watcher, |e| scans_finished(e) >= 3));
        assert_eq!(tailed(&events), ["y"]);
    }
}
