// LogTrail - app/watch.rs
//
// Pieces shared by the local and remote watchers: the fixed-rate tick clock,
// the consumer's file selection, the event channel handle, and the offset
// table bookkeeping that decides what a scan reports.
//
// Threading:
//   - The offset table lives on the watcher's own background thread. Stop and
//     restart never touch it; a restart builds a new table on a new thread.
//   - `Selection` is written by the consumer thread and read by scan and
//     decode threads. Decode threads re-read it when they finish. Its tail
//     position is advanced by page workers (first page) and decode threads
//     (incremental reads), chained per file so they apply in file order.

use crate::core::model::WatchEvent;
use crate::util::constants::WATCH_CANCEL_CHECK_INTERVAL_MS;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, RwLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

// =============================================================================
// Selection
// =============================================================================

/// The file the consumer currently shows, shared with watcher threads.
///
/// Besides the name it carries the tail position of the selected file: the
/// byte offset up to which lines have reached the consumer, either through the
/// first page or through incremental reads. Growth is only ever decoded from
/// that offset, so a page load and a watcher tick can never deliver the same
/// bytes twice. Every `set` starts a new epoch and drops the tail position.
#[derive(Debug, Clone, Default)]
pub struct Selection(Arc<RwLock<SelectionState>>);

#[derive(Debug, Default)]
struct SelectionState {
    epoch: u64,
    current: Option<Selected>,
}

#[derive(Debug)]
struct Selected {
    name: String,
    epoch: u64,
    /// `None` until the first page of this selection has been read.
    tail_from: Option<u64>,
}

impl Selection {
    fn state(&self) -> std::sync::RwLockReadGuard<'_, SelectionState> {
        self.0.read().unwrap_or_else(|e| e.into_inner())
    }

    fn state_mut(&self) -> std::sync::RwLockWriteGuard<'_, SelectionState> {
        self.0.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set(&self, name: Option<&str>) {
        let mut state = self.state_mut();
        state.epoch += 1;
        let epoch = state.epoch;
        state.current = name.map(|name| Selected {
            name: name.to_string(),
            epoch,
            tail_from: None,
        });
    }

    pub fn get(&self) -> Option<String> {
        self.state().current.as_ref().map(|s| s.name.clone())
    }

    pub fn is(&self, name: &str) -> bool {
        self.state()
            .current
            .as_ref()
            .is_some_and(|s| s.name == name)
    }

    /// Handle on the tail position of `name` for the current epoch, if `name`
    /// is selected.
    pub fn anchor(&self, name: &str) -> Option<TailAnchor> {
        let state = self.state();
        let selected = state.current.as_ref().filter(|s| s.name == name)?;
        Some(TailAnchor {
            selection: self.clone(),
            name: selected.name.clone(),
            epoch: selected.epoch,
        })
    }
}

/// Tail position of one selection epoch.
///
/// Every operation is a no-op once the consumer selected something else (or
/// the same file again).
#[derive(Debug, Clone)]
pub struct TailAnchor {
    selection: Selection,
    name: String,
    epoch: u64,
}

impl TailAnchor {
    fn with_current<R>(&self, f: impl FnOnce(&mut Selected) -> R) -> Option<R> {
        let mut state = self.selection.state_mut();
        state
            .current
            .as_mut()
            .filter(|s| s.epoch == self.epoch && s.name == self.name)
            .map(f)
    }

    /// True while the selection this anchor was taken from is current.
    pub fn is_current(&self) -> bool {
        self.with_current(|_| ()).is_some()
    }

    /// Offset where the next incremental read starts, once anchored.
    pub fn tail_from(&self) -> Option<u64> {
        self.with_current(|s| s.tail_from).flatten()
    }

    /// Move the tail position forward to `offset`; it never moves back.
    /// Returns `false` when the selection has moved on.
    pub fn advance(&self, offset: u64) -> bool {
        self.with_current(|s| {
            s.tail_from = Some(s.tail_from.map_or(offset, |t| t.max(offset)));
        })
        .is_some()
    }

    /// Put an anchored tail position at `offset` after the file shrank.
    pub fn rebase(&self, offset: u64) {
        self.with_current(|s| {
            if s.tail_from.is_some() {
                s.tail_from = Some(offset);
            }
        });
    }
}

// =============================================================================
// Fixed-rate clock
// =============================================================================

/// Fixed-rate tick schedule: each deadline is the previous deadline plus the
/// interval, the first tick is due immediately, and an overdue tick runs as
/// soon as the previous one returns. Ticks never overlap because the caller
/// runs them on the one thread that waits here.
#[derive(Debug)]
pub(crate) struct FixedRate {
    interval: Duration,
    next: Instant,
}

impl FixedRate {
    pub(crate) fn new(interval: Duration) -> Self {
        Self {
            interval: interval.max(Duration::from_millis(1)),
            next: Instant::now(),
        }
    }

    /// Sleep until the next tick is due, calling `on_wake` at every cancel
    /// check. Returns `false` once `cancel` is set.
    pub(crate) fn wait(&mut self, cancel: &AtomicBool, mut on_wake: impl FnMut()) -> bool {
        let slice = Duration::from_millis(WATCH_CANCEL_CHECK_INTERVAL_MS);
        loop {
            if cancel.load(Ordering::SeqCst) {
                return false;
            }
            on_wake();
            let now = Instant::now();
            if now >= self.next {
                self.next += self.interval;
                return true;
            }
            std::thread::sleep(slice.min(self.next - now));
        }
    }
}

// =============================================================================
// Event channel handle
// =============================================================================

/// Consumer-side end of a watcher: the event receiver plus the cancel flag of
/// the running background thread.
#[derive(Debug, Default)]
pub(crate) struct WatchHandle {
    event_rx: Option<mpsc::Receiver<WatchEvent>>,
    cancel_flag: Option<Arc<AtomicBool>>,
}

impl WatchHandle {
    /// Install a fresh channel and cancel flag, returning the thread's ends.
    pub(crate) fn start(&mut self) -> (mpsc::Sender<WatchEvent>, Arc<AtomicBool>) {
        self.stop();
        let (tx, rx) = mpsc::channel();
        let cancel = Arc::new(AtomicBool::new(false));
        self.event_rx = Some(rx);
        self.cancel_flag = Some(Arc::clone(&cancel));
        (tx, cancel)
    }

    /// Cancel the thread and drop the receiver so nothing it still sends can
    /// reach the consumer. Idempotent.
    pub(crate) fn stop(&mut self) -> bool {
        let was_running = match self.cancel_flag.take() {
            Some(flag) => {
                flag.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        };
        self.event_rx = None;
        was_running
    }

    pub(crate) fn is_active(&self) -> bool {
        self.cancel_flag
            .as_ref()
            .is_some_and(|f| !f.load(Ordering::SeqCst))
    }

    /// Drain at most `max` pending events without blocking. Events beyond the
    /// budget stay queued for the next call.
    pub(crate) fn poll_events(&mut self, max: usize) -> Vec<WatchEvent> {
        let Some(rx) = &self.event_rx else {
            return Vec::new();
        };
        let mut events = Vec::with_capacity(max.min(8));
        while events.len() < max {
            match rx.try_recv() {
                Ok(ev) => events.push(ev),
                Err(mpsc::TryRecvError::Empty) => break,
                Err(mpsc::TryRecvError::Disconnected) => {
                    // Background thread exited.
                    self.event_rx = None;
                    self.cancel_flag = None;
                    break;
                }
            }
        }
        events
    }
}

// =============================================================================
// Offset table
// =============================================================================

/// What a scan decided about one listed file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum FileChange {
    /// First sighting. `updated` is false on the first scan after start.
    New { updated: bool },
    /// The file is larger than on the previous scan.
    Grown,
    /// The file is now smaller than the remembered offset.
    Truncated,
}

/// File name to last-observed size, owned by one watcher thread.
#[derive(Debug, Default)]
pub(crate) struct OffsetTable {
    sizes: HashMap<String, u64>,
    known: HashSet<String>,
    first_scan_done: bool,
}

impl OffsetTable {
    /// `known` names were already reported to the consumer before this watch
    /// started; they are recorded silently on the first scan.
    pub(crate) fn new(known: HashSet<String>) -> Self {
        Self {
            sizes: HashMap::new(),
            known,
            first_scan_done: false,
        }
    }

    /// Record the listed size of `name`, updating the table before any decode
    /// is started so the same growth is never reported twice.
    pub(crate) fn observe(&mut self, name: &str, size: u64) -> Option<FileChange> {
        match self.sizes.insert(name.to_string(), size) {
            None => {
                if !self.first_scan_done && self.known.remove(name) {
                    None
                } else {
                    Some(FileChange::New {
                        updated: self.first_scan_done,
                    })
                }
            }
            Some(previous) if size > previous => Some(FileChange::Grown),
            Some(previous) if size < previous => Some(FileChange::Truncated),
            Some(_) => None,
        }
    }

    /// Drop every tracked file not in `present`, returning the dropped names.
    pub(crate) fn retain_present(&mut self, present: &HashSet<String>) -> Vec<String> {
        let mut gone: Vec<String> = self
            .sizes
            .keys()
            .filter(|name| !present.contains(*name))
            .cloned()
            .collect();
        gone.sort();
        for name in &gone {
            self.sizes.remove(name);
        }
        gone
    }

    /// Mark the end of a complete scan.
    pub(crate) fn finish_scan(&mut self) {
        if !self.first_scan_done {
            self.first_scan_done = true;
            self.known.clear();
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.sizes.len()
    }
}

// =============================================================================
// Per-file decode chaining
// =============================================================================

/// Short-lived decode threads, at most one chain per file.
///
/// A new decode for a file first joins the previous one for the same file, so
/// growth batches reach the consumer in file order while the scan loop never
/// waits for a decode.
#[derive(Debug, Default)]
pub(crate) struct DecodeThreads {
    running: HashMap<String, JoinHandle<()>>,
}

impl DecodeThreads {
    pub(crate) fn spawn(&mut self, name: &str, work: impl FnOnce() + Send + 'static) {
        self.running.retain(|_, h| !h.is_finished());
        let previous = self.running.remove(name);
        let spawned = std::thread::Builder::new()
            .name(format!("decode-{name}"))
            .spawn(move || {
                if let Some(prev) = previous {
                    let _ = prev.join();
                }
                work();
            });
        match spawned {
            Ok(handle) => {
                self.running.insert(name.to_string(), handle);
            }
            Err(e) => tracing::error!(file = name, error = %e, "Cannot spawn decode thread"),
        }
    }
}

/// Send an event, returning `false` when the consumer side is gone.
pub(crate) fn send(tx: &mpsc::Sender<WatchEvent>, event: WatchEvent) -> bool {
    tx.send(event).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_table_first_scan_and_known_files() {
        let mut table = OffsetTable::new(HashSet::from(["known.log".to_string()]));
        assert_eq!(table.observe("known.log", 10), None);
        assert_eq!(
            table.observe("old.log", 5),
            Some(FileChange::New { updated: false })
        );
        table.finish_scan();

        assert_eq!(
            table.observe("fresh.log", 1),
            Some(FileChange::New { updated: true })
        );
        assert_eq!(
            table.observe("known.log", 12),
            Some(FileChange::Grown)
        );
        assert_eq!(table.observe("known.log", 12), None);
        assert_eq!(table.observe("known.log", 3), Some(FileChange::Truncated));
    }

    #[test]
    fn test_retain_present_reports_removed_once() {
        let mut table = OffsetTable::new(HashSet::new());
        table.observe("a", 1);
        table.observe("b", 1);
        let present = HashSet::from(["a".to_string()]);
        assert_eq!(table.retain_present(&present), ["b".to_string()]);
        assert!(table.retain_present(&present).is_empty());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_selection_is_shared() {
        let sel = Selection::default();
        let other = sel.clone();
        sel.set(Some("x.log"));
        assert!(other.is("x.log"));
        assert_eq!(other.get().as_deref(), Some("x.log"));
        sel.set(None);
        assert!(!other.is("x.log"));
    }

    #[test]
    fn test_tail_anchor_moves_forward_only_within_one_selection() {
        let sel = Selection::default();
        assert!(sel.anchor("a.log").is_none());
        sel.set(Some("a.log"));
        let anchor = sel.anchor("a.log").unwrap();
        assert_eq!(anchor.tail_from(), None);

        assert!(anchor.advance(10));
        assert!(anchor.advance(4));
        assert_eq!(anchor.tail_from(), Some(10));
        anchor.rebase(3);
        assert_eq!(anchor.tail_from(), Some(3));

        // Selecting again, even the same file, starts a new epoch.
        sel.set(Some("a.log"));
        assert!(!anchor.is_current());
        assert!(!anchor.advance(20));
        assert_eq!(anchor.tail_from(), None);
        assert_eq!(sel.anchor("a.log").unwrap().tail_from(), None);
    }

    #[test]
    fn test_rebase_leaves_unanchored_tail_alone() {
        let sel = Selection::default();
        sel.set(Some("a.log"));
        let anchor = sel.anchor("a.log").unwrap();
        anchor.rebase(5);
        assert_eq!(anchor.tail_from(), None);
    }

    #[test]
    fn test_fixed_rate_first_tick_is_immediate_and_cancel_stops() {
        let cancel = AtomicBool::new(false);
        let mut clock = FixedRate::new(Duration::from_secs(3600));
        let started = Instant::now();
        assert!(clock.wait(&cancel, || {}));
        assert!(started.elapsed() < Duration::from_secs(1));

        cancel.store(true, Ordering::SeqCst);
        assert!(!clock.wait(&cancel, || {}));
    }

    #[test]
    fn test_watch_handle_stop_is_idempotent() {
        let mut handle = WatchHandle::default();
        let (tx, _cancel) = handle.start();
        assert!(handle.is_active());
        tx.send(WatchEvent::ScanChanged(true)).unwrap();
        assert_eq!(handle.poll_events(10).len(), 1);
        assert!(handle.stop());
        assert!(!handle.stop());
        assert!(!handle.is_active());
        assert!(!send(&tx, WatchEvent::ScanChanged(false)));
    }
}
