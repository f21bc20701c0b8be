// LogTrail - app/remote_watcher.rs
//
// Remote directory watcher: polls a remote directory through the endpoint
// session and reports new, grown, truncated, and removed files.
//
// Architecture:
//   - Same channel/cancel pattern as `DirectoryWatcher`. The watcher owns the
//     `EndpointSession`; remote readers borrow clones of it.
//   - The background thread connects first. If that initial connect fails the
//     failure is reported once, the thread exits, and no offset table is ever
//     built, so a later start begins clean.
//   - Idle handling: `set_window_active(false)` pauses scanning and arms one
//     idle-disconnect deadline (never more than one). The background thread
//     drops the session when the deadline passes. `set_window_active(true)`
//     clears the deadline, resumes scanning, and asks the thread to reconnect
//     right away instead of waiting for the next failing operation.
//   - Growth of the selected file is decoded on a short-lived thread, from
//     the selection's tail position up to the listed size; the selection is
//     checked again when that decode completes.
//   - Stop and idle timeout release the session: nothing still running on a
//     background thread can reconnect it until a start or reactivation
//     resumes it.
//
// Error policy: background connection and listing failures are logged on every
// tick but surfaced to the consumer once per failure streak.

use crate::app::reader::NewLines;
use crate::app::remote_reader::read_new_remote_lines;
use crate::app::watch::{
    send, DecodeThreads, FileChange, FixedRate, OffsetTable, Selection, TailAnchor, WatchHandle,
};
use crate::core::codec::LineCodec;
use crate::core::model::{DeliveryMode, WatchEvent};
use crate::core::profile::RemoteTarget;
use crate::platform::fs::NameFilter;
use crate::platform::remote::EndpointSession;
use crate::util::constants;
use crate::util::error::{ReadError, RemoteError};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::{Duration, Instant};

/// Configuration for the remote watcher.
#[derive(Debug, Clone)]
pub struct RemoteWatchConfig {
    pub include_patterns: Vec<String>,
    pub poll_interval: Duration,
    /// Delay between the consumer going idle and the session being dropped.
    pub idle_disconnect: Duration,
    pub max_incremental_read_bytes: usize,
}

impl Default for RemoteWatchConfig {
    fn default() -> Self {
        Self {
            include_patterns: Vec::new(),
            poll_interval: Duration::from_millis(constants::REMOTE_POLL_INTERVAL_MS),
            idle_disconnect: Duration::from_secs(constants::IDLE_DISCONNECT_SECS),
            max_incremental_read_bytes: constants::DEFAULT_MAX_INCREMENTAL_READ_BYTES,
        }
    }
}

/// Consumer activity state shared with the background thread.
#[derive(Debug, Default)]
struct Activity {
    window_active: AtomicBool,
    reconnect_requested: AtomicBool,
    idle_deadline: Mutex<Option<Instant>>,
}

impl Activity {
    fn new() -> Self {
        Self {
            window_active: AtomicBool::new(true),
            ..Self::default()
        }
    }

    fn deadline(&self) -> std::sync::MutexGuard<'_, Option<Instant>> {
        self.idle_deadline.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Take the deadline if it has passed and run `on_expire` before the
    /// deadline lock is released, so a concurrent reactivation is ordered
    /// after it.
    fn take_expired(&self, now: Instant, on_expire: impl FnOnce()) {
        let mut deadline = self.deadline();
        if deadline.is_some_and(|at| now >= at) {
            *deadline = None;
            on_expire();
        }
    }
}

// =============================================================================
// RemoteWatcher
// =============================================================================

/// Manages a background remote polling watcher for one endpoint.
pub struct RemoteWatcher {
    session: EndpointSession,
    handle: WatchHandle,
    activity: Arc<Activity>,
    selection: Selection,
    idle_disconnect: Duration,
}

impl std::fmt::Debug for RemoteWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteWatcher")
            .field("session", &self.session)
            .field("active", &self.handle.is_active())
            .finish_non_exhaustive()
    }
}

impl RemoteWatcher {
    pub fn new(session: EndpointSession, selection: Selection) -> Self {
        Self {
            session,
            handle: WatchHandle::default(),
            activity: Arc::new(Activity::new()),
            selection,
            idle_disconnect: Duration::from_secs(constants::IDLE_DISCONNECT_SECS),
        }
    }

    /// Session handle to lend to remote readers of the same endpoint.
    pub fn session(&self) -> &EndpointSession {
        &self.session
    }

    pub fn is_active(&self) -> bool {
        self.handle.is_active()
    }

    /// Start watching `target.path` on this endpoint.
    ///
    /// Returns immediately; the connect happens on the background thread and
    /// a failure arrives as a `WatchEvent::Error`. `known` has the same
    /// meaning as for `DirectoryWatcher::start_watch`.
    pub fn start_watch(
        &mut self,
        target: &RemoteTarget,
        codec: Arc<dyn LineCodec>,
        known: HashSet<String>,
        config: RemoteWatchConfig,
    ) {
        let (tx, cancel) = self.handle.start();
        self.session.resume();
        self.idle_disconnect = config.idle_disconnect;
        *self.activity.deadline() = None;
        self.activity.reconnect_requested.store(false, Ordering::SeqCst);

        let ctx = WatchContext {
            session: self.session.clone(),
            target: target.clone(),
            codec,
            config,
            selection: self.selection.clone(),
            activity: Arc::clone(&self.activity),
            tx,
            cancel,
        };

        tracing::info!(
            endpoint = self.session.endpoint_id(),
            dir = %target.path,
            known = known.len(),
            "Remote watcher started"
        );

        let spawned = std::thread::Builder::new()
            .name("remote-watcher".to_string())
            .spawn(move || ctx.run(known));
        if let Err(e) = spawned {
            tracing::error!(error = %e, "Cannot spawn remote watcher thread");
            self.handle.stop();
        }
    }

    /// Stop the schedule and release the session. Safe to call repeatedly.
    pub fn stop_watch(&mut self) {
        if self.handle.stop() {
            tracing::info!(endpoint = self.session.endpoint_id(), "Remote watcher stopped");
        }
        *self.activity.deadline() = None;
        self.session.release();
    }

    /// Consumer focus changes. Going idle arms a single deferred disconnect;
    /// coming back cancels it and reconnects proactively.
    pub fn set_window_active(&self, active: bool) {
        self.activity.window_active.store(active, Ordering::SeqCst);
        let mut deadline = self.activity.deadline();
        if active {
            *deadline = None;
            if self.handle.is_active() {
                self.session.resume();
            }
            self.activity.reconnect_requested.store(true, Ordering::SeqCst);
            tracing::debug!(endpoint = self.session.endpoint_id(), "Window active; resuming");
        } else if deadline.is_none() {
            *deadline = Some(Instant::now() + self.idle_disconnect);
            tracing::debug!(
                endpoint = self.session.endpoint_id(),
                delay_s = self.idle_disconnect.as_secs(),
                "Window idle; disconnect scheduled"
            );
        }
    }

    /// True while an idle disconnect is pending.
    pub fn idle_disconnect_pending(&self) -> bool {
        self.activity.deadline().is_some()
    }

    pub fn poll_events(&mut self, max: usize) -> Vec<WatchEvent> {
        self.handle.poll_events(max)
    }
}

impl Drop for RemoteWatcher {
    fn drop(&mut self) {
        self.stop_watch();
    }
}

// =============================================================================
// Background thread
// =============================================================================

struct WatchContext {
    session: EndpointSession,
    target: RemoteTarget,
    codec: Arc<dyn LineCodec>,
    config: RemoteWatchConfig,
    selection: Selection,
    activity: Arc<Activity>,
    tx: mpsc::Sender<WatchEvent>,
    cancel: Arc<AtomicBool>,
}

impl WatchContext {
    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    fn error(&self, title: &str, message: String) -> bool {
        send(
            &self.tx,
            WatchEvent::Error {
                title: title.to_string(),
                message,
            },
        )
    }

    /// Cancel-check hook: idle disconnect and requested reconnect.
    fn on_wake(&self) {
        self.activity.take_expired(Instant::now(), || {
            tracing::info!(endpoint = self.session.endpoint_id(), "Idle timeout; disconnecting");
            self.session.release();
        });
        if self.activity.reconnect_requested.swap(false, Ordering::SeqCst)
            && !self.cancelled()
            && !self.session.is_alive()
        {
            match self.session.ensure_connected() {
                Ok(()) => tracing::info!(endpoint = self.session.endpoint_id(), "Reconnected"),
                Err(e) => tracing::warn!(error = %e, "Reconnect on resume failed"),
            }
        }
    }

    fn run(self, known: HashSet<String>) {
        if let Err(e) = self.session.ensure_connected() {
            tracing::error!(error = %e, "Initial remote connection failed; watcher not started");
            self.error("Connection failed", e.to_string());
            return;
        }

        let filter = NameFilter::new(&self.config.include_patterns);
        let mut table = OffsetTable::new(known);
        let mut decodes = DecodeThreads::default();
        let mut clock = FixedRate::new(self.config.poll_interval);
        let mut failing = false;

        while clock.wait(&self.cancel, || self.on_wake()) {
            if !self.activity.window_active.load(Ordering::SeqCst) {
                continue;
            }
            if !send(&self.tx, WatchEvent::ScanChanged(true)) {
                break;
            }
            let ok = self.scan(&filter, &mut table, &mut decodes);
            if self.cancelled() {
                break;
            }
            match (ok, failing) {
                (Err(message), false) => {
                    failing = true;
                    if !self.error("Remote scan failed", message) {
                        break;
                    }
                }
                (Ok(()), true) => {
                    failing = false;
                    tracing::info!(endpoint = self.session.endpoint_id(), "Remote scan recovered");
                }
                _ => {}
            }
            if !send(&self.tx, WatchEvent::ScanChanged(false)) {
                break;
            }
        }

        tracing::debug!(endpoint = self.session.endpoint_id(), "Remote watcher thread exiting");
    }

    /// One tick. Returns the failure text when the endpoint could not be
    /// listed; the tick is simply retried on the next interval.
    fn scan(
        &self,
        filter: &NameFilter,
        table: &mut OffsetTable,
        decodes: &mut DecodeThreads,
    ) -> Result<(), String> {
        if self.cancelled() {
            return Ok(());
        }
        if !self.session.is_alive() {
            tracing::info!(endpoint = self.session.endpoint_id(), "Session not alive; reconnecting");
        }
        let listing = self.session.list_files(&self.target.path).map_err(|e| {
            tracing::warn!(error = %e, "Remote listing failed");
            e.to_string()
        })?;

        let mut present = HashSet::with_capacity(listing.len());
        for stat in listing {
            if self.cancelled() {
                return Ok(());
            }
            if stat.is_dir || stat.name.starts_with('.') || !filter.matches(&stat.name) {
                continue;
            }
            present.insert(stat.name.clone());
            let Some(change) = table.observe(&stat.name, stat.size) else {
                continue;
            };
            let event = match change {
                FileChange::New { updated } => WatchEvent::FileDiscovered {
                    name: stat.name,
                    size: stat.size,
                    updated,
                },
                FileChange::Truncated => {
                    tracing::info!(file = %stat.name, size = stat.size, "Remote file truncated; re-baselined");
                    if let Some(anchor) = self.selection.anchor(&stat.name) {
                        let size = stat.size;
                        decodes.spawn(&stat.name, move || anchor.rebase(size));
                    }
                    WatchEvent::FileUpdated { name: stat.name }
                }
                FileChange::Grown if self.selection.is(&stat.name) => {
                    let job = RemoteDecodeJob {
                        session: self.session.clone(),
                        path: self.target.file_path(&stat.name),
                        name: stat.name.clone(),
                        codec: Arc::clone(&self.codec),
                        end: stat.size,
                        max_bytes: self.config.max_incremental_read_bytes,
                        selection: self.selection.clone(),
                        tx: self.tx.clone(),
                        cancel: Arc::clone(&self.cancel),
                    };
                    decodes.spawn(&stat.name, move || job.run());
                    continue;
                }
                FileChange::Grown => WatchEvent::FileUpdated { name: stat.name },
            };
            if !send(&self.tx, event) {
                return Ok(());
            }
        }

        for name in table.retain_present(&present) {
            tracing::info!(endpoint = self.session.endpoint_id(), file = %name, "Remote file removed");
            if !send(&self.tx, WatchEvent::FileRemoved { name }) {
                return Ok(());
            }
        }
        table.finish_scan();
        Ok(())
    }
}

/// Off-thread decode of the selected remote file up to its listed size.
struct RemoteDecodeJob {
    session: EndpointSession,
    path: String,
    name: String,
    codec: Arc<dyn LineCodec>,
    /// Size in the listing that reported the growth; bytes beyond it are left
    /// for the next tick.
    end: u64,
    max_bytes: usize,
    selection: Selection,
    tx: mpsc::Sender<WatchEvent>,
    cancel: Arc<AtomicBool>,
}

impl RemoteDecodeJob {
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

        let result = read_new_remote_lines(
            &self.session,
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
            tracing::debug!(file = %self.name, "Selection changed; decoded remote growth dropped");
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
            Err(ReadError::Remote(RemoteError::Released { .. })) => {
                tracing::debug!(file = %self.name, "Session released; remote growth left for later");
            }
            Err(e) => tracing::warn!(file = %self.name, error = %e, "Remote incremental read failed"),
        }
    }
}
