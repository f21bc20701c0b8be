// LogTrail - app/controller.rs
//
// Consumer-facing orchestration: one active endpoint profile, its watcher, the
// reader of the selected file, the result cache, and the page-load pool.
//
// Threading model:
//   - Every public method and `pump` run on the consumer's thread. Watcher and
//     worker threads only ever send messages; the cache, the selection state,
//     and every consumer callback are touched here and nowhere else.
//   - `pump` drains a bounded number of messages per call
//     (MAX_EVENTS_PER_PUMP) so a burst of events cannot starve the caller.
//   - Page results carry a generation number. Selecting another file or
//     profile bumps the generation; older results are dropped unseen.

use crate::app::consumer::{dispatch, LogConsumer};
use crate::app::dir_watcher::{DirWatchConfig, DirectoryWatcher};
use crate::app::reader::{LocalPagedReader, PagedLoader};
use crate::app::remote_reader::RemotePagedReader;
use crate::app::remote_watcher::{RemoteWatchConfig, RemoteWatcher};
use crate::app::watch::Selection;
use crate::app::worker::{PageResult, PageWorkers, SharedLoader};
use crate::core::cache::ResultCache;
use crate::core::codec::{codec_by_id, LineCodec};
use crate::core::filter::EntryFilter;
use crate::core::model::{DeliveryMode, LogEntry, WatchEvent};
use crate::core::profile::{EndpointProfile, Location, RemoteTarget};
use crate::platform::config::AppConfig;
use crate::platform::remote::{EndpointSession, RemoteFileAccessor};
use crate::platform::sftp::{SftpAccessor, SftpSettings};
use crate::util::constants::MAX_EVENTS_PER_PUMP;
use crate::util::error::{LogTrailError, ProfileError};
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

/// Builds the transport for a remote profile.
pub type AccessorFactory = Box<dyn Fn(&RemoteTarget) -> Arc<dyn RemoteFileAccessor> + Send>;

/// Factory producing SFTP accessors with the configured timeouts.
pub fn sftp_factory(config: &AppConfig) -> AccessorFactory {
    let settings = SftpSettings {
        connect_timeout: config.connect_timeout,
        channel_timeout: config.channel_timeout,
        keepalive_interval_secs: config.keepalive_interval_secs,
    };
    Box::new(move |target: &RemoteTarget| {
        // Validation guarantees 1..=65535.
        let port = u16::try_from(target.port).unwrap_or(crate::util::constants::DEFAULT_SSH_PORT);
        Arc::new(SftpAccessor::new(
            target.host.clone(),
            port,
            target.username.clone(),
            target.secret.clone(),
            settings,
        )) as Arc<dyn RemoteFileAccessor>
    })
}

/// Watcher of the active profile.
enum ActiveWatcher {
    Local(DirectoryWatcher),
    Remote(RemoteWatcher),
}

impl ActiveWatcher {
    fn poll_events(&mut self, max: usize) -> Vec<WatchEvent> {
        match self {
            Self::Local(w) => w.poll_events(max),
            Self::Remote(w) => w.poll_events(max),
        }
    }

    fn stop(&mut self) {
        match self {
            Self::Local(w) => w.stop_watch(),
            Self::Remote(w) => w.stop_watch(),
        }
    }
}

/// Tailing controller for one consumer.
pub struct Controller {
    config: AppConfig,
    accessor_factory: AccessorFactory,
    workers: PageWorkers,
    cache: ResultCache,
    filter: EntryFilter,
    selection: Selection,

    profile: Option<EndpointProfile>,
    codec: Option<Arc<dyn LineCodec>>,
    watcher: Option<ActiveWatcher>,
    window_active: bool,
    /// Files reported to the consumer for the active profile.
    announced: HashSet<String>,

    reader: Option<SharedLoader>,
    reader_has_more: bool,
    generation: u64,
    loads_in_flight: usize,

    /// Controller-originated events waiting for the next `pump`.
    pending: VecDeque<WatchEvent>,
}

impl Controller {
    /// Controller using SFTP for remote profiles.
    pub fn new(config: AppConfig) -> Result<Self, LogTrailError> {
        let factory = sftp_factory(&config);
        Self::with_accessor_factory(config, factory)
    }

    /// Controller using `factory` to build remote transports.
    pub fn with_accessor_factory(
        config: AppConfig,
        factory: AccessorFactory,
    ) -> Result<Self, LogTrailError> {
        let workers = PageWorkers::new(config.worker_threads)?;
        Ok(Self {
            config,
            accessor_factory: factory,
            workers,
            cache: ResultCache::default(),
            filter: EntryFilter::default(),
            selection: Selection::default(),
            profile: None,
            codec: None,
            watcher: None,
            window_active: true,
            announced: HashSet::new(),
            reader: None,
            reader_has_more: false,
            generation: 0,
            loads_in_flight: 0,
            pending: VecDeque::new(),
        })
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    pub fn profile(&self) -> Option<&EndpointProfile> {
        self.profile.as_ref()
    }

    pub fn selected_file(&self) -> Option<String> {
        self.selection.get()
    }

    /// True while older pages remain for the selected file.
    pub fn has_more(&self) -> bool {
        self.reader.is_some() && self.reader_has_more
    }

    pub fn is_loading(&self) -> bool {
        self.loads_in_flight > 0
    }

    /// Last known file listing of the active profile.
    pub fn cached_listing(&self) -> Option<&[String]> {
        let endpoint = self.profile.as_ref()?.endpoint_id();
        self.cache.listing(&endpoint)
    }

    /// Cached entries of `file` on the active profile, in file order.
    pub fn cached_entries(&self, file: &str) -> Option<&[LogEntry]> {
        let endpoint = self.profile.as_ref()?.endpoint_id();
        self.cache.entries(&endpoint, file)
    }

    /// Session of the active remote profile, if any.
    pub fn session(&self) -> Option<&EndpointSession> {
        match &self.watcher {
            Some(ActiveWatcher::Remote(w)) => Some(w.session()),
            _ => None,
        }
    }

    // -------------------------------------------------------------------------
    // Commands
    // -------------------------------------------------------------------------

    /// Switch to `profile`. Invalid profiles are rejected before any I/O.
    pub fn select_profile(&mut self, profile: EndpointProfile) -> Result<(), LogTrailError> {
        profile.validate()?;
        let codec = codec_by_id(&profile.codec).ok_or_else(|| ProfileError::UnknownCodec {
            profile: profile.name.clone(),
            codec: profile.codec.clone(),
        })?;

        self.close_profile();
        tracing::info!(
            profile = %profile.name,
            endpoint = %profile.endpoint_id(),
            codec = codec.id(),
            "Profile selected"
        );

        self.codec = Some(codec);
        self.profile = Some(profile);
        self.start_watcher(HashSet::new());
        Ok(())
    }

    /// Show `name`: cached entries first (instantly), then a fresh first page
    /// from the live end of the file.
    pub fn select_file(&mut self, name: &str) -> Result<(), LogTrailError> {
        let (Some(profile), Some(codec)) = (self.profile.as_ref(), self.codec.clone()) else {
            return Ok(());
        };
        self.generation += 1;
        self.selection.set(Some(name));

        let loader: Box<dyn PagedLoader> = match &profile.location {
            Location::Local { path } => Box::new(LocalPagedReader::open(
                path.join(name),
                codec,
                self.config.page_size,
                self.config.max_incremental_read_bytes,
            )?),
            Location::Remote(target) => {
                let Some(session) = self.session().cloned() else {
                    return Ok(());
                };
                Box::new(RemotePagedReader::new(
                    session,
                    target.file_path(name),
                    codec,
                    self.config.page_size,
                    self.config.remote_chunk_bytes,
                ))
            }
        };
        let loader: SharedLoader = Arc::new(Mutex::new(loader));
        self.reader = Some(Arc::clone(&loader));
        self.reader_has_more = false;

        let endpoint = profile.endpoint_id();
        if let Some(cached) = self.cache.entries(&endpoint, name) {
            tracing::debug!(file = name, entries = cached.len(), "Showing cached entries");
            let entries = self.filter.apply(cached.to_vec());
            self.pending.push_back(WatchEvent::NewEntries {
                file: name.to_string(),
                entries,
                mode: DeliveryMode::Replace,
            });
        }

        self.submit(loader, DeliveryMode::Replace, true);
        Ok(())
    }

    /// Request the next older page of the selected file. Returns false when
    /// there is nothing to load or a load is already running.
    pub fn load_more(&mut self) -> bool {
        if !self.has_more() || self.is_loading() {
            return false;
        }
        let Some(loader) = self.reader.clone() else {
            return false;
        };
        self.submit(loader, DeliveryMode::Append, false);
        true
    }

    /// Forced refresh: forget everything cached for the endpoint, restart the
    /// watch from scratch, and reload the selected file.
    pub fn refresh(&mut self) {
        let Some(endpoint) = self.profile.as_ref().map(EndpointProfile::endpoint_id) else {
            return;
        };
        self.cache.invalidate_endpoint(&endpoint);
        self.announced.clear();
        self.start_watcher(HashSet::new());
        if let Some(loader) = self.reader.clone() {
            self.generation += 1;
            // The reload re-anchors tailing at the new live end.
            let selected = self.selection.get();
            self.selection.set(selected.as_deref());
            self.submit(loader, DeliveryMode::Replace, true);
        }
    }

    /// Restart the watch without re-announcing files the consumer already has.
    pub fn restart_watch(&mut self) {
        if self.profile.is_some() {
            let known = self.announced.clone();
            self.start_watcher(known);
        }
    }

    /// Consumer focus changed. Local watchers pause; remote watchers also
    /// arm (or cancel) the idle disconnect.
    pub fn set_window_active(&mut self, active: bool) {
        self.window_active = active;
        match &self.watcher {
            Some(ActiveWatcher::Local(w)) => w.set_active(active),
            Some(ActiveWatcher::Remote(w)) => w.set_window_active(active),
            None => {}
        }
    }

    /// Replace the entry filter and re-show the selected file through it.
    pub fn set_filter(&mut self, filter: EntryFilter) {
        self.filter = filter;
        let Some(name) = self.selection.get() else {
            return;
        };
        if let Some(cached) = self.cached_entries(&name) {
            let entries = self.filter.apply(cached.to_vec());
            self.pending.push_back(WatchEvent::NewEntries {
                file: name,
                entries,
                mode: DeliveryMode::Replace,
            });
        }
    }

    /// Stop watching, drop the reader, and release the session.
    pub fn close_profile(&mut self) {
        if let Some(mut watcher) = self.watcher.take() {
            watcher.stop();
        }
        if let Some(reader) = self.reader.take() {
            reader.lock().unwrap_or_else(|e| e.into_inner()).close();
        }
        self.selection.set(None);
        self.generation += 1;
        self.reader_has_more = false;
        self.announced.clear();
        self.profile = None;
        self.codec = None;
    }

    // -------------------------------------------------------------------------
    // Event pump
    // -------------------------------------------------------------------------

    /// Deliver pending results and watcher events to `consumer`. Returns the
    /// number of callbacks made.
    pub fn pump(&mut self, consumer: &mut dyn LogConsumer) -> usize {
        let mut delivered = 0;

        while let Some(event) = self.pending.pop_front() {
            dispatch(consumer, &event);
            delivered += 1;
        }

        for result in self.workers.poll_results(MAX_EVENTS_PER_PUMP) {
            delivered += self.handle_page(result, consumer);
        }

        let events = match self.watcher.as_mut() {
            Some(w) => w.poll_events(MAX_EVENTS_PER_PUMP),
            None => Vec::new(),
        };
        for event in events {
            if let Some(event) = self.apply_watch_event(event) {
                dispatch(consumer, &event);
                delivered += 1;
            }
        }
        delivered
    }

    fn handle_page(&mut self, result: PageResult, consumer: &mut dyn LogConsumer) -> usize {
        let mut delivered = 0;
        self.loads_in_flight = self.loads_in_flight.saturating_sub(1);

        if result.generation != self.generation {
            tracing::debug!(
                file = %result.file,
                generation = result.generation,
                current = self.generation,
                "Stale page result dropped"
            );
        } else {
            self.reader_has_more = result.has_more;
            match result.entries {
                Ok(entries) => {
                    if let Some(endpoint) = self.profile.as_ref().map(EndpointProfile::endpoint_id) {
                        match result.mode {
                            DeliveryMode::Append => {
                                self.cache.extend_oldest(&endpoint, &result.file, entries.clone())
                            }
                            _ => self.cache.put_entries(&endpoint, &result.file, entries.clone()),
                        }
                    }
                    let entries = self.filter.apply(entries);
                    consumer.on_new_entries(&result.file, &entries, result.mode);
                    delivered += 1;
                }
                Err(e) => {
                    consumer.on_error("Cannot load file", &e.to_string());
                    delivered += 1;
                }
            }
        }

        if self.loads_in_flight == 0 {
            consumer.on_loading_state_changed(false);
            delivered += 1;
        }
        delivered
    }

    /// Update controller state for a watcher event. Returns the event to hand
    /// to the consumer, or `None` when it should be swallowed.
    fn apply_watch_event(&mut self, event: WatchEvent) -> Option<WatchEvent> {
        let endpoint = self.profile.as_ref()?.endpoint_id();
        match event {
            WatchEvent::FileDiscovered { ref name, .. } => {
                self.cache.add_to_listing(&endpoint, name);
                self.announced.insert(name.clone());
                Some(event)
            }
            WatchEvent::FileRemoved { ref name } => {
                self.cache.remove_file(&endpoint, name);
                self.announced.remove(name);
                if self.selection.is(name) {
                    if let Some(reader) = &self.reader {
                        reader.lock().unwrap_or_else(|e| e.into_inner()).close();
                    }
                    self.reader_has_more = false;
                }
                Some(event)
            }
            WatchEvent::NewEntries {
                file,
                entries,
                mode,
            } => {
                if !self.selection.is(&file) {
                    // Selection moved on between decode and delivery.
                    return Some(WatchEvent::FileUpdated { name: file });
                }
                self.cache.extend_newest(&endpoint, &file, &entries);
                let entries = self.filter.apply(entries);
                if entries.is_empty() {
                    return None;
                }
                Some(WatchEvent::NewEntries {
                    file,
                    entries,
                    mode,
                })
            }
            other => Some(other),
        }
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn submit(&mut self, loader: SharedLoader, mode: DeliveryMode, reset_first: bool) {
        if self.loads_in_flight == 0 {
            self.pending.push_back(WatchEvent::LoadingChanged(true));
        }
        self.loads_in_flight += 1;
        let tail = if reset_first {
            self.selection
                .get()
                .and_then(|name| self.selection.anchor(&name))
        } else {
            None
        };
        self.workers
            .submit(self.generation, loader, mode, reset_first, tail);
    }

    fn start_watcher(&mut self, known: HashSet<String>) {
        let (Some(location), Some(codec)) = (
            self.profile.as_ref().map(|p| p.location.clone()),
            self.codec.clone(),
        ) else {
            return;
        };
        let dir_config = self.dir_watch_config();
        let remote_config = self.remote_watch_config();

        match (&location, self.watcher.as_mut()) {
            (Location::Local { path }, Some(ActiveWatcher::Local(w))) => {
                w.start_watch(path.clone(), codec, known, dir_config);
            }
            (Location::Remote(target), Some(ActiveWatcher::Remote(w))) => {
                w.start_watch(target, codec, known, remote_config);
            }
            (Location::Local { path }, _) => {
                let mut w = DirectoryWatcher::new(self.selection.clone());
                w.start_watch(path.clone(), codec, known, dir_config);
                self.replace_watcher(ActiveWatcher::Local(w));
            }
            (Location::Remote(target), _) => {
                let accessor = (self.accessor_factory)(target);
                let mut w =
                    RemoteWatcher::new(EndpointSession::new(accessor), self.selection.clone());
                w.start_watch(target, codec, known, remote_config);
                self.replace_watcher(ActiveWatcher::Remote(w));
            }
        }
        if !self.window_active {
            self.set_window_active(false);
        }
    }

    fn replace_watcher(&mut self, watcher: ActiveWatcher) {
        if let Some(mut old) = self.watcher.replace(watcher) {
            old.stop();
        }
    }

    fn dir_watch_config(&self) -> DirWatchConfig {
        DirWatchConfig {
            include_patterns: self.config.include_patterns.clone(),
            poll_interval: self.config.local_poll_interval,
            max_incremental_read_bytes: self.config.max_incremental_read_bytes,
        }
    }

    fn remote_watch_config(&self) -> RemoteWatchConfig {
        RemoteWatchConfig {
            include_patterns: self.config.include_patterns.clone(),
            poll_interval: self.config.remote_poll_interval,
            idle_disconnect: self.config.idle_disconnect,
            max_incremental_read_bytes: self.config.max_incremental_read_bytes,
        }
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.close_profile();
    }
}
