// LogTrail - core/cache.rs
//
// Per-endpoint result cache: the last loaded entries of each file and the
// last file listing of each endpoint. Lets a consumer redisplay a file or a
// profile instantly while a background refresh is in flight.
//
// The cache is owned by the consumer-side controller and only mutated on the
// consumer's thread. Entries never expire on a timer; they are superseded by
// newer results or removed explicitly.

use crate::core::model::LogEntry;
use crate::util::constants::MAX_CACHED_ENTRIES_PER_FILE;
use std::collections::HashMap;

/// Cache of decoded entries and file listings keyed by endpoint identity.
#[derive(Debug)]
pub struct ResultCache {
    entries: HashMap<(String, String), Vec<LogEntry>>,
    listings: HashMap<String, Vec<String>>,
    max_entries_per_file: usize,
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(MAX_CACHED_ENTRIES_PER_FILE)
    }
}

impl ResultCache {
    pub fn new(max_entries_per_file: usize) -> Self {
        Self {
            entries: HashMap::new(),
            listings: HashMap::new(),
            max_entries_per_file: max_entries_per_file.max(1),
        }
    }

    // -------------------------------------------------------------------------
    // Entries
    // -------------------------------------------------------------------------

    /// Cached entries for `file` on `endpoint`, in file order.
    pub fn entries(&self, endpoint: &str, file: &str) -> Option<&[LogEntry]> {
        self.entries
            .get(&(endpoint.to_string(), file.to_string()))
            .map(Vec::as_slice)
    }

    /// Replace the cached entries for a file.
    pub fn put_entries(&mut self, endpoint: &str, file: &str, mut entries: Vec<LogEntry>) {
        self.trim_oldest(&mut entries);
        self.entries
            .insert((endpoint.to_string(), file.to_string()), entries);
    }

    /// Add newly tailed lines after the cached ones. No-op when nothing is
    /// cached for the file yet, since a partial set would look complete.
    pub fn extend_newest(&mut self, endpoint: &str, file: &str, newer: &[LogEntry]) {
        let max = self.max_entries_per_file;
        if let Some(cached) = self
            .entries
            .get_mut(&(endpoint.to_string(), file.to_string()))
        {
            cached.extend_from_slice(newer);
            if cached.len() > max {
                let excess = cached.len() - max;
                cached.drain(..excess);
            }
        }
    }

    /// Put an older page in front of the cached entries. Older pages are never
    /// trimmed away: the consumer explicitly asked for them.
    pub fn extend_oldest(&mut self, endpoint: &str, file: &str, older: Vec<LogEntry>) {
        let key = (endpoint.to_string(), file.to_string());
        match self.entries.get_mut(&key) {
            Some(cached) => {
                let mut merged = older;
                merged.append(cached);
                *cached = merged;
            }
            None => {
                self.entries.insert(key, older);
            }
        }
    }

    /// Drop the cached entries for one file.
    pub fn evict_entries(&mut self, endpoint: &str, file: &str) -> bool {
        self.entries
            .remove(&(endpoint.to_string(), file.to_string()))
            .is_some()
    }

    fn trim_oldest(&self, entries: &mut Vec<LogEntry>) {
        if entries.len() > self.max_entries_per_file {
            let excess = entries.len() - self.max_entries_per_file;
            entries.drain(..excess);
        }
    }

    // -------------------------------------------------------------------------
    // Listings
    // -------------------------------------------------------------------------

    /// Cached file listing for `endpoint`, in discovery order.
    pub fn listing(&self, endpoint: &str) -> Option<&[String]> {
        self.listings.get(endpoint).map(Vec::as_slice)
    }

    pub fn put_listing(&mut self, endpoint: &str, names: Vec<String>) {
        self.listings.insert(endpoint.to_string(), names);
    }

    /// Record a newly discovered file in the endpoint's listing.
    pub fn add_to_listing(&mut self, endpoint: &str, name: &str) {
        let names = self.listings.entry(endpoint.to_string()).or_default();
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }

    /// Forget a file that disappeared: removes it from the listing and evicts
    /// its cached entries.
    pub fn remove_file(&mut self, endpoint: &str, name: &str) {
        if let Some(names) = self.listings.get_mut(endpoint) {
            names.retain(|n| n != name);
        }
        self.evict_entries(endpoint, name);
    }

    // -------------------------------------------------------------------------
    // Invalidation
    // -------------------------------------------------------------------------

    /// Drop everything cached for one endpoint (forced refresh).
    pub fn invalidate_endpoint(&mut self, endpoint: &str) {
        self.listings.remove(endpoint);
        self.entries.retain(|(ep, _), _| ep != endpoint);
        tracing::debug!(endpoint, "Result cache invalidated for endpoint");
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.listings.clear();
    }
}
