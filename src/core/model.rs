// LogTrail - core/model.rs
//
// Core data model types. Pure data definitions with no I/O and no platform
// dependencies (Atlas Layer Rule: Core depends on std only).
//
// These types are the shared vocabulary across all layers.

use crate::util::constants::INVALID_LEVEL;
use serde::Serialize;

// =============================================================================
// Log Entry (normalised output of the line codec)
// =============================================================================

/// What a `LogEntry` row represents.
///
/// Marker rows used by a consumer's list view are explicit variants rather
/// than magic level strings, so no real severity can ever collide with them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// The codec recognised the line; `level` is a real severity.
    Valid,
    /// The codec could not parse the line; `raw_line` holds the original text.
    Invalid,
    /// "Load more" row appended after the oldest loaded page.
    LoadMore,
    /// Visual spacer row placed before the "load more" row.
    Spacer,
}

/// A single decoded log line.
///
/// Created by the line codec at read time. After construction only the
/// transient presentation fields (`highlighted`, `group_key`) are mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub kind: EntryKind,

    /// Raw timestamp text as it appears in the source (format varies).
    pub timestamp: String,

    /// Source file or channel name captured from the line (codec-dependent).
    pub source_file: String,

    /// Free-form severity string (`ERROR`, `info`, ...); `INVALID` for
    /// unparsable lines, empty for marker rows.
    pub level: String,

    pub message: String,

    /// Opaque structured text, usually embedded JSON.
    pub context: String,

    /// Opaque structured text following the context block.
    pub extra: String,

    /// Original line text. Always set for invalid entries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_line: Option<String>,

    /// Correlation key: the timestamp truncated to whole seconds.
    pub group_key: String,

    /// Set by the consumer to flag freshly tailed rows.
    #[serde(skip)]
    pub highlighted: bool,
}

impl LogEntry {
    /// Build a valid entry from codec captures.
    pub fn parsed(
        timestamp: impl Into<String>,
        source_file: impl Into<String>,
        level: impl Into<String>,
        message: impl Into<String>,
        context: impl Into<String>,
        extra: impl Into<String>,
    ) -> Self {
        let timestamp = timestamp.into();
        let group_key = group_key_for(&timestamp);
        Self {
            kind: EntryKind::Valid,
            timestamp,
            source_file: source_file.into(),
            level: level.into(),
            message: message.into(),
            context: context.into(),
            extra: extra.into(),
            raw_line: None,
            group_key,
            highlighted: false,
        }
    }

    /// Placeholder for a line no codec could parse.
    pub fn invalid(raw_line: impl Into<String>) -> Self {
        Self {
            kind: EntryKind::Invalid,
            level: INVALID_LEVEL.to_string(),
            raw_line: Some(raw_line.into()),
            ..Self::marker(EntryKind::Invalid)
        }
    }

    pub fn load_more_marker() -> Self {
        Self::marker(EntryKind::LoadMore)
    }

    pub fn spacer() -> Self {
        Self::marker(EntryKind::Spacer)
    }

    fn marker(kind: EntryKind) -> Self {
        Self {
            kind,
            timestamp: String::new(),
            source_file: String::new(),
            level: String::new(),
            message: String::new(),
            context: String::new(),
            extra: String::new(),
            raw_line: None,
            group_key: String::new(),
            highlighted: false,
        }
    }

    /// True for real log rows, valid or not; false for marker rows.
    pub fn is_log_line(&self) -> bool {
        matches!(self.kind, EntryKind::Valid | EntryKind::Invalid)
    }

    pub fn is_valid(&self) -> bool {
        self.kind != EntryKind::Invalid
    }

    /// Text to show for the row: the message for valid entries, the raw line
    /// for invalid ones.
    pub fn display_text(&self) -> &str {
        match (&self.kind, &self.raw_line) {
            (EntryKind::Invalid, Some(raw)) => raw,
            _ => &self.message,
        }
    }

    /// `context` pretty-printed when it is valid JSON, unchanged otherwise.
    pub fn context_pretty(&self) -> String {
        pretty_json_or_raw(&self.context)
    }

    /// `extra` pretty-printed when it is valid JSON, unchanged otherwise.
    pub fn extra_pretty(&self) -> String {
        pretty_json_or_raw(&self.extra)
    }
}

/// Truncate a raw timestamp to whole seconds.
///
/// `2024-04-19 12:45:22.124` and `2024-04-19T12:45:22.124+02:00` both map to
/// their `..12:45:22` prefix. Dots before the time part (as in `19.04.2024`)
/// are date separators and are kept.
pub fn group_key_for(timestamp: &str) -> String {
    let ts = timestamp.trim();
    let Some(first_colon) = ts.find(':') else {
        return ts.to_string();
    };
    match ts[first_colon..].find('.') {
        Some(dot) => ts[..first_colon + dot].trim().to_string(),
        None => ts.to_string(),
    }
}

fn pretty_json_or_raw(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    serde_json::from_str::<serde_json::Value>(trimmed)
        .and_then(|v| serde_json::to_string_pretty(&v))
        .unwrap_or_else(|_| text.to_string())
}

// =============================================================================
// Consumer-facing events
// =============================================================================

/// How a batch of entries relates to what the consumer already shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// Discard the current list and show this batch (file (re)selected).
    Replace,
    /// Newer lines appended to the file since it was last read.
    Prepend,
    /// An older page reached through "load more".
    Append,
}

/// Messages sent from watcher and worker threads to the consumer thread.
///
/// Every batch of entries is in file order (oldest line first); the
/// `DeliveryMode` tells the consumer where the batch belongs.
#[derive(Debug, Clone)]
pub enum WatchEvent {
    /// Decoded entries for `file`.
    NewEntries {
        file: String,
        entries: Vec<LogEntry>,
        mode: DeliveryMode,
    },

    /// A file appeared in the listing. `updated` is false for files that were
    /// already present when the watch started.
    FileDiscovered {
        name: String,
        size: u64,
        updated: bool,
    },

    /// A file other than the selected one grew (or was truncated).
    FileUpdated { name: String },

    /// A previously listed file is gone.
    FileRemoved { name: String },

    /// A file grew faster than the incremental read ceiling; only the newest
    /// bytes were decoded and `skipped_bytes` of older growth were dropped.
    GrowthSkipped { name: String, skipped_bytes: u64 },

    /// A background decode or page load started (`true`) or finished.
    LoadingChanged(bool),

    /// A watcher scan tick started (`true`) or finished.
    ScanChanged(bool),

    /// A user-visible failure.
    Error { title: String, message: String },
}
