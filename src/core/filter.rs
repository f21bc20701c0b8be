// LogTrail - core/filter.rs
//
// Composable entry filters. All active filters are AND-combined.
// Core layer: pure logic, no I/O.
//
// Marker rows always pass, and so do entries whose timestamp has no
// recognisable date: a filter can hide rows it understands, never rows it
// cannot classify.

use crate::core::model::LogEntry;
use chrono::NaiveDate;
use std::collections::HashSet;

/// Filter state. Empty fields impose no constraint.
#[derive(Debug, Clone, Default)]
pub struct EntryFilter {
    /// Upper-cased level names to include (empty = all).
    levels: HashSet<String>,

    /// Start of the date range (inclusive).
    pub date_from: Option<NaiveDate>,

    /// End of the date range (inclusive).
    pub date_to: Option<NaiveDate>,
}

impl EntryFilter {
    /// Restrict to the given levels (case-insensitive).
    pub fn with_levels<I, S>(mut self, levels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.levels = levels
            .into_iter()
            .map(|l| l.as_ref().trim().to_uppercase())
            .filter(|l| !l.is_empty())
            .collect();
        self
    }

    pub fn with_date_range(mut self, from: Option<NaiveDate>, to: Option<NaiveDate>) -> Self {
        self.date_from = from;
        self.date_to = to;
        self
    }

    /// Returns true if no filters are active.
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty() && self.date_from.is_none() && self.date_to.is_none()
    }

    /// Check if a single entry passes every active filter.
    pub fn matches(&self, entry: &LogEntry) -> bool {
        if !entry.is_log_line() {
            return true;
        }

        if !self.levels.is_empty() && !self.levels.contains(&entry.level.to_uppercase()) {
            return false;
        }

        if self.date_from.is_some() || self.date_to.is_some() {
            if let Some(date) = parse_log_date(&entry.timestamp) {
                if self.date_from.is_some_and(|from| date < from) {
                    return false;
                }
                if self.date_to.is_some_and(|to| date > to) {
                    return false;
                }
            }
        }

        true
    }

    /// Keep only the entries that pass.
    pub fn apply(&self, entries: Vec<LogEntry>) -> Vec<LogEntry> {
        if self.is_empty() {
            return entries;
        }
        entries.into_iter().filter(|e| self.matches(e)).collect()
    }
}

/// Extract the calendar date from a raw timestamp.
///
/// Accepts `dd.MM.yyyy` and ISO `yyyy-MM-dd`, optionally followed by a time
/// part separated by a space or `T`.
pub fn parse_log_date(timestamp: &str) -> Option<NaiveDate> {
    let date_part = timestamp
        .trim()
        .split(|c: char| c == ' ' || c == 'T')
        .next()?;
    if date_part.contains('.') {
        NaiveDate::parse_from_str(date_part, "%d.%m.%Y").ok()
    } else if date_part.contains('-') {
        NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(ts: &str, level: &str) -> LogEntry {
        LogEntry::parsed(ts, "", level, "m", "", "")
    }

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_parse_log_date_both_formats() {
        assert_eq!(parse_log_date("19.04.2024 12:00:00"), Some(ymd(2024, 4, 19)));
        assert_eq!(parse_log_date("2024-04-19 12:00:00"), Some(ymd(2024, 4, 19)));
        assert_eq!(parse_log_date("2024-04-19T12:00:00"), Some(ymd(2024, 4, 19)));
        assert_eq!(parse_log_date("yesterday"), None);
        assert_eq!(parse_log_date(""), None);
    }

    #[test]
    fn test_level_filter_is_case_insensitive() {
        let f = EntryFilter::default().with_levels(["error", "Warning"]);
        assert!(f.matches(&entry("", "ERROR")));
        assert!(f.matches(&entry("", "warning")));
        assert!(!f.matches(&entry("", "INFO")));
        assert!(f.matches(&LogEntry::spacer()));
    }

    #[test]
    fn test_date_range_is_inclusive_and_lenient() {
        let f = EntryFilter::default()
            .with_date_range(Some(ymd(2024, 4, 10)), Some(ymd(2024, 4, 20)));
        assert!(f.matches(&entry("2024-04-10 00:00:00", "INFO")));
        assert!(f.matches(&entry("20.04.2024 23:59:59", "INFO")));
        assert!(!f.matches(&entry("2024-04-21 00:00:00", "INFO")));
        assert!(!f.matches(&entry("09.04.2024 00:00:00", "INFO")));
        // No date to compare: the entry stays visible.
        assert!(f.matches(&LogEntry::invalid("junk")));
    }

    #[test]
    fn test_apply_without_filters_is_identity() {
        let entries = vec![entry("", "INFO"), entry("", "DEBUG")];
        assert_eq!(EntryFilter::default().apply(entries.clone()), entries);
    }
}
