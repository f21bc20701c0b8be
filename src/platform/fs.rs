// LogTrail - platform/fs.rs
//
// Local filesystem listing for the directory watcher.
//
// Only the watched directory itself is listed (no recursion). Hidden files
// and anything that is not a regular file are skipped. Optional glob include
// patterns are matched against the file name alone.

use std::path::{Path, PathBuf};

/// One regular file found in a watched directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFileStat {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
}

/// Compiled include patterns. Empty means "every file".
#[derive(Debug, Clone, Default)]
pub struct NameFilter {
    patterns: Vec<glob::Pattern>,
}

impl NameFilter {
    /// Compile `patterns`, skipping (and logging) any that are invalid.
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Self {
        let patterns = patterns
            .iter()
            .filter_map(|p| match glob::Pattern::new(p.as_ref()) {
                Ok(pat) => Some(pat),
                Err(e) => {
                    tracing::warn!(pattern = p.as_ref(), error = %e, "Ignoring invalid include pattern");
                    None
                }
            })
            .collect();
        Self { patterns }
    }

    pub fn matches(&self, file_name: &str) -> bool {
        self.patterns.is_empty() || self.patterns.iter().any(|p| p.matches(file_name))
    }
}

/// List the regular, non-hidden files directly inside `dir`.
///
/// A missing or unreadable directory yields an empty list; the watcher keeps
/// polling and picks the files up once the directory appears.
pub fn list_log_files(dir: &Path, filter: &NameFilter) -> Vec<LocalFileStat> {
    let mut files = Vec::new();
    for entry in walkdir::WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .sort_by_file_name()
    {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::debug!(dir = %dir.display(), error = %e, "Directory entry skipped");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') || !filter.matches(&name) {
            continue;
        }
        let size = match entry.metadata() {
            Ok(m) => m.len(),
            Err(e) => {
                tracing::debug!(file = %name, error = %e, "Cannot stat file; skipped");
                continue;
            }
        };
        files.push(LocalFileStat {
            name,
            path: entry.into_path(),
            size,
        });
    }
    files
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lists_only_visible_regular_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.log"), "12345").unwrap();
        std::fs::write(dir.path().join("a.log"), "1").unwrap();
        std::fs::write(dir.path().join(".hidden"), "x").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub").join("deep.log"), "x").unwrap();

        let files = list_log_files(dir.path(), &NameFilter::default());
        let names: Vec<_> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["a.log", "b.log"]);
        assert_eq!(files[1].size, 5);
    }

    #[test]
    fn test_include_patterns_match_file_name() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("app.log"), "").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "").unwrap();

        let filter = NameFilter::new(&["*.log", "[bad"]);
        let files = list_log_files(dir.path(), &filter);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "app.log");
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(list_log_files(&dir.path().join("nope"), &NameFilter::default()).is_empty());
    }
}
