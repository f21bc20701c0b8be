// LogTrail - platform/config.rs
//
// Where config.toml lives on each platform, and how its paging, watch,
// remote, worker, and logging sections become a validated `AppConfig`.
//
// Every value is range-checked at startup (Rule 13). A bad value never stops
// the program: it is reported as a warning and the default is used.

use crate::util::constants;
use crate::util::error::ConfigError;
use directories::ProjectDirs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Resolved platform paths for LogTrail configuration and data.
#[derive(Debug, Clone)]
pub struct PlatformPaths {
    /// Configuration directory (e.g. ~/.config/logtrail/ or %APPDATA%\LogTrail\config\)
    pub config_dir: PathBuf,

    /// Data directory for logs and caches.
    pub data_dir: PathBuf,
}

impl PlatformPaths {
    /// Resolve platform-appropriate paths.
    ///
    /// Falls back to current directory if platform dirs cannot be determined.
    pub fn resolve() -> Self {
        if let Some(proj_dirs) = ProjectDirs::from("", "", constants::APP_ID) {
            let config_dir = proj_dirs.config_dir().to_path_buf();
            let data_dir = proj_dirs.data_dir().to_path_buf();

            tracing::debug!(
                config = %config_dir.display(),
                data = %data_dir.display(),
                "Platform paths resolved"
            );

            Self {
                config_dir,
                data_dir,
            }
        } else {
            tracing::warn!("Could not determine platform directories, using current directory");
            let fallback = PathBuf::from(".");
            Self {
                config_dir: fallback.clone(),
                data_dir: fallback,
            }
        }
    }

    /// Full path of config.toml.
    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join(constants::CONFIG_FILE_NAME)
    }
}

// =============================================================================
// config.toml loading and validation (Rule 13)
// =============================================================================

/// Raw deserialisable shape of config.toml.
///
/// Unknown keys are silently ignored for forward compatibility.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct RawConfig {
    pub paging: PagingSection,
    pub watch: WatchSection,
    pub remote: RemoteSection,
    pub workers: WorkersSection,
    pub logging: LoggingSection,
}

/// `[paging]` config section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct PagingSection {
    /// Lines per backward page.
    pub page_size: Option<usize>,
    /// Bytes fetched per remote page round trip.
    pub remote_chunk_bytes: Option<usize>,
    /// Ceiling for one incremental read.
    pub max_incremental_read_bytes: Option<usize>,
}

/// `[watch]` config section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct WatchSection {
    pub local_poll_interval_ms: Option<u64>,
    pub remote_poll_interval_ms: Option<u64>,
    pub idle_disconnect_secs: Option<u64>,
    /// File name glob patterns; empty means every file.
    pub include_patterns: Option<Vec<String>>,
}

/// `[remote]` config section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct RemoteSection {
    pub connect_timeout_ms: Option<u64>,
    pub channel_timeout_ms: Option<u64>,
    pub keepalive_interval_secs: Option<u32>,
}

/// `[workers]` config section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct WorkersSection {
    /// Page-load worker threads (0 = default).
    pub threads: Option<usize>,
}

/// `[logging]` config section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub level: Option<String>,
    /// Log file path (empty = stderr only).
    pub file: Option<String>,
}

/// Tunables for paging, watching, and remote access, after validation.
#[derive(Debug, Clone)]
pub struct AppConfig {
    // -- Paging --
    pub page_size: usize,
    pub remote_chunk_bytes: usize,
    pub max_incremental_read_bytes: usize,

    // -- Watch --
    pub local_poll_interval: Duration,
    pub remote_poll_interval: Duration,
    pub idle_disconnect: Duration,
    pub include_patterns: Vec<String>,

    // -- Remote --
    pub connect_timeout: Duration,
    pub channel_timeout: Duration,
    pub keepalive_interval_secs: u32,

    // -- Workers --
    pub worker_threads: usize,

    // -- Logging --
    /// Logging level string (for init before tracing is available).
    pub log_level: Option<String>,
    /// Log file path.
    pub log_file: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            page_size: constants::DEFAULT_PAGE_SIZE,
            remote_chunk_bytes: constants::DEFAULT_REMOTE_CHUNK_BYTES,
            max_incremental_read_bytes: constants::DEFAULT_MAX_INCREMENTAL_READ_BYTES,
            local_poll_interval: Duration::from_millis(constants::LOCAL_POLL_INTERVAL_MS),
            remote_poll_interval: Duration::from_millis(constants::REMOTE_POLL_INTERVAL_MS),
            idle_disconnect: Duration::from_secs(constants::IDLE_DISCONNECT_SECS),
            include_patterns: Vec::new(),
            connect_timeout: Duration::from_millis(constants::REMOTE_CONNECT_TIMEOUT_MS),
            channel_timeout: Duration::from_millis(constants::REMOTE_CHANNEL_TIMEOUT_MS),
            keepalive_interval_secs: constants::REMOTE_KEEPALIVE_INTERVAL_SECS,
            worker_threads: constants::DEFAULT_WORKER_THREADS,
            log_level: None,
            log_file: None,
        }
    }
}

/// Accept `value` when inside `range`, otherwise record a warning and keep the
/// default already stored in `slot`.
fn checked<T>(
    warnings: &mut Vec<String>,
    field: &str,
    value: T,
    range: std::ops::RangeInclusive<T>,
    slot: &mut T,
) where
    T: PartialOrd + Copy + std::fmt::Display,
{
    if range.contains(&value) {
        *slot = value;
    } else {
        let err = ConfigError::ValueOutOfRange {
            field: field.to_string(),
            value: value.to_string(),
            expected: format!("{}-{}", range.start(), range.end()),
        };
        warnings.push(format!("{err}. Using default ({slot})."));
    }
}

/// Load and validate `config.toml` at `config_path`.
///
/// Returns `AppConfig` with validated values and a list of non-fatal warnings.
/// A missing file yields defaults with no warnings (first run). An unreadable
/// or unparseable file yields defaults plus one warning.
pub fn load_config(config_path: &Path) -> (AppConfig, Vec<String>) {
    let mut warnings: Vec<String> = Vec::new();

    if !config_path.exists() {
        tracing::debug!(path = %config_path.display(), "No config.toml found; using defaults");
        return (AppConfig::default(), warnings);
    }

    let content = match std::fs::read_to_string(config_path) {
        Ok(c) => c,
        Err(source) => {
            let err = ConfigError::Io {
                path: config_path.to_path_buf(),
                source,
            };
            let msg = format!("{err}. Using defaults.");
            tracing::warn!("{}", msg);
            warnings.push(msg);
            return (AppConfig::default(), warnings);
        }
    };

    let (config, mut value_warnings) = parse_config(&content, config_path);
    warnings.append(&mut value_warnings);
    (config, warnings)
}

/// Validate config text. Split from `load_config` so the rules can be tested
/// without touching the filesystem.
pub fn parse_config(content: &str, origin: &Path) -> (AppConfig, Vec<String>) {
    let mut warnings: Vec<String> = Vec::new();

    let raw: RawConfig = match toml::from_str(content) {
        Ok(r) => r,
        Err(source) => {
            let err = ConfigError::TomlParse {
                path: origin.to_path_buf(),
                source,
            };
            let msg = format!("{err}. Using defaults.");
            tracing::warn!("{}", msg);
            warnings.push(msg);
            return (AppConfig::default(), warnings);
        }
    };

    tracing::info!(path = %origin.display(), "Loaded config.toml");

    let mut config = AppConfig::default();

    // -- Paging --
    if let Some(v) = raw.paging.page_size {
        checked(
            &mut warnings,
            "[paging] page_size",
            v,
            constants::MIN_PAGE_SIZE..=constants::MAX_PAGE_SIZE,
            &mut config.page_size,
        );
    }
    if let Some(v) = raw.paging.remote_chunk_bytes {
        checked(
            &mut warnings,
            "[paging] remote_chunk_bytes",
            v,
            constants::MIN_REMOTE_CHUNK_BYTES..=constants::MAX_REMOTE_CHUNK_BYTES,
            &mut config.remote_chunk_bytes,
        );
    }
    if let Some(v) = raw.paging.max_incremental_read_bytes {
        checked(
            &mut warnings,
            "[paging] max_incremental_read_bytes",
            v,
            constants::MIN_INCREMENTAL_READ_BYTES..=constants::MAX_INCREMENTAL_READ_BYTES,
            &mut config.max_incremental_read_bytes,
        );
    }

    // -- Watch --
    let poll_range = constants::MIN_POLL_INTERVAL_MS..=constants::MAX_POLL_INTERVAL_MS;
    if let Some(v) = raw.watch.local_poll_interval_ms {
        let mut ms = constants::LOCAL_POLL_INTERVAL_MS;
        checked(&mut warnings, "[watch] local_poll_interval_ms", v, poll_range.clone(), &mut ms);
        config.local_poll_interval = Duration::from_millis(ms);
    }
    if let Some(v) = raw.watch.remote_poll_interval_ms {
        let mut ms = constants::REMOTE_POLL_INTERVAL_MS;
        checked(&mut warnings, "[watch] remote_poll_interval_ms", v, poll_range, &mut ms);
        config.remote_poll_interval = Duration::from_millis(ms);
    }
    if let Some(v) = raw.watch.idle_disconnect_secs {
        let mut secs = constants::IDLE_DISCONNECT_SECS;
        checked(
            &mut warnings,
            "[watch] idle_disconnect_secs",
            v,
            constants::MIN_IDLE_DISCONNECT_SECS..=constants::MAX_IDLE_DISCONNECT_SECS,
            &mut secs,
        );
        config.idle_disconnect = Duration::from_secs(secs);
    }
    if let Some(patterns) = raw.watch.include_patterns {
        for p in patterns {
            match glob::Pattern::new(&p) {
                Ok(_) => config.include_patterns.push(p),
                Err(e) => warnings.push(format!(
                    "[watch] include_patterns entry \"{p}\" is not a valid glob ({e}). Ignored."
                )),
            }
        }
    }

    // -- Remote --
    let timeout_range = constants::MIN_REMOTE_TIMEOUT_MS..=constants::MAX_REMOTE_TIMEOUT_MS;
    if let Some(v) = raw.remote.connect_timeout_ms {
        let mut ms = constants::REMOTE_CONNECT_TIMEOUT_MS;
        checked(&mut warnings, "[remote] connect_timeout_ms", v, timeout_range.clone(), &mut ms);
        config.connect_timeout = Duration::from_millis(ms);
    }
    if let Some(v) = raw.remote.channel_timeout_ms {
        let mut ms = constants::REMOTE_CHANNEL_TIMEOUT_MS;
        checked(&mut warnings, "[remote] channel_timeout_ms", v, timeout_range, &mut ms);
        config.channel_timeout = Duration::from_millis(ms);
    }
    if let Some(v) = raw.remote.keepalive_interval_secs {
        // libssh2 treats 0 as "keep-alive off", which is a valid choice.
        checked(
            &mut warnings,
            "[remote] keepalive_interval_secs",
            v,
            0..=3_600,
            &mut config.keepalive_interval_secs,
        );
    }

    // -- Workers --
    match raw.workers.threads {
        Some(0) | None => {}
        Some(v) => checked(
            &mut warnings,
            "[workers] threads",
            v,
            1..=constants::MAX_WORKER_THREADS,
            &mut config.worker_threads,
        ),
    }

    // -- Logging: level --
    if let Some(ref level) = raw.logging.level {
        let valid = ["error", "warn", "info", "debug", "trace"];
        if valid.contains(&level.to_lowercase().as_str()) {
            config.log_level = Some(level.to_lowercase());
        } else {
            warnings.push(format!(
                "[logging] level = \"{level}\" is not recognised. \
                 Valid values: error, warn, info, debug, trace. Using default (info).",
            ));
        }
    }

    // -- Logging: file --
    if let Some(ref file) = raw.logging.file {
        if !file.is_empty() {
            config.log_file = Some(file.clone());
        }
    }

    if !warnings.is_empty() {
        tracing::warn!(
            count = warnings.len(),
            "Config validation produced warnings"
        );
    }

    (config, warnings)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> (AppConfig, Vec<String>) {
        parse_config(text, Path::new("config.toml"))
    }

    #[test]
    fn test_empty_config_yields_defaults() {
        let (cfg, warnings) = parse("");
        assert!(warnings.is_empty());
        assert_eq!(cfg.page_size, constants::DEFAULT_PAGE_SIZE);
        assert_eq!(cfg.worker_threads, constants::DEFAULT_WORKER_THREADS);
        assert_eq!(
            cfg.remote_poll_interval,
            Duration::from_millis(constants::REMOTE_POLL_INTERVAL_MS)
        );
    }

    #[test]
    fn test_valid_values_are_applied() {
        let (cfg, warnings) = parse(
            r#"
            [paging]
            page_size = 100
            [watch]
            local_poll_interval_ms = 250
            include_patterns = ["*.log"]
            [remote]
            keepalive_interval_secs = 0
            [workers]
            threads = 2
            [logging]
            level = "DEBUG"
            "#,
        );
        assert!(warnings.is_empty(), "{warnings:?}");
        assert_eq!(cfg.page_size, 100);
        assert_eq!(cfg.local_poll_interval, Duration::from_millis(250));
        assert_eq!(cfg.include_patterns, vec!["*.log".to_string()]);
        assert_eq!(cfg.keepalive_interval_secs, 0);
        assert_eq!(cfg.worker_threads, 2);
        assert_eq!(cfg.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_out_of_range_values_fall_back_with_warnings() {
        let (cfg, warnings) = parse(
            r#"
            [paging]
            page_size = 0
            [watch]
            remote_poll_interval_ms = 5
            include_patterns = ["[bad"]
            [logging]
            level = "loud"
            "#,
        );
        assert_eq!(warnings.len(), 4, "{warnings:?}");
        assert!(warnings[0].contains("[paging] page_size"));
        assert_eq!(cfg.page_size, constants::DEFAULT_PAGE_SIZE);
        assert_eq!(
            cfg.remote_poll_interval,
            Duration::from_millis(constants::REMOTE_POLL_INTERVAL_MS)
        );
        assert!(cfg.include_patterns.is_empty());
        assert!(cfg.log_level.is_none());
    }

    #[test]
    fn test_unparseable_config_yields_defaults_and_one_warning() {
        let (cfg, warnings) = parse("[paging\npage_size = ");
        assert_eq!(warnings.len(), 1);
        assert_eq!(cfg.page_size, constants::DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn test_missing_file_is_silent() {
        let dir = tempfile::tempdir().unwrap();
        let (_, warnings) = load_config(&dir.path().join("config.toml"));
        assert!(warnings.is_empty());
    }
}
