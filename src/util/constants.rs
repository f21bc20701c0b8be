// LogTrail - util/constants.rs
//
// Single source of truth for all named constants, limits, and defaults.
// Referenced by DevWorkflow Part A Rule 11 (explicit named-constant limits).

// =============================================================================
// Application metadata
// =============================================================================

/// Application display name.
pub const APP_NAME: &str = "LogTrail";

/// Application identifier used for config/data directories.
pub const APP_ID: &str = "LogTrail";

/// Current application version (updated by release script).
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

// =============================================================================
// Paging
// =============================================================================

/// Default number of lines returned by one backward page read.
pub const DEFAULT_PAGE_SIZE: usize = 500;

/// Minimum user-configurable page size.
pub const MIN_PAGE_SIZE: usize = 1;

/// Maximum user-configurable page size.
pub const MAX_PAGE_SIZE: usize = 50_000;

/// Block size used by the local backward scanner. Bytes are pulled from disk in
/// blocks of this size and then walked one byte at a time in memory.
pub const BACKWARD_READ_BLOCK_SIZE: usize = 8 * 1024; // 8 KiB

/// Default number of bytes fetched per remote page round trip.
pub const DEFAULT_REMOTE_CHUNK_BYTES: usize = 1024 * 1024; // 1 MiB

/// Minimum user-configurable remote chunk size.
pub const MIN_REMOTE_CHUNK_BYTES: usize = 4 * 1024; // 4 KiB

/// Maximum user-configurable remote chunk size.
pub const MAX_REMOTE_CHUNK_BYTES: usize = 64 * 1024 * 1024; // 64 MiB

/// Copy buffer used when streaming bytes from a remote file.
pub const REMOTE_COPY_BUFFER_SIZE: usize = 8 * 1024; // 8 KiB

// =============================================================================
// Incremental tailing
// =============================================================================

/// Maximum bytes decoded from one file in a single incremental read.
///
/// When a file grows by more than this between two polls only the newest bytes
/// are decoded and the older growth is reported as skipped.
pub const DEFAULT_MAX_INCREMENTAL_READ_BYTES: usize = 4 * 1024 * 1024; // 4 MiB

/// Minimum user-configurable incremental read ceiling.
pub const MIN_INCREMENTAL_READ_BYTES: usize = 64 * 1024; // 64 KiB

/// Maximum user-configurable incremental read ceiling.
pub const MAX_INCREMENTAL_READ_BYTES: usize = 256 * 1024 * 1024; // 256 MiB

// =============================================================================
// Watchers
// =============================================================================

/// How often the local directory watcher scans (ms).
pub const LOCAL_POLL_INTERVAL_MS: u64 = 5_000;

/// How often the remote watcher lists the remote directory (ms).
pub const REMOTE_POLL_INTERVAL_MS: u64 = 10_000;

/// Minimum user-configurable poll interval for either watcher (ms).
pub const MIN_POLL_INTERVAL_MS: u64 = 100;

/// Maximum user-configurable poll interval for either watcher (ms).
pub const MAX_POLL_INTERVAL_MS: u64 = 300_000; // 5 min

/// How often a sleeping watcher thread wakes to check its cancel flag (ms).
pub const WATCH_CANCEL_CHECK_INTERVAL_MS: u64 = 50;

/// Delay between the consumer going idle and the remote session being dropped.
pub const IDLE_DISCONNECT_SECS: u64 = 60;

/// Minimum user-configurable idle-disconnect delay (s).
pub const MIN_IDLE_DISCONNECT_SECS: u64 = 1;

/// Maximum user-configurable idle-disconnect delay (s).
pub const MAX_IDLE_DISCONNECT_SECS: u64 = 86_400;

// =============================================================================
// Remote sessions
// =============================================================================

/// Default SSH port.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// TCP connect + handshake timeout (ms).
pub const REMOTE_CONNECT_TIMEOUT_MS: u64 = 5_000;

/// Timeout for opening an SFTP channel and for each blocking call on it (ms).
pub const REMOTE_CHANNEL_TIMEOUT_MS: u64 = 3_000;

/// Keep-alive interval sent on idle sessions (s).
pub const REMOTE_KEEPALIVE_INTERVAL_SECS: u32 = 15;

/// Upper bound for any configurable remote timeout (ms).
pub const MAX_REMOTE_TIMEOUT_MS: u64 = 120_000;

/// Minimum configurable remote timeout (ms).
pub const MIN_REMOTE_TIMEOUT_MS: u64 = 100;

// =============================================================================
// Worker pool
// =============================================================================

/// Number of threads serving user-triggered page loads.
pub const DEFAULT_WORKER_THREADS: usize = 4;

/// Upper bound on configurable worker threads.
pub const MAX_WORKER_THREADS: usize = 64;

// =============================================================================
// Cache and consumer budgets (Rule 11: growing-collection bounds)
// =============================================================================

/// Maximum entries kept per cached (endpoint, file) pair. Oldest entries are
/// dropped first when tail batches push the cached set past this bound.
pub const MAX_CACHED_ENTRIES_PER_FILE: usize = 20_000;

/// Maximum number of watcher events handed to the consumer per `pump` call.
pub const MAX_EVENTS_PER_PUMP: usize = 500;

// =============================================================================
// Codecs
// =============================================================================

/// Default line codec id.
pub const DEFAULT_CODEC_ID: &str = "symfony";

/// Level string carried by entries that no codec could parse.
pub const INVALID_LEVEL: &str = "INVALID";

// =============================================================================
// Logging
// =============================================================================

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Maximum length of a log line included in debug output.
/// Prevents accidental exposure of sensitive data in long lines.
pub const DEBUG_MAX_LINE_PREVIEW: usize = 200;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration file name.
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Environment variable the CLI reads the remote secret from.
pub const SECRET_ENV_VAR: &str = "LOGTRAIL_SECRET";

// =============================================================================
// CLI
// =============================================================================

/// Sleep between `Controller::pump` calls in the CLI loop.
pub const CLI_PUMP_INTERVAL_MS: u64 = 50;
