// LogTrail - util/error.rs
//
// Typed error hierarchy with context-preserving error chains.
// No string-based error propagation (DevWorkflow Part A Rule 2).
// All errors preserve the causal chain for diagnostic logging.
//
// Unparsable log lines are deliberately absent from this hierarchy: the line
// codec turns them into invalid `LogEntry` values instead of errors.

use std::fmt;
use std::io;
use std::path::PathBuf;

/// Boxed transport-level cause, so `RemoteError` does not leak the concrete
/// protocol crate into callers that only see the accessor contract.
pub type TransportSource = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Top-level error type for all LogTrail operations.
/// Errors are categorised by the subsystem that produced them.
#[derive(Debug)]
pub enum LogTrailError {
    /// Configuration loading or validation failed.
    Config(ConfigError),

    /// An endpoint profile was rejected before any connection attempt.
    Profile(ProfileError),

    /// A local paged or incremental read failed.
    Read(ReadError),

    /// A remote session could not be established or used.
    Remote(RemoteError),

    /// The page-load worker pool could not be started.
    Worker(rayon::ThreadPoolBuildError),
}

impl fmt::Display for LogTrailError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => write!(f, "Configuration error: {e}"),
            Self::Profile(e) => write!(f, "Profile error: {e}"),
            Self::Read(e) => write!(f, "Read error: {e}"),
            Self::Remote(e) => write!(f, "Remote error: {e}"),
            Self::Worker(e) => write!(f, "Worker pool error: {e}"),
        }
    }
}

impl std::error::Error for LogTrailError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config(e) => Some(e),
            Self::Profile(e) => Some(e),
            Self::Read(e) => Some(e),
            Self::Remote(e) => Some(e),
            Self::Worker(e) => Some(e),
        }
    }
}

impl From<rayon::ThreadPoolBuildError> for LogTrailError {
    fn from(e: rayon::ThreadPoolBuildError) -> Self {
        Self::Worker(e)
    }
}

// ---------------------------------------------------------------------------
// Profile errors
// ---------------------------------------------------------------------------

/// Validation failures for an endpoint profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileError {
    /// A required field is empty.
    MissingField {
        profile: String,
        field: &'static str,
    },

    /// The SSH port is outside 1..=65535.
    InvalidPort { profile: String, port: u32 },

    /// The requested line codec id is not known.
    UnknownCodec { profile: String, codec: String },
}

impl fmt::Display for ProfileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingField { profile, field } => {
                write!(f, "Profile '{profile}': {field} is required")
            }
            Self::InvalidPort { profile, port } => write!(
                f,
                "Profile '{profile}': port {port} must be between 1 and 65535"
            ),
            Self::UnknownCodec { profile, codec } => {
                write!(f, "Profile '{profile}': unknown line codec '{codec}'")
            }
        }
    }
}

impl std::error::Error for ProfileError {}

impl From<ProfileError> for LogTrailError {
    fn from(e: ProfileError) -> Self {
        Self::Profile(e)
    }
}

// ---------------------------------------------------------------------------
// Read errors
// ---------------------------------------------------------------------------

/// Errors raised by local paged and incremental reads.
///
/// A missing file or a directory path is not an error (the read is a no-op);
/// only I/O failures on an existing file surface here.
#[derive(Debug)]
pub enum ReadError {
    /// I/O error with path context.
    Io {
        path: PathBuf,
        operation: &'static str,
        source: io::Error,
    },

    /// The remote session needed by a remote reader is unavailable.
    Remote(RemoteError),
}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io {
                path,
                operation,
                source,
            } => write!(
                f,
                "I/O error during {operation} on '{}': {source}",
                path.display()
            ),
            Self::Remote(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ReadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Remote(e) => Some(e),
        }
    }
}

impl From<ReadError> for LogTrailError {
    fn from(e: ReadError) -> Self {
        Self::Read(e)
    }
}

impl From<RemoteError> for ReadError {
    fn from(e: RemoteError) -> Self {
        Self::Remote(e)
    }
}

// ---------------------------------------------------------------------------
// Remote errors
// ---------------------------------------------------------------------------

/// Errors related to a remote endpoint session.
#[derive(Debug)]
pub enum RemoteError {
    /// TCP connection or SSH handshake failed.
    Connect {
        endpoint: String,
        source: TransportSource,
    },

    /// The server rejected the credentials.
    Auth {
        endpoint: String,
        username: String,
        source: Option<TransportSource>,
    },

    /// An operation on an established session failed.
    Transport {
        endpoint: String,
        operation: &'static str,
        path: String,
        source: TransportSource,
    },

    /// The session was released (watch stopped or idle disconnect) and may not
    /// reconnect until its owner resumes it.
    Released { endpoint: String },
}

impl RemoteError {
    /// True for failures that happened while establishing the session, which
    /// callers treat as fatal for the current operation.
    pub fn is_connect_failure(&self) -> bool {
        matches!(
            self,
            Self::Connect { .. } | Self::Auth { .. } | Self::Released { .. }
        )
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect { endpoint, source } => {
                write!(f, "Cannot connect to '{endpoint}': {source}")
            }
            Self::Auth {
                endpoint, username, ..
            } => write!(
                f,
                "Authentication as '{username}' rejected by '{endpoint}'"
            ),
            Self::Transport {
                endpoint,
                operation,
                path,
                source,
            } => write!(f, "'{endpoint}' {operation} '{path}' failed: {source}"),
            Self::Released { endpoint } => {
                write!(f, "Session to '{endpoint}' was released")
            }
        }
    }
}

impl std::error::Error for RemoteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Connect { source, .. } | Self::Transport { source, .. } => {
                Some(source.as_ref() as &(dyn std::error::Error + 'static))
            }
            Self::Auth { source, .. } => source
                .as_ref()
                .map(|s| s.as_ref() as &(dyn std::error::Error + 'static)),
            Self::Released { .. } => None,
        }
    }
}

impl From<RemoteError> for LogTrailError {
    fn from(e: RemoteError) -> Self {
        Self::Remote(e)
    }
}

// ---------------------------------------------------------------------------
// Config errors
// ---------------------------------------------------------------------------

/// Errors related to configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    /// TOML parsing failed.
    TomlParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    /// A config value is out of the allowed range.
    ValueOutOfRange {
        field: String,
        value: String,
        expected: String,
    },

    /// I/O error reading config file.
    Io { path: PathBuf, source: io::Error },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TomlParse { path, source } => {
                write!(f, "Config parse error '{}': {source}", path.display())
            }
            Self::ValueOutOfRange {
                field,
                value,
                expected,
            } => write!(
                f,
                "Config '{field}' = '{value}' is out of range. Expected: {expected}"
            ),
            Self::Io { path, source } => {
                write!(f, "Config I/O error '{}': {source}", path.display())
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::TomlParse { source, .. } => Some(source),
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<ConfigError> for LogTrailError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

/// Convenience type alias for LogTrail results.
pub type Result<T> = std::result::Result<T, LogTrailError>;
