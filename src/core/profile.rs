// LogTrail - core/profile.rs
//
// Endpoint profile descriptors: where a set of log files lives (a local
// directory or a directory on an SFTP host) and which line codec reads them.
// Core layer: pure validation, never touches the filesystem or network.
//
// Profiles are supplied by the caller; persisting and editing them is the
// caller's business. Validation runs before any connection attempt so a
// misconfigured profile is rejected synchronously.

use crate::core::codec;
use crate::util::error::ProfileError;
use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;

/// Connection details for a remote endpoint.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteTarget {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u32,
    pub username: String,
    #[serde(default)]
    pub secret: String,
    /// Remote directory holding the log files.
    pub path: String,
}

fn default_port() -> u32 {
    u32::from(crate::util::constants::DEFAULT_SSH_PORT)
}

// Secrets never reach log output, not even at trace level.
impl fmt::Debug for RemoteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteTarget")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .field("path", &self.path)
            .finish()
    }
}

impl RemoteTarget {
    /// `host:port/username`, the cache and session key for this endpoint.
    pub fn endpoint_id(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.username)
    }

    /// Full remote path of `file_name` inside the watched directory.
    pub fn file_path(&self, file_name: &str) -> String {
        if self.path.ends_with('/') {
            format!("{}{file_name}", self.path)
        } else {
            format!("{}/{file_name}", self.path)
        }
    }
}

/// Where the log files of a profile live.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Location {
    Local { path: PathBuf },
    Remote(RemoteTarget),
}

/// A named log source plus the codec used to decode its lines.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EndpointProfile {
    pub name: String,
    #[serde(default = "default_codec")]
    pub codec: String,
    pub location: Location,
}

fn default_codec() -> String {
    crate::util::constants::DEFAULT_CODEC_ID.to_string()
}

impl EndpointProfile {
    pub fn local(name: impl Into<String>, path: impl Into<PathBuf>, codec: &str) -> Self {
        Self {
            name: name.into(),
            codec: codec.to_string(),
            location: Location::Local { path: path.into() },
        }
    }

    pub fn remote(name: impl Into<String>, target: RemoteTarget, codec: &str) -> Self {
        Self {
            name: name.into(),
            codec: codec.to_string(),
            location: Location::Remote(target),
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self.location, Location::Remote(_))
    }

    pub fn remote_target(&self) -> Option<&RemoteTarget> {
        match &self.location {
            Location::Remote(t) => Some(t),
            Location::Local { .. } => None,
        }
    }

    /// Identity used to key caches: `host:port/username` for remote
    /// profiles, `local:<path>` for local ones.
    pub fn endpoint_id(&self) -> String {
        match &self.location {
            Location::Local { path } => format!("local:{}", path.display()),
            Location::Remote(t) => t.endpoint_id(),
        }
    }

    /// Reject a profile that cannot possibly work, before any I/O.
    pub fn validate(&self) -> Result<(), ProfileError> {
        let missing = |field: &'static str| ProfileError::MissingField {
            profile: self.name.clone(),
            field,
        };

        if self.name.trim().is_empty() {
            return Err(missing("name"));
        }
        if codec::codec_by_id(&self.codec).is_none() {
            return Err(ProfileError::UnknownCodec {
                profile: self.name.clone(),
                codec: self.codec.clone(),
            });
        }

        match &self.location {
            Location::Local { path } => {
                if path.as_os_str().is_empty() {
                    return Err(missing("path"));
                }
            }
            Location::Remote(t) => {
                if t.path.trim().is_empty() {
                    return Err(missing("path"));
                }
                if t.host.trim().is_empty() {
                    return Err(missing("host"));
                }
                if !(1..=65_535).contains(&t.port) {
                    return Err(ProfileError::InvalidPort {
                        profile: self.name.clone(),
                        port: t.port,
                    });
                }
                if t.username.trim().is_empty() {
                    return Err(missing("username"));
                }
            }
        }
        Ok(())
    }
}
