// LogTrail - platform/remote.rs
//
// Remote file access contract and the shared endpoint session.
//
// Architecture:
//   - `RemoteFileAccessor` is the only seam between the readers/watchers and a
//     transport. `SftpAccessor` (platform::sftp) is the production
//     implementation; `MemoryAccessor` below serves files from memory.
//   - `EndpointSession` is a cheap, cloneable handle to one accessor. The
//     remote watcher owns the session and lends clones to remote readers so
//     the expensive handshake is shared. Every operation re-validates
//     liveness and reconnects first; the transport handle itself never
//     leaves the accessor. A released session (watch stopped, idle timeout)
//     refuses to reconnect until its owner resumes it.
//
// Failure contract (Rule 11):
//   - `connect` errors are fatal for the operation that needed them.
//   - `read_chunk` / `read_last_bytes` log other failures and return empty
//     data instead of an error.
//   - `file_size` and `list_files` return errors so callers can retry later.

use crate::util::error::RemoteError;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// One directory entry returned by `list_files`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFileStat {
    pub name: String,
    pub size: u64,
    pub is_dir: bool,
}

/// Tail bytes of a remote file together with the offset they start at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LastBytes {
    pub offset: u64,
    pub bytes: Vec<u8>,
}

/// Operations a remote endpoint must support.
///
/// Paths are absolute remote paths; one accessor serves every file of its
/// endpoint.
pub trait RemoteFileAccessor: Send + Sync {
    /// `host:port/username` (or another stable identity) of the endpoint.
    fn endpoint_id(&self) -> &str;

    /// Establish the session and primary channel. No-op when already alive.
    fn connect(&self) -> Result<(), RemoteError>;

    /// Tear down the session. Safe to call when not connected.
    fn disconnect(&self);

    /// True while both the session and its primary channel are usable.
    fn is_alive(&self) -> bool;

    fn file_size(&self, path: &str) -> Result<u64, RemoteError>;

    /// Read up to `length` bytes starting at `offset`.
    fn read_chunk(&self, path: &str, offset: u64, length: usize) -> Result<Vec<u8>, RemoteError>;

    /// Read the last `max_bytes` bytes on a short-lived secondary channel.
    fn read_last_bytes(&self, path: &str, max_bytes: usize) -> Result<LastBytes, RemoteError>;

    /// List the entries of a remote directory on a short-lived channel.
    fn list_files(&self, dir: &str) -> Result<Vec<RemoteFileStat>, RemoteError>;
}

// =============================================================================
// EndpointSession
// =============================================================================

/// Shared handle to the session of one remote endpoint.
///
/// Clones share the release flag: once the owner releases the session no clone
/// can reconnect it until the owner resumes it.
#[derive(Clone)]
pub struct EndpointSession {
    accessor: Arc<dyn RemoteFileAccessor>,
    released: Arc<AtomicBool>,
}

impl std::fmt::Debug for EndpointSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointSession")
            .field("endpoint", &self.accessor.endpoint_id())
            .field("alive", &self.accessor.is_alive())
            .field("released", &self.is_released())
            .finish()
    }
}

impl EndpointSession {
    pub fn new(accessor: Arc<dyn RemoteFileAccessor>) -> Self {
        Self {
            accessor,
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn endpoint_id(&self) -> &str {
        self.accessor.endpoint_id()
    }

    pub fn is_alive(&self) -> bool {
        self.accessor.is_alive()
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    fn released_error(&self) -> RemoteError {
        RemoteError::Released {
            endpoint: self.endpoint_id().to_string(),
        }
    }

    /// Connect unless the session is already alive. Fails without touching
    /// the transport while the session is released.
    pub fn ensure_connected(&self) -> Result<(), RemoteError> {
        if self.is_released() {
            return Err(self.released_error());
        }
        if self.accessor.is_alive() {
            return Ok(());
        }
        tracing::debug!(endpoint = self.endpoint_id(), "Session not alive; connecting");
        self.accessor.connect()?;
        if self.is_released() {
            // Released while the handshake was running.
            self.accessor.disconnect();
            return Err(self.released_error());
        }
        Ok(())
    }

    /// Drop the transport and refuse to reconnect until `resume`.
    pub fn release(&self) {
        self.released.store(true, Ordering::SeqCst);
        self.accessor.disconnect();
    }

    /// Allow operations to connect again after `release`.
    pub fn resume(&self) {
        self.released.store(false, Ordering::SeqCst);
    }

    pub fn file_size(&self, path: &str) -> Result<u64, RemoteError> {
        self.ensure_connected()?;
        self.accessor.file_size(path)
    }

    pub fn read_chunk(&self, path: &str, offset: u64, length: usize) -> Result<Vec<u8>, RemoteError> {
        self.ensure_connected()?;
        self.accessor.read_chunk(path, offset, length)
    }

    pub fn read_last_bytes(&self, path: &str, max_bytes: usize) -> Result<LastBytes, RemoteError> {
        self.ensure_connected()?;
        self.accessor.read_last_bytes(path, max_bytes)
    }

    pub fn list_files(&self, dir: &str) -> Result<Vec<RemoteFileStat>, RemoteError> {
        self.ensure_connected()?;
        self.accessor.list_files(dir)
    }
}

// =============================================================================
// MemoryAccessor
// =============================================================================

/// In-process accessor serving files from memory.
///
/// Behaves like a remote endpoint (it must be connected before use, can be
/// made to refuse connections, and counts handshakes) so watchers and readers
/// can run against it unchanged.
#[derive(Debug, Default)]
pub struct MemoryAccessor {
    endpoint: String,
    files: Mutex<BTreeMap<String, Vec<u8>>>,
    connected: AtomicBool,
    refuse_connections: AtomicBool,
    connects: AtomicUsize,
}

impl MemoryAccessor {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    fn files(&self) -> MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        // A poisoned map is still a consistent map of byte vectors.
        self.files.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Create or overwrite a file.
    pub fn put_file(&self, path: &str, content: &[u8]) {
        self.files().insert(path.to_string(), content.to_vec());
    }

    /// Append to a file, creating it when missing.
    pub fn append(&self, path: &str, content: &[u8]) {
        self.files()
            .entry(path.to_string())
            .or_default()
            .extend_from_slice(content);
    }

    pub fn remove_file(&self, path: &str) {
        self.files().remove(path);
    }

    /// Make subsequent `connect` calls fail (or succeed again).
    pub fn set_refuse_connections(&self, refuse: bool) {
        self.refuse_connections.store(refuse, Ordering::SeqCst);
    }

    /// Simulate the server dropping the session.
    pub fn drop_connection(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Number of successful handshakes so far.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    fn require_connected(&self, operation: &'static str, path: &str) -> Result<(), RemoteError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RemoteError::Transport {
                endpoint: self.endpoint.clone(),
                operation,
                path: path.to_string(),
                source: "session not connected".into(),
            })
        }
    }

    fn missing(&self, operation: &'static str, path: &str) -> RemoteError {
        RemoteError::Transport {
            endpoint: self.endpoint.clone(),
            operation,
            path: path.to_string(),
            source: "no such file".into(),
        }
    }
}

impl RemoteFileAccessor for MemoryAccessor {
    fn endpoint_id(&self) -> &str {
        &self.endpoint
    }

    fn connect(&self) -> Result<(), RemoteError> {
        if self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }
        if self.refuse_connections.load(Ordering::SeqCst) {
            return Err(RemoteError::Connect {
                endpoint: self.endpoint.clone(),
                source: "connection refused".into(),
            });
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_alive(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn file_size(&self, path: &str) -> Result<u64, RemoteError> {
        self.require_connected("stat", path)?;
        self.files()
            .get(path)
            .map(|b| b.len() as u64)
            .ok_or_else(|| self.missing("stat", path))
    }

    fn read_chunk(&self, path: &str, offset: u64, length: usize) -> Result<Vec<u8>, RemoteError> {
        if let Err(e) = self.require_connected("read", path) {
            tracing::warn!(error = %e, "Remote chunk read failed");
            return Ok(Vec::new());
        }
        let files = self.files();
        let Some(content) = files.get(path) else {
            tracing::warn!(endpoint = %self.endpoint, path, "Remote chunk read: no such file");
            return Ok(Vec::new());
        };
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(content.len());
        let end = start.saturating_add(length).min(content.len());
        Ok(content[start..end].to_vec())
    }

    fn read_last_bytes(&self, path: &str, max_bytes: usize) -> Result<LastBytes, RemoteError> {
        if let Err(e) = self.require_connected("read", path) {
            tracing::warn!(error = %e, "Remote tail read failed");
            return Ok(LastBytes::default());
        }
        let files = self.files();
        let Some(content) = files.get(path) else {
            tracing::warn!(endpoint = %self.endpoint, path, "Remote tail read: no such file");
            return Ok(LastBytes::default());
        };
        let start = content.len().saturating_sub(max_bytes);
        Ok(LastBytes {
            offset: start as u64,
            bytes: content[start..].to_vec(),
        })
    }

    fn list_files(&self, dir: &str) -> Result<Vec<RemoteFileStat>, RemoteError> {
        self.require_connected("list", dir)?;
        let prefix = format!("{}/", dir.trim_end_matches('/'));
        Ok(self
            .files()
            .iter()
            .filter_map(|(path, content)| {
                let name = path.strip_prefix(&prefix)?;
                (!name.is_empty() && !name.contains('/')).then(|| RemoteFileStat {
                    name: name.to_string(),
                    size: content.len() as u64,
                    is_dir: false,
                })
            })
            .collect())
    }
}
