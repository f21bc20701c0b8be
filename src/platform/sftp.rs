// LogTrail - platform/sftp.rs
//
// SFTP implementation of `RemoteFileAccessor` on top of libssh2 (`ssh2`).
//
// Session model:
//   - One SSH session plus one primary SFTP channel per accessor, created by
//     `connect` and reused by `file_size` and `read_chunk` under a mutex.
//   - `read_last_bytes` and `list_files` open a short-lived secondary SFTP
//     channel on the same session so they never race the primary channel.
//     The secondary channel is a local value and is closed on drop, on the
//     success path and on every error path alike.
//   - Every connect carries a TCP timeout; every blocking libssh2 call runs
//     with the channel timeout configured on the session.
//
// Host keys: checked against ~/.ssh/known_hosts when present. A mismatch
// aborts the connect; an unknown host is accepted with a warning.

use crate::platform::remote::{LastBytes, RemoteFileAccessor, RemoteFileStat};
use crate::util::constants;
use crate::util::error::RemoteError;
use ssh2::{CheckResult, KnownHostFileKind, Session, Sftp};
use std::io::{Read, Seek, SeekFrom};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Timeouts and keep-alive used for every SFTP session.
#[derive(Debug, Clone, Copy)]
pub struct SftpSettings {
    pub connect_timeout: Duration,
    pub channel_timeout: Duration,
    pub keepalive_interval_secs: u32,
}

impl Default for SftpSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(constants::REMOTE_CONNECT_TIMEOUT_MS),
            channel_timeout: Duration::from_millis(constants::REMOTE_CHANNEL_TIMEOUT_MS),
            keepalive_interval_secs: constants::REMOTE_KEEPALIVE_INTERVAL_SECS,
        }
    }
}

struct Connected {
    session: Session,
    sftp: Sftp,
}

impl Connected {
    fn is_alive(&self) -> bool {
        self.session.authenticated() && self.session.keepalive_send().is_ok()
    }
}

/// SFTP accessor for one `host:port/username` endpoint.
pub struct SftpAccessor {
    endpoint: String,
    host: String,
    port: u16,
    username: String,
    secret: String,
    settings: SftpSettings,
    state: Mutex<Option<Connected>>,
}

impl std::fmt::Debug for SftpAccessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SftpAccessor")
            .field("endpoint", &self.endpoint)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl SftpAccessor {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        secret: impl Into<String>,
        settings: SftpSettings,
    ) -> Self {
        let host = host.into();
        let username = username.into();
        Self {
            endpoint: format!("{host}:{port}/{username}"),
            host,
            port,
            username,
            secret: secret.into(),
            settings,
            state: Mutex::new(None),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, Option<Connected>> {
        // A panic while holding the lock leaves at worst a dead session, which
        // the liveness check replaces on the next connect.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn transport_err(
        &self,
        operation: &'static str,
        path: &str,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> RemoteError {
        RemoteError::Transport {
            endpoint: self.endpoint.clone(),
            operation,
            path: path.to_string(),
            source: Box::new(source),
        }
    }

    fn connect_err(&self, source: impl std::error::Error + Send + Sync + 'static) -> RemoteError {
        RemoteError::Connect {
            endpoint: self.endpoint.clone(),
            source: Box::new(source),
        }
    }

    fn open_session(&self) -> Result<Connected, RemoteError> {
        let addr = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| self.connect_err(e))?
            .next()
            .ok_or_else(|| RemoteError::Connect {
                endpoint: self.endpoint.clone(),
                source: format!("'{}' did not resolve to any address", self.host).into(),
            })?;

        let tcp = TcpStream::connect_timeout(&addr, self.settings.connect_timeout)
            .map_err(|e| self.connect_err(e))?;

        let mut session = Session::new().map_err(|e| self.connect_err(e))?;
        session.set_tcp_stream(tcp);
        session.set_timeout(duration_ms(self.settings.connect_timeout));
        session.handshake().map_err(|e| self.connect_err(e))?;
        self.verify_host_key(&session)?;

        session
            .userauth_password(&self.username, &self.secret)
            .map_err(|e| RemoteError::Auth {
                endpoint: self.endpoint.clone(),
                username: self.username.clone(),
                source: Some(Box::new(e)),
            })?;
        if !session.authenticated() {
            return Err(RemoteError::Auth {
                endpoint: self.endpoint.clone(),
                username: self.username.clone(),
                source: None,
            });
        }

        session.set_keepalive(true, self.settings.keepalive_interval_secs);
        session.set_timeout(duration_ms(self.settings.channel_timeout));
        let sftp = session.sftp().map_err(|e| self.connect_err(e))?;

        Ok(Connected { session, sftp })
    }

    fn verify_host_key(&self, session: &Session) -> Result<(), RemoteError> {
        let Some((key, _)) = session.host_key() else {
            return Err(RemoteError::Connect {
                endpoint: self.endpoint.clone(),
                source: "server presented no host key".into(),
            });
        };

        let mut known = session.known_hosts().map_err(|e| self.connect_err(e))?;
        if let Some(dirs) = directories::BaseDirs::new() {
            let file = dirs.home_dir().join(".ssh").join("known_hosts");
            if file.is_file() {
                if let Err(e) = known.read_file(&file, KnownHostFileKind::OpenSSH) {
                    tracing::warn!(file = %file.display(), error = %e, "Cannot read known_hosts");
                }
            }
        }

        match known.check_port(&self.host, self.port, key) {
            CheckResult::Match => Ok(()),
            CheckResult::Mismatch => Err(RemoteError::Connect {
                endpoint: self.endpoint.clone(),
                source: "host key does not match known_hosts entry".into(),
            }),
            CheckResult::NotFound | CheckResult::Failure => {
                tracing::warn!(
                    endpoint = %self.endpoint,
                    "Host key not found in known_hosts; accepting"
                );
                Ok(())
            }
        }
    }

    /// Open a short-lived SFTP channel on the live session.
    fn secondary_channel(&self, path: &str) -> Result<Sftp, RemoteError> {
        let session = {
            let guard = self.lock_state();
            match guard.as_ref() {
                Some(c) => c.session.clone(),
                None => {
                    return Err(RemoteError::Transport {
                        endpoint: self.endpoint.clone(),
                        operation: "open channel",
                        path: path.to_string(),
                        source: "session not connected".into(),
                    })
                }
            }
        };
        session
            .sftp()
            .map_err(|e| self.transport_err("open channel", path, e))
    }
}

fn duration_ms(d: Duration) -> u32 {
    u32::try_from(d.as_millis()).unwrap_or(u32::MAX)
}

/// Read from `offset` until `length` bytes or EOF.
fn read_range(sftp: &Sftp, path: &str, offset: u64, length: u64) -> std::io::Result<Vec<u8>> {
    let mut file = sftp.open(Path::new(path)).map_err(std::io::Error::from)?;
    file.seek(SeekFrom::Start(offset))?;
    let capacity = usize::try_from(length)
        .unwrap_or(usize::MAX)
        .min(constants::MAX_REMOTE_CHUNK_BYTES);
    let mut buf = Vec::with_capacity(capacity);
    let mut chunk = vec![0u8; constants::REMOTE_COPY_BUFFER_SIZE];
    let mut remaining = length;
    while remaining > 0 {
        let want = usize::try_from(remaining)
            .unwrap_or(usize::MAX)
            .min(chunk.len());
        let n = file.read(&mut chunk[..want])?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        remaining -= n as u64;
    }
    Ok(buf)
}

impl RemoteFileAccessor for SftpAccessor {
    fn endpoint_id(&self) -> &str {
        &self.endpoint
    }

    fn connect(&self) -> Result<(), RemoteError> {
        let mut guard = self.lock_state();
        if guard.as_ref().is_some_and(Connected::is_alive) {
            return Ok(());
        }
        if guard.take().is_some() {
            tracing::info!(endpoint = %self.endpoint, "Replacing dead SFTP session");
        }

        tracing::info!(endpoint = %self.endpoint, "Opening SFTP session");
        let connected = self.open_session()?;
        *guard = Some(connected);
        tracing::info!(endpoint = %self.endpoint, "SFTP session established");
        Ok(())
    }

    fn disconnect(&self) {
        let Some(Connected { session, sftp }) = self.lock_state().take() else {
            return;
        };
        drop(sftp);
        if let Err(e) = session.disconnect(None, "closing", None) {
            tracing::debug!(endpoint = %self.endpoint, error = %e, "SFTP disconnect not clean");
        }
        tracing::info!(endpoint = %self.endpoint, "SFTP session closed");
    }

    fn is_alive(&self) -> bool {
        self.lock_state().as_ref().is_some_and(Connected::is_alive)
    }

    fn file_size(&self, path: &str) -> Result<u64, RemoteError> {
        let guard = self.lock_state();
        let Some(c) = guard.as_ref() else {
            return Err(RemoteError::Transport {
                endpoint: self.endpoint.clone(),
                operation: "stat",
                path: path.to_string(),
                source: "session not connected".into(),
            });
        };
        c.sftp
            .lstat(Path::new(path))
            .map(|stat| stat.size.unwrap_or(0))
            .map_err(|e| self.transport_err("stat", path, e))
    }

    fn read_chunk(&self, path: &str, offset: u64, length: usize) -> Result<Vec<u8>, RemoteError> {
        let guard = self.lock_state();
        let Some(c) = guard.as_ref() else {
            tracing::warn!(endpoint = %self.endpoint, path, "Chunk read on a closed session");
            return Ok(Vec::new());
        };
        match read_range(&c.sftp, path, offset, length as u64) {
            Ok(bytes) => Ok(bytes),
            Err(e) => {
                tracing::warn!(
                    endpoint = %self.endpoint,
                    path,
                    offset,
                    length,
                    error = %e,
                    "Remote chunk read failed"
                );
                Ok(Vec::new())
            }
        }
    }

    fn read_last_bytes(&self, path: &str, max_bytes: usize) -> Result<LastBytes, RemoteError> {
        let result = self.secondary_channel(path).and_then(|sftp| {
            let size = sftp
                .lstat(Path::new(path))
                .map(|s| s.size.unwrap_or(0))
                .map_err(|e| self.transport_err("stat", path, e))?;
            if size == 0 {
                return Ok(LastBytes::default());
            }
            let offset = size.saturating_sub(max_bytes as u64);
            let bytes = read_range(&sftp, path, offset, size - offset)
                .map_err(|e| self.transport_err("read", path, e))?;
            Ok(LastBytes { offset, bytes })
        });

        match result {
            Ok(last) => Ok(last),
            Err(e) => {
                tracing::warn!(error = %e, "Remote tail read failed");
                Ok(LastBytes::default())
            }
        }
    }

    fn list_files(&self, dir: &str) -> Result<Vec<RemoteFileStat>, RemoteError> {
        let sftp = self.secondary_channel(dir)?;
        let entries = sftp
            .readdir(Path::new(dir))
            .map_err(|e| self.transport_err("list", dir, e))?;
        Ok(entries
            .into_iter()
            .filter_map(|(path, stat)| {
                let name = path.file_name()?.to_string_lossy().into_owned();
                Some(RemoteFileStat {
                    name,
                    size: stat.size.unwrap_or(0),
                    is_dir: stat.is_dir(),
                })
            })
            .collect())
    }
}

impl Drop for SftpAccessor {
    fn drop(&mut self) {
        self.disconnect();
    }
}
