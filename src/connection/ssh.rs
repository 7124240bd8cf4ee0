//! SSH transport built on russh.
//!
//! One [`SshSession`] wraps one authenticated russh client handle. The
//! handle sits behind an `RwLock`: channel operations take a read lock
//! just long enough to open a channel, only `close()` takes the write
//! lock. Commands run on fresh exec channels; transfers open an SFTP
//! subsystem channel per operation.
//!
//! Host key policy: with no pinned fingerprint any key is accepted (the
//! hosts are user-supplied machines registered over a trusted path); a
//! pinned SHA-256 fingerprint turns mismatches into hard failures.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use russh::client::{self, Handle, Handler};
use russh::{ChannelMsg, Disconnect};
use russh_keys::key::PublicKey;
use russh_sftp::client::SftpSession;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::RwLock;
use tracing::{debug, trace, warn};

use crate::model::{AuthMethod, HostCredentials};

use super::{CommandOutput, Connection, ConnectionError, ConnectionResult, Connector};

/// Strips the optional `SHA256:` prefix so pinned and computed
/// fingerprints compare in one form.
fn normalize_fingerprint(fp: &str) -> &str {
    fp.strip_prefix("SHA256:").unwrap_or(fp)
}

/// Client handler performing host key verification.
struct ClientHandler {
    endpoint: String,
    pinned_fingerprint: Option<String>,
    /// Fingerprint presented during the handshake, readable after a
    /// failed connect to tell a mismatch apart from a network error.
    observed_fingerprint: Arc<Mutex<Option<String>>>,
}

#[async_trait]
impl Handler for ClientHandler {
    type Error = ConnectionError;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        let fingerprint = server_public_key.fingerprint();
        *self.observed_fingerprint.lock() = Some(fingerprint.clone());

        match &self.pinned_fingerprint {
            Some(pinned) => {
                if normalize_fingerprint(pinned) == normalize_fingerprint(&fingerprint) {
                    debug!(endpoint = %self.endpoint, "Host key matches pinned fingerprint");
                    Ok(true)
                } else {
                    warn!(
                        endpoint = %self.endpoint,
                        expected = %pinned,
                        actual = %fingerprint,
                        "Host key does not match pinned fingerprint, refusing session"
                    );
                    Ok(false)
                }
            }
            None => {
                trace!(endpoint = %self.endpoint, fingerprint = %fingerprint, "Accepting host key");
                Ok(true)
            }
        }
    }
}

/// SSH session implementation using russh.
pub struct SshSession {
    /// Session identifier, `user@host:port`
    identifier: String,
    /// Russh client handle. Read lock for channel opens, write lock for
    /// close only.
    handle: RwLock<Option<Handle<ClientHandler>>>,
}

impl SshSession {
    /// Connects and authenticates a new session.
    pub async fn connect(
        credentials: &HostCredentials,
        connect_timeout: Duration,
    ) -> ConnectionResult<Self> {
        let endpoint = credentials.endpoint();
        debug!(endpoint = %endpoint, "Establishing SSH session");

        let mut config = client::Config::default();
        // The pool owns idle lifetime; russh must not cut sessions first.
        config.inactivity_timeout = None;
        let config = Arc::new(config);

        let addr = format!("{}:{}", credentials.addr, credentials.port);
        let socket = tokio::time::timeout(connect_timeout, tokio::net::TcpStream::connect(&addr))
            .await
            .map_err(|_| {
                ConnectionError::ConnectionFailed(format!(
                    "connect to {} timed out after {} seconds",
                    addr,
                    connect_timeout.as_secs()
                ))
            })?
            .map_err(|e| {
                ConnectionError::ConnectionFailed(format!("failed to connect to {addr}: {e}"))
            })?;
        socket.set_nodelay(true).map_err(|e| {
            ConnectionError::ConnectionFailed(format!("failed to set TCP_NODELAY: {e}"))
        })?;

        let observed = Arc::new(Mutex::new(None));
        let handler = ClientHandler {
            endpoint: endpoint.clone(),
            pinned_fingerprint: credentials.host_key_fingerprint.clone(),
            observed_fingerprint: Arc::clone(&observed),
        };

        let mut session = client::connect_stream(config, socket, handler)
            .await
            .map_err(|e| {
                // A refused host key surfaces as a generic handshake
                // failure; recover the specific story when we have one.
                if let (Some(pinned), Some(seen)) = (
                    credentials.host_key_fingerprint.as_deref(),
                    observed.lock().as_deref(),
                ) {
                    if normalize_fingerprint(pinned) != normalize_fingerprint(seen) {
                        return ConnectionError::HostKeyMismatch {
                            expected: pinned.to_string(),
                            actual: seen.to_string(),
                        };
                    }
                }
                ConnectionError::ConnectionFailed(format!("SSH handshake failed: {e}"))
            })?;

        Self::authenticate(&mut session, credentials).await?;

        debug!(endpoint = %endpoint, "SSH session established");
        Ok(Self {
            identifier: endpoint,
            handle: RwLock::new(Some(session)),
        })
    }

    /// Performs SSH authentication from the credential material.
    async fn authenticate(
        session: &mut Handle<ClientHandler>,
        credentials: &HostCredentials,
    ) -> ConnectionResult<()> {
        let user = credentials.username.as_str();
        match &credentials.auth {
            AuthMethod::Key {
                private_key,
                passphrase,
            } => {
                let key_pair = russh_keys::decode_secret_key(private_key, passphrase.as_deref())
                    .map_err(|e| {
                        ConnectionError::AuthenticationFailed(format!(
                            "failed to decode private key: {e}"
                        ))
                    })?;

                let authenticated = session
                    .authenticate_publickey(user, Arc::new(key_pair))
                    .await
                    .map_err(|e| {
                        ConnectionError::AuthenticationFailed(format!(
                            "key authentication failed: {e}"
                        ))
                    })?;
                if authenticated {
                    debug!(user = %user, "Authenticated using private key");
                    Ok(())
                } else {
                    Err(ConnectionError::AuthenticationFailed(
                        "private key rejected by server".to_string(),
                    ))
                }
            }
            AuthMethod::Password { password } => {
                let authenticated =
                    session
                        .authenticate_password(user, password)
                        .await
                        .map_err(|e| {
                            ConnectionError::AuthenticationFailed(format!(
                                "password authentication failed: {e}"
                            ))
                        })?;
                if authenticated {
                    debug!(user = %user, "Authenticated using password");
                    Ok(())
                } else {
                    Err(ConnectionError::AuthenticationFailed(
                        "password rejected by server".to_string(),
                    ))
                }
            }
        }
    }

    /// Open an SFTP session on a fresh channel.
    async fn open_sftp(handle: &Handle<ClientHandler>) -> ConnectionResult<SftpSession> {
        let channel = handle.channel_open_session().await.map_err(|e| {
            ConnectionError::TransferFailed(format!("failed to open channel: {e}"))
        })?;

        channel.request_subsystem(true, "sftp").await.map_err(|e| {
            ConnectionError::TransferFailed(format!("failed to request SFTP subsystem: {e}"))
        })?;

        SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| ConnectionError::TransferFailed(format!("failed to start SFTP: {e}")))
    }

    /// Apply a permission mode to a remote path over SFTP.
    async fn set_mode(sftp: &SftpSession, remote_path: &str, mode: u32) -> ConnectionResult<()> {
        let mut attrs = russh_sftp::protocol::FileAttributes::default();
        attrs.permissions = Some(mode);
        sftp.set_metadata(remote_path, attrs).await.map_err(|e| {
            ConnectionError::TransferFailed(format!("failed to set mode on {remote_path}: {e}"))
        })
    }
}

#[async_trait]
impl Connection for SshSession {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    async fn is_alive(&self) -> bool {
        match self.handle.read().await.as_ref() {
            Some(handle) => !handle.is_closed(),
            None => false,
        }
    }

    async fn execute(&self, command: &str, timeout: Duration) -> ConnectionResult<CommandOutput> {
        trace!(endpoint = %self.identifier, command = %command, "Executing remote command");

        let execute_future = async {
            // Hold the read lock only long enough to open a channel.
            let handle_guard = self.handle.read().await;
            let handle = handle_guard
                .as_ref()
                .ok_or(ConnectionError::ConnectionClosed)?;
            let mut channel = handle.channel_open_session().await.map_err(|e| {
                ConnectionError::ExecutionFailed(format!("failed to open channel: {e}"))
            })?;
            drop(handle_guard);

            channel.exec(true, command).await.map_err(|e| {
                ConnectionError::ExecutionFailed(format!("failed to execute command: {e}"))
            })?;

            let mut stdout = Vec::new();
            let mut stderr = Vec::new();
            let mut exit_code = None;

            while let Some(msg) = channel.wait().await {
                match msg {
                    ChannelMsg::Data { ref data } => {
                        stdout.extend_from_slice(data);
                    }
                    ChannelMsg::ExtendedData { ref data, ext } => {
                        // Extended data type 1 is stderr
                        if ext == 1 {
                            stderr.extend_from_slice(data);
                        }
                    }
                    ChannelMsg::ExitStatus { exit_status } => {
                        exit_code = Some(exit_status);
                    }
                    ChannelMsg::Eof => {
                        // Keep reading until the channel closes
                    }
                    ChannelMsg::Close => {
                        break;
                    }
                    _ => {}
                }
            }

            let _ = channel.eof().await;

            // Exit status arrives as u32; a missing one means the channel
            // died before the command reported back.
            let exit_code: i32 = exit_code.map(|e| e as i32).unwrap_or(i32::MAX);
            let stdout = String::from_utf8_lossy(&stdout).to_string();
            let stderr = String::from_utf8_lossy(&stderr).to_string();

            trace!(exit_code = %exit_code, "Command completed");

            if exit_code == 0 {
                Ok(CommandOutput::success(stdout, stderr))
            } else {
                Ok(CommandOutput::failure(exit_code, stdout, stderr))
            }
        };

        match tokio::time::timeout(timeout, execute_future).await {
            Ok(result) => result,
            Err(_) => {
                debug!(
                    endpoint = %self.identifier,
                    timeout_secs = timeout.as_secs(),
                    "Remote command timed out, abandoning channel"
                );
                Err(ConnectionError::Timeout(timeout.as_secs()))
            }
        }
    }

    async fn upload(
        &self,
        local_path: &Path,
        remote_path: &str,
        mode: Option<u32>,
    ) -> ConnectionResult<()> {
        debug!(
            endpoint = %self.identifier,
            local = %local_path.display(),
            remote = %remote_path,
            "Uploading file via SFTP"
        );

        let handle_guard = self.handle.read().await;
        let handle = handle_guard
            .as_ref()
            .ok_or(ConnectionError::ConnectionClosed)?;
        let sftp = Self::open_sftp(handle).await?;
        drop(handle_guard);

        let mut local = tokio::fs::File::open(local_path).await.map_err(|e| {
            ConnectionError::TransferFailed(format!(
                "failed to open local file {}: {e}",
                local_path.display()
            ))
        })?;
        let mut remote = sftp.create(remote_path).await.map_err(|e| {
            ConnectionError::TransferFailed(format!(
                "failed to create remote file {remote_path}: {e}"
            ))
        })?;

        tokio::io::copy(&mut local, &mut remote)
            .await
            .map_err(|e| ConnectionError::TransferFailed(format!("failed to stream file: {e}")))?;
        remote
            .shutdown()
            .await
            .map_err(|e| ConnectionError::TransferFailed(format!("failed to flush file: {e}")))?;
        drop(remote);

        if let Some(mode) = mode {
            Self::set_mode(&sftp, remote_path, mode).await?;
        }

        let _ = sftp.close().await;
        Ok(())
    }

    async fn upload_content(
        &self,
        content: &[u8],
        remote_path: &str,
        mode: Option<u32>,
    ) -> ConnectionResult<()> {
        trace!(
            endpoint = %self.identifier,
            remote = %remote_path,
            bytes = content.len(),
            "Uploading content via SFTP"
        );

        let handle_guard = self.handle.read().await;
        let handle = handle_guard
            .as_ref()
            .ok_or(ConnectionError::ConnectionClosed)?;
        let sftp = Self::open_sftp(handle).await?;
        drop(handle_guard);

        let mut remote = sftp.create(remote_path).await.map_err(|e| {
            ConnectionError::TransferFailed(format!(
                "failed to create remote file {remote_path}: {e}"
            ))
        })?;
        remote
            .write_all(content)
            .await
            .map_err(|e| ConnectionError::TransferFailed(format!("failed to write content: {e}")))?;
        remote
            .shutdown()
            .await
            .map_err(|e| ConnectionError::TransferFailed(format!("failed to flush file: {e}")))?;
        drop(remote);

        if let Some(mode) = mode {
            Self::set_mode(&sftp, remote_path, mode).await?;
        }

        let _ = sftp.close().await;
        Ok(())
    }

    async fn download(&self, remote_path: &str, local_path: &Path) -> ConnectionResult<()> {
        debug!(
            endpoint = %self.identifier,
            remote = %remote_path,
            local = %local_path.display(),
            "Downloading file via SFTP"
        );

        let handle_guard = self.handle.read().await;
        let handle = handle_guard
            .as_ref()
            .ok_or(ConnectionError::ConnectionClosed)?;
        let sftp = Self::open_sftp(handle).await?;
        drop(handle_guard);

        let mut remote = sftp.open(remote_path).await.map_err(|e| {
            ConnectionError::TransferFailed(format!(
                "failed to open remote file {remote_path}: {e}"
            ))
        })?;
        let mut local = tokio::fs::File::create(local_path).await.map_err(|e| {
            ConnectionError::TransferFailed(format!(
                "failed to create local file {}: {e}",
                local_path.display()
            ))
        })?;

        tokio::io::copy(&mut remote, &mut local)
            .await
            .map_err(|e| ConnectionError::TransferFailed(format!("failed to stream file: {e}")))?;
        local
            .flush()
            .await
            .map_err(|e| ConnectionError::TransferFailed(format!("failed to flush file: {e}")))?;

        let _ = sftp.close().await;
        Ok(())
    }

    async fn download_content(&self, remote_path: &str) -> ConnectionResult<Vec<u8>> {
        trace!(endpoint = %self.identifier, remote = %remote_path, "Downloading content via SFTP");

        let handle_guard = self.handle.read().await;
        let handle = handle_guard
            .as_ref()
            .ok_or(ConnectionError::ConnectionClosed)?;
        let sftp = Self::open_sftp(handle).await?;
        drop(handle_guard);

        let mut remote = sftp.open(remote_path).await.map_err(|e| {
            ConnectionError::TransferFailed(format!(
                "failed to open remote file {remote_path}: {e}"
            ))
        })?;
        let mut content = Vec::new();
        remote
            .read_to_end(&mut content)
            .await
            .map_err(|e| ConnectionError::TransferFailed(format!("failed to read content: {e}")))?;

        let _ = sftp.close().await;
        Ok(content)
    }

    async fn close(&self) -> ConnectionResult<()> {
        let mut guard = self.handle.write().await;
        if let Some(handle) = guard.take() {
            debug!(endpoint = %self.identifier, "Closing SSH session");
            let _ = handle
                .disconnect(Disconnect::ByApplication, "closing session", "en")
                .await;
        }
        Ok(())
    }
}

/// Opens [`SshSession`]s from credentials. The production [`Connector`].
pub struct SshConnector {
    connect_timeout: Duration,
}

impl SshConnector {
    /// Creates a connector with the given establishment deadline.
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl Connector for SshConnector {
    async fn connect(
        &self,
        credentials: &HostCredentials,
    ) -> ConnectionResult<Arc<dyn Connection>> {
        let session = SshSession::connect(credentials, self.connect_timeout).await?;
        Ok(Arc::new(session))
    }
}

// ============================================================================
// Tests
// ============================================================================
