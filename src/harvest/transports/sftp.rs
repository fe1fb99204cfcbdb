//! SFTP backend: an SSH connection (`russh`) carrying an SFTP subsystem
//! channel (`russh-sftp`).
//!
//! SSH couples transport security and identity, so password authentication
//! happens inside [`Transport::connect`]. [`Session::authenticate`] only opens
//! the `sftp` subsystem on the already-authenticated connection.

use async_trait::async_trait;
use globset::GlobBuilder;
use russh::client;
use russh::keys::{HashAlg, PublicKey};
use russh::Disconnect;
use russh_sftp::client::SftpSession;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::harvest::traits::{
    normalize_remote_dir, remote_join, RemoteReader, Session, Transport, TransportError,
};
use crate::model::{Credentials, Endpoint, TransportKind};

pub struct SftpTransport {
    connect_timeout: Duration,
    /// Expected `SHA256:...` fingerprint of the server host key, if pinned.
    host_key_fingerprint: Option<String>,
}

impl SftpTransport {
    pub fn new(connect_timeout: Duration, host_key_fingerprint: Option<String>) -> Self {
        if host_key_fingerprint.is_none() {
            warn!("No SFTP host key fingerprint configured, any server key will be accepted");
        }
        Self {
            connect_timeout,
            host_key_fingerprint,
        }
    }
}

/// Client-side SSH handler; only decides whether to trust the server key.
struct HostKeyCheck {
    expected: Option<String>,
}

impl client::Handler for HostKeyCheck {
    type Error = russh::Error;

    async fn check_server_key(&mut self, server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        let Some(expected) = &self.expected else {
            return Ok(true);
        };
        let actual = server_public_key.fingerprint(HashAlg::Sha256).to_string();
        if &actual == expected {
            Ok(true)
        } else {
            warn!(expected = %expected, actual = %actual, "SFTP host key fingerprint mismatch");
            Ok(false)
        }
    }
}

#[async_trait]
impl Transport for SftpTransport {
    type Session = SftpSessionHandle;

    fn kind(&self) -> TransportKind {
        TransportKind::Sftp
    }

    async fn connect(
        &self,
        endpoint: &Endpoint,
        credentials: &Credentials,
    ) -> Result<SftpSessionHandle, TransportError> {
        let target = endpoint.to_string();
        let config = Arc::new(client::Config::default());
        let handler = HostKeyCheck {
            expected: self.host_key_fingerprint.clone(),
        };

        // Dial, key exchange and the password check share one bound.
        let dial_and_login = async {
            debug!(target = %target, "Dialing SSH server");
            let mut handle =
                client::connect(config, (endpoint.host.as_str(), endpoint.port), handler)
                    .await
                    .map_err(|e| TransportError::Connect {
                        target: target.clone(),
                        message: e.to_string(),
                    })?;

            let auth = handle
                .authenticate_password(credentials.username.as_str(), credentials.password.as_str())
                .await
                .map_err(|e| TransportError::Auth(e.to_string()))?;
            if !auth.success() {
                if let Err(e) = handle
                    .disconnect(Disconnect::ByApplication, "authentication failed", "en")
                    .await
                {
                    debug!(error = %e, "SSH disconnect after rejected password failed");
                }
                return Err(TransportError::Auth(format!(
                    "password rejected for user '{}'",
                    credentials.username
                )));
            }
            Ok::<_, TransportError>(handle)
        };
        let handle = timeout(self.connect_timeout, dial_and_login)
            .await
            .map_err(|_| TransportError::timeout("connect", self.connect_timeout))??;

        info!(target = %target, "Connected to SSH server");
        Ok(SftpSessionHandle {
            ssh: Some(handle),
            sftp: None,
        })
    }
}

pub struct SftpSessionHandle {
    ssh: Option<client::Handle<HostKeyCheck>>,
    sftp: Option<SftpSession>,
}

impl SftpSessionHandle {
    fn sftp(&self) -> Result<&SftpSession, TransportError> {
        self.sftp.as_ref().ok_or(TransportError::NotConnected)
    }
}

#[async_trait]
impl Session for SftpSessionHandle {
    async fn authenticate(&mut self, _credentials: &Credentials) -> Result<(), TransportError> {
        let ssh = self.ssh.as_ref().ok_or(TransportError::NotConnected)?;
        let auth_err = |e: russh::Error| TransportError::Auth(e.to_string());

        let channel = ssh.channel_open_session().await.map_err(auth_err)?;
        channel.request_subsystem(true, "sftp").await.map_err(auth_err)?;
        let sftp = SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| TransportError::Auth(format!("SFTP subsystem failed: {}", e)))?;

        self.sftp = Some(sftp);
        Ok(())
    }

    async fn list(&mut self, directory: &str, pattern: &str) -> Result<Vec<String>, TransportError> {
        let list_err = |message: String| TransportError::List {
            pattern: pattern.to_string(),
            message,
        };

        let (prefix, _) = split_pattern(pattern);
        let list_dir = match prefix {
            Some(prefix) => remote_join(directory, prefix),
            None => match normalize_remote_dir(directory) {
                "" => ".".to_string(),
                dir => dir.to_string(),
            },
        };
        let entries = self
            .sftp()?
            .read_dir(list_dir.as_str())
            .await
            .map_err(|e| list_err(e.to_string()))?;

        match_entries(pattern, entries.map(|entry| entry.file_name()))
            .map_err(|e| list_err(e.to_string()))
    }

    async fn open(&mut self, directory: &str, name: &str) -> Result<RemoteReader, TransportError> {
        let path = remote_join(directory, name);
        let file = self
            .sftp()?
            .open(path.as_str())
            .await
            .map_err(|e| TransportError::Open {
                path: path.clone(),
                message: e.to_string(),
            })?;
        Ok(Box::pin(file))
    }

    async fn close(&mut self) {
        if let Some(sftp) = self.sftp.take() {
            if let Err(e) = sftp.close().await {
                debug!(error = %e, "SFTP subsystem close failed");
            }
        }
        if let Some(ssh) = self.ssh.take() {
            match ssh.disconnect(Disconnect::ByApplication, "", "en").await {
                Ok(()) => debug!("SSH session closed"),
                Err(e) => debug!(error = %e, "SSH disconnect failed"),
            }
        }
    }
}

/// Splits `sub/*.log` into the directory to list and the basename pattern.
fn split_pattern(pattern: &str) -> (Option<&str>, &str) {
    match pattern.rsplit_once('/') {
        Some((prefix, file_pattern)) => (Some(prefix), file_pattern),
        None => (None, pattern),
    }
}

/// Filters directory entry names against `pattern`, returning sorted matches
/// relative to the remote directory (a `sub/` prefix in the pattern is kept).
/// `.` and `..` never match.
fn match_entries<I>(pattern: &str, names: I) -> Result<Vec<String>, globset::Error>
where
    I: IntoIterator<Item = String>,
{
    let (prefix, file_pattern) = split_pattern(pattern);
    let matcher = GlobBuilder::new(file_pattern)
        .literal_separator(true)
        .build()?
        .compile_matcher();

    let mut matched: Vec<String> = names
        .into_iter()
        .filter(|name| name != "." && name != ".." && matcher.is_match(name))
        .map(|name| match prefix {
            Some(prefix) => format!("{}/{}", prefix, name),
            None => name,
        })
        .collect();
    matched.sort();
    Ok(matched)
}
