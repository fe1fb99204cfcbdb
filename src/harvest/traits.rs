//! Core transport abstractions for the harvest engine.
//!
//! Every wire protocol is driven through the same capability set:
//! - [`Transport::connect`] dials the server and yields a [`Session`]
//! - [`Session::authenticate`], [`Session::list`], [`Session::open`] operate
//!   on that live session
//! - [`Session::close`] releases it
//!
//! The harvest cycle is generic over [`Transport`], so the backend is chosen
//! once at startup and statically dispatched from then on.

use async_trait::async_trait;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncRead;

use crate::model::{Credentials, Endpoint, TransportKind};

/// Sequential byte stream over one remote file.
pub type RemoteReader = Pin<Box<dyn AsyncRead + Send>>;

// ============================================================================
// Transport Traits
// ============================================================================

/// Factory for protocol sessions.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; the transport lives for the whole
/// process and is shared by every cycle.
#[async_trait]
pub trait Transport: Send + Sync {
    type Session: Session;

    /// Protocol label attached to every event harvested through this transport.
    fn kind(&self) -> TransportKind;

    /// Opens the network connection, bounded by the connect timeout.
    ///
    /// Credentials are passed here as well as to [`Session::authenticate`]:
    /// protocols such as SSH authenticate while establishing the connection,
    /// and decide internally which of the two steps performs the real check.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] on timeout, refusal, DNS failure or (for
    /// protocols that authenticate at connect) credential rejection.
    async fn connect(
        &self,
        endpoint: &Endpoint,
        credentials: &Credentials,
    ) -> Result<Self::Session, TransportError>;
}

/// A live connection to a remote file server, scoped to a single cycle.
#[async_trait]
pub trait Session: Send {
    /// Completes login. Always called exactly once, right after `connect`.
    async fn authenticate(&mut self, credentials: &Credentials) -> Result<(), TransportError>;

    /// Returns the names in `directory` matching the wildcard `pattern`.
    ///
    /// Names are relative to `directory`, in the order the backend yields them.
    async fn list(&mut self, directory: &str, pattern: &str) -> Result<Vec<String>, TransportError>;

    /// Opens `directory/name` for sequential reading.
    async fn open(&mut self, directory: &str, name: &str) -> Result<RemoteReader, TransportError>;

    /// Releases the session.
    ///
    /// Must be idempotent, must tolerate a session that never authenticated,
    /// and never fails: teardown errors are logged and swallowed.
    async fn close(&mut self);
}

// ============================================================================
// Error Types
// ============================================================================

/// Errors raised by transport backends.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Dial failed: refused, unreachable, DNS failure
    #[error("Failed to connect to {target}: {message}")]
    Connect { target: String, message: String },

    /// A bounded operation did not complete in time
    #[error("Operation '{operation}' timed out after {timeout_secs}s")]
    Timeout {
        operation: &'static str,
        timeout_secs: u64,
    },

    /// Credentials rejected or login sequence failed
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Server-side wildcard expansion failed
    #[error("Failed to list '{pattern}': {message}")]
    List { pattern: String, message: String },

    /// Remote file could not be opened
    #[error("Failed to open '{path}': {message}")]
    Open { path: String, message: String },

    /// Session was closed or lost by an earlier failure
    #[error("Session is not connected")]
    NotConnected,

    /// Background task running a blocking protocol call failed
    #[error("Transport task failed: {0}")]
    Task(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    pub fn timeout(operation: &'static str, after: Duration) -> Self {
        TransportError::Timeout {
            operation,
            timeout_secs: after.as_secs(),
        }
    }
}

// ============================================================================
// Remote Paths
// ============================================================================

/// Normalizes a configured remote directory.
///
/// `~` and `~/...` refer to the login home directory, which every protocol
/// treats as the starting point for relative paths; the prefix is stripped.
/// The result is empty for the home directory itself.
pub fn normalize_remote_dir(directory: &str) -> &str {
    let trimmed = match directory.strip_prefix('~') {
        Some(rest) => rest.trim_start_matches('/'),
        None => directory,
    };
    if trimmed == "." || trimmed == "./" {
        ""
    } else {
        trimmed
    }
}

/// Joins a remote directory and a name with `/`, regardless of local platform.
pub fn remote_join(directory: &str, name: &str) -> String {
    let directory = normalize_remote_dir(directory);
    if directory.is_empty() || name.starts_with('/') {
        name.to_string()
    } else if directory.ends_with('/') {
        format!("{}{}", directory, name)
    } else {
        format!("{}/{}", directory, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_remote_dir() {
        assert_eq!(normalize_remote_dir("~/"), "");
        assert_eq!(normalize_remote_dir("~"), "");
        assert_eq!(normalize_remote_dir("~/logs"), "logs");
        assert_eq!(normalize_remote_dir("./"), "");
        assert_eq!(normalize_remote_dir("/var/log"), "/var/log");
    }

    #[test]
    fn test_remote_join() {
        assert_eq!(remote_join("~/", "a.txt"), "a.txt");
        assert_eq!(remote_join("/var/log", "a.txt"), "/var/log/a.txt");
        assert_eq!(remote_join("/var/log/", "a.txt"), "/var/log/a.txt");
        assert_eq!(remote_join("logs", "sub/a.txt"), "logs/sub/a.txt");
        assert_eq!(remote_join("logs", "/abs/a.txt"), "/abs/a.txt");
    }

    #[test]
    fn test_timeout_error_message() {
        let err = TransportError::timeout("list", Duration::from_secs(30));
        assert_eq!(err.to_string(), "Operation 'list' timed out after 30s");
    }
}
