//! Harvest cycle orchestrator.
//!
//! This module provides the [`HarvestCycle`] coordinator that drives one
//! complete poll against a remote file server:
//! 1. **Connect** through the configured [`Transport`]
//! 2. **Authenticate** the session
//! 3. **Resolve** wildcard patterns into concrete names
//! 4. **Iterate** the files, emitting one [`Event`] per line (`read` mode) or
//!    copying locally first and emitting from the copy (`get` mode)
//! 5. **Close** the session, unconditionally
//!
//! Connect and authenticate failures abort the cycle with a [`CycleError`].
//! Everything after that is isolated per file: a missing or unreadable file
//! is logged as a [`FileError`] and the cycle moves on.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::time::timeout;
use tracing::{debug, error, info, instrument};

use crate::config::HarvestSettings;
use crate::harvest::resolve::resolve_files;
use crate::harvest::traits::{RemoteReader, Session, Transport, TransportError};
use crate::model::{Event, ExecuteMode};
use crate::traits::{EventSink, SinkError};

const COPY_BUFFER_SIZE: usize = 32 * 1024;

// ============================================================================
// Cycle Types
// ============================================================================

/// Per-cycle state, built fresh from the immutable settings at the start of
/// every cycle and dropped at its end.
#[derive(Debug)]
struct CycleContext {
    started: Instant,
    files: Vec<String>,
    report: CycleReport,
}

impl CycleContext {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            files: Vec::new(),
            report: CycleReport::default(),
        }
    }
}

/// Statistics about a completed cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// Concrete file names after wildcard expansion
    pub files_resolved: usize,

    /// Files read to the end
    pub files_harvested: usize,

    /// Files skipped because of a per-file error
    pub files_failed: usize,

    /// Events handed to the sink
    pub events_emitted: u64,

    /// Wall time of the whole cycle (milliseconds)
    pub duration_ms: u64,
}

// ============================================================================
// Errors
// ============================================================================

/// Failures that abort a whole cycle.
#[derive(thiserror::Error, Debug)]
pub enum CycleError {
    #[error("Connection to {target} failed: {source}")]
    Connect {
        target: String,
        #[source]
        source: TransportError,
    },

    #[error("Authentication as '{username}' failed: {source}")]
    Authenticate {
        username: String,
        #[source]
        source: TransportError,
    },
}

/// Failures confined to a single file. Logged, never propagated.
#[derive(thiserror::Error, Debug)]
pub enum FileError {
    #[error("Open failed: {0}")]
    Open(#[from] TransportError),

    #[error("Read failed: {0}")]
    Read(std::io::Error),

    #[error("Read stalled for more than {timeout_secs}s")]
    Stalled { timeout_secs: u64 },

    /// A remote name would land outside the local directory
    #[error("Path traversal attempt rejected: '{attempted}'")]
    PathTraversal { attempted: String },

    #[error("Local file '{path}' failed: {source}")]
    Local {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Publishing event failed: {0}")]
    Publish(#[from] SinkError),
}

// ============================================================================
// Cycle Executor
// ============================================================================

/// Runs harvest cycles for one transport and one sink.
///
/// The transport is fixed at construction, so backend dispatch happens once
/// for the process lifetime.
pub struct HarvestCycle<T, S>
where
    T: Transport,
    S: EventSink,
{
    transport: T,
    sink: S,
    settings: Arc<HarvestSettings>,
}

impl<T, S> HarvestCycle<T, S>
where
    T: Transport,
    S: EventSink,
{
    pub fn new(transport: T, sink: S, settings: Arc<HarvestSettings>) -> Self {
        Self {
            transport,
            sink,
            settings,
        }
    }

    pub fn settings(&self) -> &HarvestSettings {
        &self.settings
    }

    /// Executes one complete cycle.
    ///
    /// # Errors
    ///
    /// Returns [`CycleError`] if the connection cannot be established or the
    /// session fails to authenticate. Per-file failures are logged and
    /// counted in [`CycleReport::files_failed`] instead.
    #[instrument(skip(self), fields(transport = %self.transport.kind()))]
    pub async fn run(&self) -> Result<CycleReport, CycleError> {
        info!("Run harvest cycle");
        let settings = &self.settings;

        let mut session = self
            .transport
            .connect(&settings.endpoint, &settings.credentials)
            .await
            .map_err(|source| CycleError::Connect {
                target: settings.endpoint.to_string(),
                source,
            })?;

        // Once connected, the session is closed on every path below.
        let outcome = self.run_session(&mut session).await;
        session.close().await;

        match &outcome {
            Ok(report) => info!(
                files = report.files_resolved,
                harvested = report.files_harvested,
                failed = report.files_failed,
                events = report.events_emitted,
                duration_ms = report.duration_ms,
                "Harvest cycle completed"
            ),
            Err(e) => error!(error = %e, "Harvest cycle aborted"),
        }
        outcome
    }

    async fn run_session(&self, session: &mut T::Session) -> Result<CycleReport, CycleError> {
        let settings = &self.settings;
        let op_timeout = settings.operation_timeout;
        let mut ctx = CycleContext::new();

        timeout(op_timeout, session.authenticate(&settings.credentials))
            .await
            .unwrap_or_else(|_| Err(TransportError::timeout("authenticate", op_timeout)))
            .map_err(|source| CycleError::Authenticate {
                username: settings.credentials.username.clone(),
                source,
            })?;

        ctx.files = resolve_files(
            session,
            &settings.remote_directory,
            &settings.patterns,
            op_timeout,
        )
        .await;
        ctx.report.files_resolved = ctx.files.len();

        for name in &ctx.files {
            match self.harvest_file(session, name).await {
                Ok(events) => {
                    debug!(file = %name, events, "File harvested");
                    ctx.report.files_harvested += 1;
                    ctx.report.events_emitted += events;
                }
                Err(e) => {
                    error!(file = %name, error = %e, "Skipping file");
                    ctx.report.files_failed += 1;
                }
            }
        }

        ctx.report.duration_ms = ctx.started.elapsed().as_millis() as u64;
        Ok(ctx.report)
    }

    async fn harvest_file(&self, session: &mut T::Session, name: &str) -> Result<u64, FileError> {
        match self.settings.mode {
            ExecuteMode::Read => {
                let remote = self.open_remote(session, name).await?;
                self.emit_lines(remote).await
            }
            ExecuteMode::Get => {
                let local_path = local_copy_path(&self.settings.local_directory, name)?;
                let remote = self.open_remote(session, name).await?;
                self.copy_to_local(remote, &local_path).await?;

                let local = File::open(&local_path)
                    .await
                    .map_err(|source| FileError::Local {
                        path: local_path.clone(),
                        source,
                    })?;
                self.emit_lines(Box::pin(local)).await
            }
        }
    }

    async fn open_remote(
        &self,
        session: &mut T::Session,
        name: &str,
    ) -> Result<RemoteReader, FileError> {
        let op_timeout = self.settings.operation_timeout;
        let reader = timeout(
            op_timeout,
            session.open(&self.settings.remote_directory, name),
        )
        .await
        .unwrap_or_else(|_| Err(TransportError::timeout("open", op_timeout)))?;
        Ok(reader)
    }

    /// Streams `remote` into `local_path`, overwriting it. Each chunk read is
    /// bounded by the operation timeout, so a slow but live transfer is fine.
    async fn copy_to_local(&self, mut remote: RemoteReader, local_path: &Path) -> Result<u64, FileError> {
        let local_err = |source: std::io::Error| FileError::Local {
            path: local_path.to_path_buf(),
            source,
        };

        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(local_err)?;
        }
        let mut out = File::create(local_path).await.map_err(local_err)?;

        let op_timeout = self.settings.operation_timeout;
        let mut buf = vec![0u8; COPY_BUFFER_SIZE];
        let mut copied = 0u64;
        loop {
            let n = timeout(op_timeout, remote.read(&mut buf))
                .await
                .map_err(|_| FileError::Stalled {
                    timeout_secs: op_timeout.as_secs(),
                })?
                .map_err(FileError::Read)?;
            if n == 0 {
                break;
            }
            out.write_all(&buf[..n]).await.map_err(local_err)?;
            copied += n as u64;
        }
        out.flush().await.map_err(local_err)?;

        debug!(path = %local_path.display(), bytes = copied, "Copied to local directory");
        Ok(copied)
    }

    /// Publishes one event per line of `reader`, in order.
    ///
    /// Lines end at `\n`; a trailing `\r` is dropped and a final unterminated
    /// line still counts. Invalid UTF-8 is replaced rather than rejected.
    async fn emit_lines(&self, reader: RemoteReader) -> Result<u64, FileError> {
        let op_timeout = self.settings.operation_timeout;
        let kind = self.transport.kind();
        let mut reader = BufReader::new(reader);
        let mut line = Vec::new();
        let mut emitted = 0u64;

        loop {
            line.clear();
            let n = timeout(op_timeout, reader.read_until(b'\n', &mut line))
                .await
                .map_err(|_| FileError::Stalled {
                    timeout_secs: op_timeout.as_secs(),
                })?
                .map_err(FileError::Read)?;
            if n == 0 {
                break;
            }

            let text = String::from_utf8_lossy(strip_line_ending(&line)).into_owned();
            self.sink.publish(Event::new(kind, text)).await?;
            emitted += 1;
        }

        Ok(emitted)
    }
}

fn strip_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Resolves a remote name against the local directory, rejecting any name
/// that would escape it (path traversal guard).
///
/// # Errors
///
/// Returns [`FileError::PathTraversal`] if `name` is empty, absolute, or
/// contains `..`.
pub fn local_copy_path(local_directory: &Path, name: &str) -> Result<PathBuf, FileError> {
    let relative = Path::new(name);
    let rejected = || FileError::PathTraversal {
        attempted: name.to_string(),
    };

    if name.is_empty() || relative.is_absolute() {
        return Err(rejected());
    }

    for component in relative.components() {
        match component {
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(rejected());
            }
            _ => {}
        }
    }

    Ok(local_directory.join(relative))
}

// ============================================================================
// Tests
// ============================================================================
