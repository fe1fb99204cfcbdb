//! FTP backend built on `suppaftp`'s blocking client.
//!
//! Every protocol call runs on the blocking pool. The [`FtpStream`] is moved
//! into a blocking task, and the task hands it back when it finishes. The
//! session keeps the task's handle until then, so an operation abandoned by
//! its caller (the harvest cycle bounds each one) never loses the control
//! connection: the next call waits for the task and takes the stream back.
//!
//! `RETR` is streamed. The task drains the data connection in chunks over a
//! channel and reads the closing reply once the data ends, so a long but
//! live download is only bounded chunk by chunk.

use async_trait::async_trait;
use std::io::{self, Read};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use std::time::Duration;
use suppaftp::types::FileType;
use suppaftp::FtpStream;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::harvest::traits::{
    normalize_remote_dir, RemoteReader, Session, Transport, TransportError,
};
use crate::model::{Credentials, Endpoint, TransportKind};

const TRANSFER_CHUNK_SIZE: usize = 32 * 1024;
const TRANSFER_QUEUE_DEPTH: usize = 4;

pub struct FtpTransport {
    connect_timeout: Duration,
    io_timeout: Duration,
}

impl FtpTransport {
    /// `io_timeout` is applied to the control socket as its read/write
    /// timeout, so blocked calls eventually return even if abandoned.
    pub fn new(connect_timeout: Duration, io_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            io_timeout,
        }
    }
}

#[async_trait]
impl Transport for FtpTransport {
    type Session = FtpSession;

    fn kind(&self) -> TransportKind {
        TransportKind::Ftp
    }

    async fn connect(
        &self,
        endpoint: &Endpoint,
        _credentials: &Credentials,
    ) -> Result<FtpSession, TransportError> {
        let target = endpoint.to_string();
        let host = endpoint.host.clone();
        let port = endpoint.port;
        let connect_timeout = self.connect_timeout;
        let io_timeout = self.io_timeout;

        debug!(target = %target, "Dialing FTP server");
        let stream = tokio::task::spawn_blocking(move || {
            dial(&host, port, connect_timeout, io_timeout)
        })
        .await
        .map_err(|e| TransportError::Task(e.to_string()))?
        .map_err(|message| TransportError::Connect {
            target: target.clone(),
            message,
        })?;

        info!(target = %target, "Connected to FTP server");
        Ok(FtpSession {
            stream: Some(stream),
            busy: None,
            cwd: None,
            io_timeout,
        })
    }
}

/// Resolves `host` and tries each address in turn, each bounded by
/// `connect_timeout`.
fn dial(
    host: &str,
    port: u16,
    connect_timeout: Duration,
    io_timeout: Duration,
) -> Result<FtpStream, String> {
    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|e| format!("failed to resolve {}: {}", host, e))?
        .collect();

    let mut last_error = format!("no addresses found for {}", host);
    for addr in addrs {
        match FtpStream::connect_timeout(addr, connect_timeout) {
            Ok(stream) => {
                let socket = stream.get_ref();
                if let Err(e) = socket
                    .set_read_timeout(Some(io_timeout))
                    .and_then(|_| socket.set_write_timeout(Some(io_timeout)))
                {
                    warn!(addr = %addr, error = %e, "Could not set FTP socket timeouts");
                }
                return Ok(stream);
            }
            Err(e) => last_error = format!("{}: {}", addr, e),
        }
    }
    Err(last_error)
}

pub struct FtpSession {
    stream: Option<FtpStream>,
    /// Blocking task currently holding the stream, if any.
    busy: Option<JoinHandle<FtpStream>>,
    /// Directory the server is currently in; `None` until the first change.
    cwd: Option<String>,
    io_timeout: Duration,
}

impl FtpSession {
    /// Takes the stream back, waiting for a blocking task still using it.
    async fn reclaim(&mut self) -> Result<FtpStream, TransportError> {
        if let Some(stream) = self.stream.take() {
            return Ok(stream);
        }
        let Some(task) = self.busy.as_mut() else {
            return Err(TransportError::NotConnected);
        };
        let joined = task.await;
        self.busy = None;
        joined.map_err(|e| TransportError::Task(e.to_string()))
    }

    /// Runs a blocking protocol call against the stream on the blocking pool.
    async fn with_stream<R, F>(&mut self, op: F) -> Result<R, TransportError>
    where
        F: FnOnce(&mut FtpStream) -> Result<R, TransportError> + Send + 'static,
        R: Send + 'static,
    {
        let mut stream = self.reclaim().await?;
        let (result_tx, result_rx) = oneshot::channel();
        self.busy = Some(tokio::task::spawn_blocking(move || {
            let _ = result_tx.send(op(&mut stream));
            stream
        }));

        let result = result_rx
            .await
            .map_err(|_| TransportError::Task("FTP task ended without a result".to_string()))?;
        self.stream = Some(self.reclaim().await?);
        result
    }

    /// Changes into `directory` unless the server is already there.
    async fn enter(&mut self, directory: &str) -> Result<(), TransportError> {
        let target = normalize_remote_dir(directory).to_string();
        if target.is_empty() || self.cwd.as_deref() == Some(target.as_str()) {
            return Ok(());
        }

        let dir = target.clone();
        self.with_stream(move |ftp| {
            ftp.cwd(&dir).map_err(|e| TransportError::Open {
                path: dir.clone(),
                message: e.to_string(),
            })
        })
        .await?;
        self.cwd = Some(target);
        Ok(())
    }
}

/// Issues `RETR name` and drains the data connection into `chunks`, then
/// reads the transfer's closing reply. Stops early once the receiving reader
/// is dropped.
fn retrieve(
    ftp: &mut FtpStream,
    name: &str,
    io_timeout: Duration,
    opened: oneshot::Sender<Result<Option<TcpStream>, TransportError>>,
    chunks: mpsc::Sender<io::Result<Vec<u8>>>,
) {
    let mut data = match ftp.retr_as_stream(name) {
        Ok(data) => data,
        Err(e) => {
            let _ = opened.send(Err(TransportError::Open {
                path: name.to_string(),
                message: e.to_string(),
            }));
            return;
        }
    };

    let socket = data.get_ref();
    if let Err(e) = socket.set_read_timeout(Some(io_timeout)) {
        warn!(file = %name, error = %e, "Could not set FTP data socket timeout");
    }
    let data_socket = match socket.try_clone() {
        Ok(clone) => Some(clone),
        Err(e) => {
            debug!(file = %name, error = %e, "Could not clone FTP data socket");
            None
        }
    };

    if opened.send(Ok(data_socket)).is_ok() {
        loop {
            let mut chunk = vec![0u8; TRANSFER_CHUNK_SIZE];
            match data.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    chunk.truncate(n);
                    if chunks.blocking_send(Ok(chunk)).is_err() {
                        debug!(file = %name, "Reader dropped, abandoning transfer");
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    let _ = chunks.blocking_send(Err(e));
                    break;
                }
            }
        }
    }

    // The reader only sees end-of-data once the server confirmed the transfer.
    if let Err(e) = ftp.finalize_retr_stream(data) {
        debug!(file = %name, error = %e, "FTP transfer did not complete cleanly");
        let _ = chunks.blocking_send(Err(io::Error::new(io::ErrorKind::Other, e.to_string())));
    }
}

/// Async side of a streamed `RETR`.
struct TransferReader {
    chunks: mpsc::Receiver<io::Result<Vec<u8>>>,
    chunk: Vec<u8>,
    offset: usize,
    /// Shut down on drop so an abandoned transfer unblocks its task.
    data_socket: Option<TcpStream>,
}

impl AsyncRead for TransferReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        while this.offset == this.chunk.len() {
            match ready!(this.chunks.poll_recv(cx)) {
                Some(Ok(chunk)) => {
                    this.chunk = chunk;
                    this.offset = 0;
                }
                Some(Err(e)) => return Poll::Ready(Err(e)),
                None => return Poll::Ready(Ok(())),
            }
        }

        let n = buf.remaining().min(this.chunk.len() - this.offset);
        buf.put_slice(&this.chunk[this.offset..this.offset + n]);
        this.offset += n;
        Poll::Ready(Ok(()))
    }
}

impl Drop for TransferReader {
    fn drop(&mut self) {
        if let Some(socket) = self.data_socket.take() {
            let _ = socket.shutdown(Shutdown::Both);
        }
    }
}

#[async_trait]
impl Session for FtpSession {
    async fn authenticate(&mut self, credentials: &Credentials) -> Result<(), TransportError> {
        let username = credentials.username.clone();
        let password = credentials.password.clone();
        self.with_stream(move |ftp| {
            ftp.login(username.as_str(), password.as_str())
                .map_err(|e| TransportError::Auth(e.to_string()))?;
            ftp.transfer_type(FileType::Binary)
                .map_err(|e| TransportError::Auth(e.to_string()))
        })
        .await
    }

    async fn list(&mut self, directory: &str, pattern: &str) -> Result<Vec<String>, TransportError> {
        self.enter(directory).await.map_err(|e| TransportError::List {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?;

        let pattern = pattern.to_string();
        self.with_stream(move |ftp| {
            ftp.nlst(Some(pattern.as_str()))
                .map_err(|e| TransportError::List {
                    pattern: pattern.clone(),
                    message: e.to_string(),
                })
        })
        .await
    }

    async fn open(&mut self, directory: &str, name: &str) -> Result<RemoteReader, TransportError> {
        self.enter(directory).await?;

        let mut stream = self.reclaim().await?;
        let (opened_tx, opened_rx) = oneshot::channel();
        let (chunk_tx, chunk_rx) = mpsc::channel(TRANSFER_QUEUE_DEPTH);
        let name = name.to_string();
        let io_timeout = self.io_timeout;
        self.busy = Some(tokio::task::spawn_blocking(move || {
            retrieve(&mut stream, &name, io_timeout, opened_tx, chunk_tx);
            stream
        }));

        let data_socket = opened_rx
            .await
            .map_err(|_| TransportError::Task("FTP transfer task ended early".to_string()))??;
        Ok(Box::pin(TransferReader {
            chunks: chunk_rx,
            chunk: Vec::new(),
            offset: 0,
            data_socket,
        }))
    }

    async fn close(&mut self) {
        self.cwd = None;
        let Ok(mut stream) = self.reclaim().await else {
            return;
        };
        let quit = tokio::task::spawn_blocking(move || stream.quit()).await;
        match quit {
            Ok(Ok(())) => debug!("FTP session closed"),
            Ok(Err(e)) => debug!(error = %e, "FTP QUIT failed, dropping connection"),
            Err(e) => debug!(error = %e, "FTP QUIT task failed"),
        }
    }
}
