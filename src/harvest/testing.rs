//! Scripted in-memory transport and sink used by the unit tests.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::harvest::traits::{remote_join, RemoteReader, Session, Transport, TransportError};
use crate::model::{Credentials, Endpoint, Event, TransportKind};
use crate::traits::{EventSink, SinkError};

#[derive(Default)]
struct RemoteState {
    files: Mutex<HashMap<String, Vec<u8>>>,
    listings: Mutex<HashMap<String, Option<Vec<String>>>>,
    stalled: Mutex<HashSet<String>>,
    fail_connect: AtomicBool,
    fail_auth: AtomicBool,
    connects: AtomicUsize,
    auths: AtomicUsize,
    closes: AtomicUsize,
    listed: Mutex<Vec<String>>,
}

/// Fake file server. Clones share state, so a test can keep one handle for
/// assertions while the cycle owns another.
#[derive(Clone)]
pub(crate) struct FakeRemote {
    kind: TransportKind,
    state: Arc<RemoteState>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self {
            kind: TransportKind::Ftp,
            state: Arc::new(RemoteState::default()),
        }
    }

    pub fn with_kind(mut self, kind: TransportKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_file(self, path: &str, contents: &[u8]) -> Self {
        self.state
            .files
            .lock()
            .unwrap()
            .insert(path.to_string(), contents.to_vec());
        self
    }

    pub fn with_listing(self, pattern: &str, names: &[&str]) -> Self {
        self.state.listings.lock().unwrap().insert(
            pattern.to_string(),
            Some(names.iter().map(|n| n.to_string()).collect()),
        );
        self
    }

    pub fn with_failing_listing(self, pattern: &str) -> Self {
        self.state
            .listings
            .lock()
            .unwrap()
            .insert(pattern.to_string(), None);
        self
    }

    /// `open` on this path never completes.
    pub fn with_stalled_file(self, path: &str) -> Self {
        self.state.stalled.lock().unwrap().insert(path.to_string());
        self
    }

    pub fn failing_connect(self) -> Self {
        self.state.fail_connect.store(true, Ordering::SeqCst);
        self
    }

    pub fn failing_auth(self) -> Self {
        self.state.fail_auth.store(true, Ordering::SeqCst);
        self
    }

    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn auths(&self) -> usize {
        self.state.auths.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    pub fn listed_patterns(&self) -> Vec<String> {
        self.state.listed.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for FakeRemote {
    type Session = FakeSession;

    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn connect(
        &self,
        endpoint: &Endpoint,
        _credentials: &Credentials,
    ) -> Result<FakeSession, TransportError> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_connect.load(Ordering::SeqCst) {
            return Err(TransportError::Connect {
                target: endpoint.to_string(),
                message: "connection refused".to_string(),
            });
        }
        Ok(FakeSession {
            state: self.state.clone(),
            authenticated: false,
        })
    }
}

pub(crate) struct FakeSession {
    state: Arc<RemoteState>,
    authenticated: bool,
}

#[async_trait]
impl Session for FakeSession {
    async fn authenticate(&mut self, credentials: &Credentials) -> Result<(), TransportError> {
        self.state.auths.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_auth.load(Ordering::SeqCst) {
            return Err(TransportError::Auth(format!(
                "530 Login incorrect for {}",
                credentials.username
            )));
        }
        self.authenticated = true;
        Ok(())
    }

    async fn list(&mut self, _directory: &str, pattern: &str) -> Result<Vec<String>, TransportError> {
        self.state.listed.lock().unwrap().push(pattern.to_string());
        let scripted = self.state.listings.lock().unwrap().get(pattern).cloned();
        match scripted {
            Some(Some(names)) => Ok(names),
            _ => Err(TransportError::List {
                pattern: pattern.to_string(),
                message: "550 No files found".to_string(),
            }),
        }
    }

    async fn open(&mut self, directory: &str, name: &str) -> Result<RemoteReader, TransportError> {
        if !self.authenticated {
            return Err(TransportError::NotConnected);
        }
        let path = remote_join(directory, name);
        let stalled = self.state.stalled.lock().unwrap().contains(&path);
        if stalled {
            std::future::pending::<()>().await;
        }
        let contents = self.state.files.lock().unwrap().get(&path).cloned();
        match contents {
            Some(bytes) => Ok(Box::pin(Cursor::new(bytes))),
            None => Err(TransportError::Open {
                path,
                message: "550 No such file".to_string(),
            }),
        }
    }

    async fn close(&mut self) {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        self.authenticated = false;
    }
}

/// Sink that keeps every event in memory.
#[derive(Clone, Default)]
pub(crate) struct MemorySink {
    events: Arc<Mutex<Vec<Event>>>,
}

impl MemorySink {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.message).collect()
    }
}

#[async_trait]
impl EventSink for MemorySink {
    async fn publish(&self, event: Event) -> Result<(), SinkError> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}
