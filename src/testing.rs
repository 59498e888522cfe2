//! In-memory transport fakes for unit tests

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::config::PtyConfig;
use crate::session::ProbeOutput;
use crate::session::ReachabilityProbe;
use crate::ssh::{
    ConnectTarget, Connection, ExecOutput, FileTransfer, RemoteFile, ShellChannel, Transport,
    TransportError,
};

/// Shell whose incoming data is pushed by the test
#[derive(Default)]
pub struct FakeShell {
    pending: Mutex<VecDeque<u8>>,
    closed: AtomicBool,
    notify: Notify,
    writes: Mutex<Vec<Vec<u8>>>,
    reply: Mutex<Option<Vec<u8>>>,
    reads: AtomicUsize,
    close_calls: AtomicUsize,
    stall_writes: AtomicBool,
}

impl FakeShell {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make `data` ready for reading
    pub fn push(&self, data: &[u8]) {
        self.pending.lock().extend(data);
        self.notify.notify_one();
    }

    /// Simulate the remote end closing the channel
    pub fn finish(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    /// Output produced in response to every write
    pub fn set_reply(&self, data: &[u8]) {
        *self.reply.lock() = Some(data.to_vec());
    }

    /// Make every later write hang forever
    pub fn stall_writes(&self) {
        self.stall_writes.store(true, Ordering::SeqCst);
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.writes.lock().clone()
    }

    pub fn written_text(&self) -> String {
        String::from_utf8_lossy(&self.writes.lock().concat()).into_owned()
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ShellChannel for FakeShell {
    fn data_ready(&self) -> bool {
        !self.pending.lock().is_empty()
    }

    async fn readable(&self) -> bool {
        loop {
            let notified = self.notify.notified();
            if self.data_ready() {
                return true;
            }
            if self.is_closed() {
                return false;
            }
            notified.await;
        }
    }

    async fn read(&self, max_bytes: usize) -> Result<Vec<u8>, TransportError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let mut pending = self.pending.lock();
        if pending.is_empty() && self.is_closed() {
            return Err(TransportError::ChannelClosed);
        }
        let take = pending.len().min(max_bytes);
        Ok(pending.drain(..take).collect())
    }

    async fn write(&self, data: &[u8]) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::ChannelClosed);
        }
        if self.stall_writes.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.writes.lock().push(data.to_vec());
        let reply = self.reply.lock().clone();
        if let Some(reply) = reply {
            self.push(&reply);
        }
        Ok(())
    }

    async fn close(&self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.finish();
    }
}

/// Connection backed by a [`FakeShell`] and an in-memory file system
#[derive(Default)]
pub struct FakeConnection {
    pub shell: Arc<FakeShell>,
    shells_opened: AtomicUsize,
    closed: AtomicBool,
    close_calls: AtomicUsize,
    execs: Mutex<Vec<String>>,
    exec_reply: Mutex<ExecOutput>,
    fail_exec: AtomicBool,
    files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    transfers_closed: Arc<AtomicUsize>,
}

impl FakeConnection {
    pub fn set_exec_stdout(&self, stdout: &str) {
        self.exec_reply.lock().stdout = stdout.as_bytes().to_vec();
    }

    pub fn fail_exec(&self) {
        self.fail_exec.store(true, Ordering::SeqCst);
    }

    pub fn add_file(&self, path: &str, contents: &[u8]) {
        self.files.lock().insert(path.to_string(), contents.to_vec());
    }

    pub fn execs(&self) -> Vec<String> {
        self.execs.lock().clone()
    }

    pub fn shells_opened(&self) -> usize {
        self.shells_opened.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn transfers_closed(&self) -> usize {
        self.transfers_closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connection for FakeConnection {
    async fn open_shell(&self, _pty: &PtyConfig) -> Result<Arc<dyn ShellChannel>, TransportError> {
        if self.is_closed() {
            return Err(TransportError::ChannelClosed);
        }
        self.shells_opened.fetch_add(1, Ordering::SeqCst);
        Ok(self.shell.clone())
    }

    async fn exec_once(&self, command: &str) -> Result<ExecOutput, TransportError> {
        self.execs.lock().push(command.to_string());
        if self.fail_exec.load(Ordering::SeqCst) || self.is_closed() {
            return Err(TransportError::ChannelClosed);
        }
        Ok(self.exec_reply.lock().clone())
    }

    async fn open_file_transfer(&self) -> Result<Box<dyn FileTransfer>, TransportError> {
        if self.is_closed() {
            return Err(TransportError::ChannelClosed);
        }
        Ok(Box::new(FakeFileTransfer {
            files: self.files.clone(),
            closed: self.transfers_closed.clone(),
        }))
    }

    async fn close(&self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        self.shell.finish();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct FakeFileTransfer {
    files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    closed: Arc<AtomicUsize>,
}

#[async_trait]
impl FileTransfer for FakeFileTransfer {
    async fn open_remote(&mut self, path: &str) -> Result<Box<dyn RemoteFile>, TransportError> {
        match self.files.lock().get(path) {
            Some(contents) => Ok(Box::new(FakeRemoteFile {
                contents: contents.clone(),
            })),
            None => Err(TransportError::FileNotFound(path.to_string())),
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct FakeRemoteFile {
    contents: Vec<u8>,
}

#[async_trait]
impl RemoteFile for FakeRemoteFile {
    async fn read(&mut self) -> Result<Vec<u8>, TransportError> {
        Ok(std::mem::take(&mut self.contents))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Transport that records every attempt and hands out [`FakeConnection`]s
#[derive(Default)]
pub struct FakeTransport {
    attempts: AtomicUsize,
    failures: Mutex<VecDeque<TransportError>>,
    fail_with: Option<fn() -> TransportError>,
    connect_delay: Option<Duration>,
    connections: Mutex<Vec<Arc<FakeConnection>>>,
    targets: Mutex<Vec<ConnectTarget>>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail with `errors` in order, then succeed
    pub fn failing_first(errors: Vec<TransportError>) -> Arc<Self> {
        Arc::new(Self {
            failures: Mutex::new(errors.into()),
            ..Default::default()
        })
    }

    /// Fail every attempt
    pub fn always_failing(error: fn() -> TransportError) -> Arc<Self> {
        Arc::new(Self {
            fail_with: Some(error),
            ..Default::default()
        })
    }

    /// Take `delay` to complete every connect
    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            connect_delay: Some(delay),
            ..Default::default()
        })
    }

    /// Queue failures for the next attempts
    pub fn fail_next(&self, errors: Vec<TransportError>) {
        self.failures.lock().extend(errors);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn connections(&self) -> Vec<Arc<FakeConnection>> {
        self.connections.lock().clone()
    }

    pub fn last_connection(&self) -> Option<Arc<FakeConnection>> {
        self.connections.lock().last().cloned()
    }

    pub fn targets(&self) -> Vec<ConnectTarget> {
        self.targets.lock().clone()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn connect(&self, target: &ConnectTarget) -> Result<Arc<dyn Connection>, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.targets.lock().push(target.clone());

        if let Some(delay) = self.connect_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.fail_with {
            return Err(error());
        }
        if let Some(error) = self.failures.lock().pop_front() {
            return Err(error);
        }

        let connection = Arc::new(FakeConnection::default());
        self.connections.lock().push(connection.clone());
        Ok(connection)
    }
}

/// Probe returning a fixed result and counting invocations
pub struct FakeProbe {
    output: ProbeOutput,
    calls: AtomicUsize,
}

impl FakeProbe {
    pub fn new(output: ProbeOutput) -> Arc<Self> {
        Arc::new(Self {
            output,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReachabilityProbe for FakeProbe {
    async fn probe(&self, _host: &str) -> std::io::Result<ProbeOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.output.clone())
    }
}
