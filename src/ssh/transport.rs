//! Transport capabilities
//!
//! The session layer only talks to the network through these traits. The
//! production implementation lives in [`super::client`]; tests substitute
//! in-memory fakes.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::error::TransportError;
use crate::config::PtyConfig;

/// Credential after the default key has been resolved to a path
#[derive(Clone, PartialEq, Eq)]
pub enum ResolvedCredential {
    Password(String),
    KeyFile(PathBuf),
}

impl std::fmt::Debug for ResolvedCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolvedCredential::Password(_) => f.write_str("Password(<redacted>)"),
            ResolvedCredential::KeyFile(path) => write!(f, "KeyFile({})", path.display()),
        }
    }
}

/// Everything a transport needs to open one connection
#[derive(Debug, Clone)]
pub struct ConnectTarget {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub credential: ResolvedCredential,
    pub timeout: Duration,
}

/// Result of a one-shot command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_status: Option<u32>,
}

/// Opens authenticated connections
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, target: &ConnectTarget) -> Result<Arc<dyn Connection>, TransportError>;
}

/// An authenticated connection to one host
#[async_trait]
pub trait Connection: Send + Sync {
    /// Open an interactive shell with a pseudo-terminal
    async fn open_shell(&self, pty: &PtyConfig) -> Result<Arc<dyn ShellChannel>, TransportError>;

    /// Run a command on its own channel and collect its output
    async fn exec_once(&self, command: &str) -> Result<ExecOutput, TransportError>;

    /// Open a file-transfer sub-channel
    async fn open_file_transfer(&self) -> Result<Box<dyn FileTransfer>, TransportError>;

    /// Disconnect; idempotent
    async fn close(&self);

    fn is_closed(&self) -> bool;
}

/// An open interactive shell channel
///
/// Reads and writes go through `&self` so a background reader and a command
/// writer can share one channel without a lock between them.
#[async_trait]
pub trait ShellChannel: Send + Sync {
    /// Whether a `read` would return data right now
    fn data_ready(&self) -> bool;

    /// Wait until data is ready. Returns `false` once the channel is closed
    /// and fully drained.
    async fn readable(&self) -> bool;

    /// Take up to `max_bytes` of ready data; empty when nothing is ready
    async fn read(&self, max_bytes: usize) -> Result<Vec<u8>, TransportError>;

    async fn write(&self, data: &[u8]) -> Result<(), TransportError>;

    async fn close(&self);
}

/// File-transfer sub-channel
#[async_trait]
pub trait FileTransfer: Send {
    /// Open a remote file for reading
    async fn open_remote(&mut self, path: &str) -> Result<Box<dyn RemoteFile>, TransportError>;

    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Remote file opened for reading
#[async_trait]
pub trait RemoteFile: Send {
    /// Read the remaining contents
    async fn read(&mut self) -> Result<Vec<u8>, TransportError>;

    async fn close(&mut self) -> Result<(), TransportError>;
}
