//! Session error types

use std::path::PathBuf;

use thiserror::Error;

use crate::ssh::TransportError;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Key file not found: {}", .0.display())]
    KeyFileMissing(PathBuf),

    #[error("Connection to {host}:{port} failed after {attempts} attempts: {last_error}")]
    ConnectionFailed {
        host: String,
        port: u16,
        attempts: u32,
        last_error: TransportError,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Session not connected: {0}")]
    NotConnected(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("{host} did not come back within {waited_secs}s after reboot; manual intervention required")]
    RebootRecoveryFailed { host: String, waited_secs: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl serde::Serialize for SessionError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
