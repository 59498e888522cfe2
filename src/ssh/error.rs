//! Transport error types

use russh_sftp::client::error::Error as SftpClientError;
use russh_sftp::protocol::StatusCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Network unreachable: {0}")]
    Unreachable(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Host key rejected: {0}")]
    HostKeyRejected(String),

    #[error("SSH protocol error: {0}")]
    ProtocolError(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Channel error: {0}")]
    ChannelError(String),

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Key error: {0}")]
    KeyError(String),

    #[error("Remote file not found: {0}")]
    FileNotFound(String),

    #[error("SFTP error: {0}")]
    Sftp(String),

    #[error("IO error: {0}")]
    IoError(std::io::Error),
}

impl TransportError {
    /// Whether a fresh connection attempt may succeed where this one failed.
    ///
    /// Network, handshake, timeout and authentication failures are transient
    /// on hosts that are rebooting or still bringing up sshd. Host key
    /// mismatches and unreadable keys will not change between attempts.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Unreachable(_)
            | TransportError::AuthenticationFailed(_)
            | TransportError::ProtocolError(_)
            | TransportError::Timeout(_)
            | TransportError::ChannelError(_)
            | TransportError::IoError(_) => true,
            TransportError::HostKeyRejected(_)
            | TransportError::ChannelClosed
            | TransportError::KeyError(_)
            | TransportError::FileNotFound(_)
            | TransportError::Sftp(_) => false,
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        let message = err.to_string();
        if err.kind() == std::io::ErrorKind::TimedOut {
            TransportError::Timeout(message)
        } else if err.kind() == std::io::ErrorKind::ConnectionRefused
            || message.to_lowercase().contains("unreachable")
        {
            TransportError::Unreachable(message)
        } else {
            TransportError::IoError(err)
        }
    }
}

impl From<russh::Error> for TransportError {
    fn from(err: russh::Error) -> Self {
        match err {
            russh::Error::IO(io) => io.into(),
            other => {
                let message = other.to_string();
                if message.to_lowercase().contains("timeout") {
                    TransportError::Timeout(message)
                } else {
                    TransportError::ProtocolError(message)
                }
            }
        }
    }
}

impl From<russh::keys::Error> for TransportError {
    fn from(err: russh::keys::Error) -> Self {
        TransportError::KeyError(err.to_string())
    }
}

impl From<SftpClientError> for TransportError {
    fn from(err: SftpClientError) -> Self {
        match err {
            SftpClientError::Status(status) if matches!(status.status_code, StatusCode::NoSuchFile) => {
                TransportError::FileNotFound(status.error_message)
            }
            SftpClientError::Timeout => TransportError::Timeout("SFTP request timed out".to_string()),
            other => TransportError::Sftp(other.to_string()),
        }
    }
}

impl serde::Serialize for TransportError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
