//! SFTP sub-channel over russh-sftp

use async_trait::async_trait;
use russh::client::Msg;
use russh::Channel;
use russh_sftp::client::fs::File;
use russh_sftp::client::SftpSession as RusshSftpSession;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info};

use super::error::TransportError;
use super::transport::{FileTransfer, RemoteFile};

/// [`FileTransfer`] backed by an SFTP subsystem channel
pub struct RusshFileTransfer {
    sftp: Option<RusshSftpSession>,
    label: String,
}

impl RusshFileTransfer {
    /// Start the SFTP subsystem on a freshly opened session channel
    pub async fn open(channel: Channel<Msg>, label: &str) -> Result<Self, TransportError> {
        info!("Opening SFTP subsystem for {}", label);

        channel.request_subsystem(true, "sftp").await.map_err(|e| {
            TransportError::Sftp(format!("Failed to request SFTP subsystem: {}", e))
        })?;

        let sftp = RusshSftpSession::new(channel.into_stream()).await?;

        debug!("SFTP subsystem opened for {}", label);

        Ok(Self {
            sftp: Some(sftp),
            label: label.to_string(),
        })
    }
}

#[async_trait]
impl FileTransfer for RusshFileTransfer {
    async fn open_remote(&mut self, path: &str) -> Result<Box<dyn RemoteFile>, TransportError> {
        let sftp = self.sftp.as_ref().ok_or(TransportError::ChannelClosed)?;
        let file = sftp.open(path).await?;
        debug!("Opened remote file {} on {}", path, self.label);
        Ok(Box::new(RusshRemoteFile { file }))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if let Some(sftp) = self.sftp.take() {
            sftp.close().await?;
            debug!("SFTP subsystem closed for {}", self.label);
        }
        Ok(())
    }
}

struct RusshRemoteFile {
    file: File,
}

#[async_trait]
impl RemoteFile for RusshRemoteFile {
    async fn read(&mut self) -> Result<Vec<u8>, TransportError> {
        let mut contents = Vec::new();
        self.file.read_to_end(&mut contents).await?;
        Ok(contents)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.file.shutdown().await?;
        Ok(())
    }
}
