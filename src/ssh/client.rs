//! SSH transport implementation using russh

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use russh::client;
use russh::keys::key::PrivateKeyWithHashAlg;
use russh::keys::{PublicKey, PublicKeyBase64};
use russh::ChannelMsg;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use super::error::TransportError;
use super::handle_owner::{spawn_handle_owner_task, HandleController};
use super::sftp::RusshFileTransfer;
use super::shell::RusshShellChannel;
use super::transport::{
    ConnectTarget, Connection, ExecOutput, FileTransfer, ResolvedCredential, ShellChannel,
    Transport,
};
use crate::config::PtyConfig;

/// [`Transport`] backed by russh
#[derive(Debug, Clone)]
pub struct RusshTransport {
    keepalive_interval: Duration,
    keepalive_max: usize,
}

impl Default for RusshTransport {
    fn default() -> Self {
        Self {
            keepalive_interval: Duration::from_secs(30),
            keepalive_max: 3,
        }
    }
}

impl RusshTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Transport for RusshTransport {
    async fn connect(&self, target: &ConnectTarget) -> Result<Arc<dyn Connection>, TransportError> {
        let label = format!("{}@{}:{}", target.username, target.host, target.port);

        info!("Connecting to SSH server at {}:{}", target.host, target.port);

        let ssh_config = client::Config {
            inactivity_timeout: None,
            keepalive_interval: Some(self.keepalive_interval),
            keepalive_max: self.keepalive_max,
            ..Default::default()
        };

        let handler = ClientHandler::new(target.host.clone(), target.port);

        let mut handle = tokio::time::timeout(
            target.timeout,
            client::connect(
                Arc::new(ssh_config),
                (target.host.as_str(), target.port),
                handler,
            ),
        )
        .await
        .map_err(|_| {
            TransportError::Timeout(format!(
                "Connection to {}:{} timed out after {:?}",
                target.host, target.port, target.timeout
            ))
        })??;

        debug!("SSH handshake completed for {}", label);

        let authenticated = match &target.credential {
            ResolvedCredential::Password(password) => handle
                .authenticate_password(&target.username, password)
                .await
                .map_err(|e| TransportError::AuthenticationFailed(e.to_string()))?,
            ResolvedCredential::KeyFile(key_path) => {
                let key = russh::keys::load_secret_key(key_path, None)?;
                let key_with_hash = PrivateKeyWithHashAlg::new(Arc::new(key), None);

                handle
                    .authenticate_publickey(&target.username, key_with_hash)
                    .await
                    .map_err(|e| TransportError::AuthenticationFailed(e.to_string()))?
            }
        };

        if !authenticated.success() {
            return Err(TransportError::AuthenticationFailed(
                "Authentication rejected by server".to_string(),
            ));
        }

        info!("SSH authentication successful for {}", label);

        let controller = spawn_handle_owner_task(handle, label.clone());
        Ok(Arc::new(RusshConnection { controller, label }))
    }
}

/// Client handler for russh callbacks
///
/// Unknown and changed host keys are accepted; automation hosts are
/// re-imaged often enough that their keys churn. The fingerprint is logged
/// so a run can still be audited afterwards.
pub struct ClientHandler {
    host: String,
    port: u16,
}

impl ClientHandler {
    pub fn new(host: String, port: u16) -> Self {
        Self { host, port }
    }
}

/// SHA256 fingerprint of a public key, OpenSSH style
pub fn fingerprint(key: &PublicKey) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.public_key_bytes());
    let hash = hasher.finalize();
    format!("SHA256:{}", BASE64.encode(hash).trim_end_matches('='))
}

impl client::Handler for ClientHandler {
    type Error = TransportError;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        info!(
            "Accepting host key for {}:{} (fingerprint: {})",
            self.host,
            self.port,
            fingerprint(server_public_key)
        );
        Ok(true)
    }
}

/// An authenticated russh connection
pub struct RusshConnection {
    controller: HandleController,
    label: String,
}

#[async_trait]
impl Connection for RusshConnection {
    async fn open_shell(&self, pty: &PtyConfig) -> Result<Arc<dyn ShellChannel>, TransportError> {
        let channel = self.controller.open_session_channel().await?;

        debug!("Channel opened, requesting PTY for {}", self.label);

        channel
            .request_pty(false, &pty.term, pty.cols, pty.rows, 0, 0, &[])
            .await
            .map_err(|e| TransportError::ChannelError(format!("PTY request failed: {}", e)))?;

        channel
            .request_shell(false)
            .await
            .map_err(|e| TransportError::ChannelError(format!("Shell request failed: {}", e)))?;

        info!(
            "Interactive shell started for {} ({} {}x{})",
            self.label, pty.term, pty.cols, pty.rows
        );

        Ok(Arc::new(RusshShellChannel::spawn(channel, self.label.clone())))
    }

    async fn exec_once(&self, command: &str) -> Result<ExecOutput, TransportError> {
        let mut channel = self.controller.open_session_channel().await?;

        channel
            .exec(true, command)
            .await
            .map_err(|e| TransportError::ChannelError(format!("Failed to execute command: {}", e)))?;

        let mut output = ExecOutput::default();

        loop {
            match channel.wait().await {
                Some(ChannelMsg::Data { data }) => {
                    output.stdout.extend_from_slice(&data);
                }
                Some(ChannelMsg::ExtendedData { data, ext }) if ext == 1 => {
                    output.stderr.extend_from_slice(&data);
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    output.exit_status = Some(exit_status);
                }
                Some(ChannelMsg::Close) | None => break,
                _ => {}
            }
        }

        debug!(
            "Exec on {} finished with status {:?} ({} bytes stdout)",
            self.label,
            output.exit_status,
            output.stdout.len()
        );

        Ok(output)
    }

    async fn open_file_transfer(&self) -> Result<Box<dyn FileTransfer>, TransportError> {
        let channel = self.controller.open_session_channel().await?;
        let transfer = RusshFileTransfer::open(channel, &self.label).await?;
        Ok(Box::new(transfer))
    }

    async fn close(&self) {
        if self.controller.is_connected() {
            info!("Closing the connection with {}", self.label);
            self.controller.disconnect().await;
        }
    }

    fn is_closed(&self) -> bool {
        !self.controller.is_connected()
    }
}
