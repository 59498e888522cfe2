//! Connection establishment
//!
//! Turns [`ConnectionParameters`] into a live [`Link`]: an authenticated
//! connection, one interactive shell and the drainer reading from it.
//! Transient failures are retried with a fixed backoff.

use std::path::Path;
use std::sync::Arc;

use tokio::time::sleep;
use tracing::{error, info, warn};

use super::buffer::OutputBuffers;
use super::drainer::StreamDrainer;
use crate::config::{ConnectionParameters, Credential, SessionSettings};
use crate::error::SessionError;
use crate::ssh::{
    ConnectTarget, Connection, ResolvedCredential, ShellChannel, Transport, TransportError,
};

/// A connected transport with its shell and drainer
pub struct Link {
    pub connection: Arc<dyn Connection>,
    pub shell: Arc<dyn ShellChannel>,
    pub buffers: Arc<OutputBuffers>,
    pub drainer: StreamDrainer,
}

impl Link {
    /// Stop the drainer, close the shell and disconnect
    pub async fn shutdown(mut self) {
        self.drainer.stop().await;
        self.shell.close().await;
        self.connection.close().await;
    }

    pub fn is_alive(&self) -> bool {
        !self.connection.is_closed()
    }
}

/// Builds links with bounded retry
pub struct ConnectionEstablisher {
    transport: Arc<dyn Transport>,
    settings: SessionSettings,
}

impl ConnectionEstablisher {
    pub fn new(transport: Arc<dyn Transport>, settings: SessionSettings) -> Self {
        Self {
            transport,
            settings,
        }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Pick the credential for a connection.
    ///
    /// A key override wins, then the parameters' own credential, then the
    /// configured default key. Key files must exist.
    pub fn resolve_credential(
        &self,
        params: &ConnectionParameters,
        key_override: Option<&Path>,
    ) -> Result<ResolvedCredential, SessionError> {
        let key_path = match (key_override, &params.credential) {
            (Some(path), _) => path.to_path_buf(),
            (None, Credential::Password { password }) => {
                return Ok(ResolvedCredential::Password(password.clone()))
            }
            (None, Credential::Key { key_path }) => key_path.clone(),
            (None, Credential::DefaultKey) => self.settings.default_key_path(),
        };

        if !key_path.exists() {
            error!("Private key file {} does not exist", key_path.display());
            return Err(SessionError::KeyFileMissing(key_path));
        }
        Ok(ResolvedCredential::KeyFile(key_path))
    }

    /// Connect with retry, giving up after `max_attempts`
    pub async fn establish(
        &self,
        params: &ConnectionParameters,
        key_override: Option<&Path>,
    ) -> Result<Link, SessionError> {
        let credential = self.resolve_credential(params, key_override)?;
        let target = self.target(params, credential);
        let max_attempts = self.settings.max_attempts.max(1);
        let backoff = self.settings.retry_backoff();
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                info!(
                    "Retrying {} in {:?} (attempt {}/{})",
                    params.address(),
                    backoff,
                    attempt,
                    max_attempts
                );
                sleep(backoff).await;
            }

            info!(
                "Connecting to {} as {} (attempt {}/{})",
                params.address(),
                params.username,
                attempt,
                max_attempts
            );

            match self.attempt(&target).await {
                Ok(link) => {
                    info!("Connected to {} on attempt {}", params.address(), attempt);
                    return Ok(link);
                }
                Err(e) if !e.is_retryable() => {
                    error!("Connection to {} failed permanently: {}", params.address(), e);
                    return Err(e.into());
                }
                Err(e) => {
                    warn!(
                        "Connection attempt {} to {} failed: {}",
                        attempt,
                        params.address(),
                        e
                    );
                    last_error = Some(e);
                }
            }
        }

        error!(
            "Failed to connect to {} after {} attempts",
            params.address(),
            max_attempts
        );

        Err(SessionError::ConnectionFailed {
            host: params.host.clone(),
            port: params.port,
            attempts: max_attempts,
            last_error: last_error
                .unwrap_or_else(|| TransportError::Unreachable("no attempt made".to_string())),
        })
    }

    /// A single attempt without retry
    pub async fn connect_once(
        &self,
        params: &ConnectionParameters,
        key_override: Option<&Path>,
    ) -> Result<Link, SessionError> {
        let credential = self.resolve_credential(params, key_override)?;
        let target = self.target(params, credential);
        Ok(self.attempt(&target).await?)
    }

    fn target(&self, params: &ConnectionParameters, credential: ResolvedCredential) -> ConnectTarget {
        ConnectTarget {
            host: params.host.clone(),
            port: params.port,
            username: params.username.clone(),
            credential,
            timeout: self.settings.connect_timeout(),
        }
    }

    async fn attempt(&self, target: &ConnectTarget) -> Result<Link, TransportError> {
        let connection = self.transport.connect(target).await?;

        let shell = match connection.open_shell(&self.settings.pty).await {
            Ok(shell) => shell,
            Err(e) => {
                connection.close().await;
                return Err(e);
            }
        };

        info!(
            "Opened shell on {}:{} ({} {}x{})",
            target.host,
            target.port,
            self.settings.pty.term,
            self.settings.pty.cols,
            self.settings.pty.rows
        );

        let buffers = Arc::new(OutputBuffers::new());
        let drainer = StreamDrainer::spawn(
            shell.clone(),
            buffers.clone(),
            format!("{}@{}:{}", target.username, target.host, target.port),
        );

        Ok(Link {
            connection,
            shell,
            buffers,
            drainer,
        })
    }
}
