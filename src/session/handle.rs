//! Session handle
//!
//! One logical session against one host: a [`Link`] (connection, shell and
//! drainer) plus the commands automation scripts run through it.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use super::buffer::OutputBuffers;
use super::establish::{ConnectionEstablisher, Link};
use super::parser::parse;
use super::probe::ReachabilityProbe;
use crate::config::ConnectionParameters;
use crate::error::SessionError;
use crate::ssh::{Connection, ShellChannel};

type LinkParts = (Arc<dyn Connection>, Arc<dyn ShellChannel>, Arc<OutputBuffers>);

/// A connected session with one interactive shell
pub struct SessionHandle {
    id: String,
    params: ConnectionParameters,
    key_override: Option<PathBuf>,
    establisher: Arc<ConnectionEstablisher>,
    probe: Arc<dyn ReachabilityProbe>,
    link: Mutex<Option<Link>>,
    reachable: AtomicBool,
    created_at: Instant,
}

impl SessionHandle {
    /// Establish a link and wrap it in a new handle
    pub async fn connect(
        params: ConnectionParameters,
        key_override: Option<PathBuf>,
        establisher: Arc<ConnectionEstablisher>,
        probe: Arc<dyn ReachabilityProbe>,
    ) -> Result<Self, SessionError> {
        let link = establisher.establish(&params, key_override.as_deref()).await?;

        let handle = Self {
            id: uuid::Uuid::new_v4().to_string(),
            params,
            key_override,
            establisher,
            probe,
            link: Mutex::new(Some(link)),
            reachable: AtomicBool::new(false),
            created_at: Instant::now(),
        };

        info!("Session {} created for {}", handle.id, handle.params.address());
        Ok(handle)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn params(&self) -> &ConnectionParameters {
        &self.params
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Live connection, shell and buffers, or `NotConnected`
    async fn parts(&self) -> Result<LinkParts, SessionError> {
        let link = self.link.lock().await;
        match link.as_ref() {
            Some(link) if link.is_alive() => Ok((
                link.connection.clone(),
                link.shell.clone(),
                link.buffers.clone(),
            )),
            _ => Err(SessionError::NotConnected(self.params.address())),
        }
    }

    /// Make sure the interactive shell is open.
    ///
    /// The shell is opened together with the connection, so this only
    /// confirms it; it never opens a second channel.
    pub async fn open_shell(&self) -> Result<(), SessionError> {
        info!(
            "Opening shell connection to remote host {}",
            self.params.address()
        );
        self.parts().await?;
        debug!("Reusing the open shell of session {}", self.id);
        Ok(())
    }

    /// Run a command on its own exec channel and return its stdout
    pub async fn run_direct(&self, command: &str) -> Result<String, SessionError> {
        let (connection, _, _) = self.parts().await?;

        info!("Executing command on {}: {}", self.params.address(), command);
        let output = connection.exec_once(command).await.map_err(|e| {
            error!("Command on {} failed: {}", self.params.address(), e);
            SessionError::from(e)
        })?;

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Type a command into the shell, wait for it to settle and return the
    /// normalized output it produced
    pub async fn run_interactive(&self, command: &str) -> Result<String, SessionError> {
        let (_, shell, buffers) = self.parts().await?;
        let settings = self.establisher.settings();

        buffers.clear();

        info!("Executing command on {}: {}", self.params.address(), command);
        let line = format!("{}\n", command);
        match tokio::time::timeout(settings.io_timeout(), shell.write(line.as_bytes())).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!("Writing to the shell on {} failed: {}", self.params.address(), e);
                return Err(e.into());
            }
            Err(_) => {
                error!(
                    "Writing to the shell on {} timed out after {:?}",
                    self.params.address(),
                    settings.io_timeout()
                );
                return Err(SessionError::Timeout(format!(
                    "write to {} timed out",
                    self.params.address()
                )));
            }
        }

        sleep(settings.settle()).await;
        Ok(parse(&buffers.text()))
    }

    /// Run a command inside an EVE service container
    pub async fn run_in_service(&self, service: &str, command: &str) -> Result<String, SessionError> {
        let command = format!("eve enter {} '{}'", service, command);
        self.run_interactive(&command).await
    }

    /// Normalized output accumulated since the last reset
    pub async fn current_output(&self) -> Result<String, SessionError> {
        let (_, _, buffers) = self.parts().await?;
        Ok(parse(&buffers.text()))
    }

    /// Raw bytes accumulated since the last reset
    pub async fn raw_output(&self) -> Result<Vec<u8>, SessionError> {
        let (_, _, buffers) = self.parts().await?;
        Ok(buffers.raw())
    }

    /// Drop the output accumulated so far
    pub async fn reset_buffers(&self) {
        if let Some(link) = self.link.lock().await.as_ref() {
            link.buffers.clear();
        }
    }

    /// Reboot the host and wait for it to accept connections again
    pub async fn hard_reboot(&self) -> Result<(), SessionError> {
        let settings = self.establisher.settings();

        // The host may drop the connection before the command returns
        if let Err(e) = self.run_direct("reboot").await {
            warn!("Reboot command on {} ended with: {}", self.params.address(), e);
        }
        info!("Reboot requested from {}", self.params.address());

        let poll = settings.reboot_poll();
        let ceiling = settings.reboot_ceiling();
        let start = Instant::now();

        loop {
            match self
                .establisher
                .connect_once(&self.params, self.key_override.as_deref())
                .await
            {
                Ok(new_link) => {
                    let old = self.link.lock().await.replace(new_link);
                    if let Some(old) = old {
                        old.shutdown().await;
                    }
                    info!("Reconnected with {} after reboot", self.params.address());
                    return Ok(());
                }
                Err(e @ SessionError::KeyFileMissing(_)) => return Err(e),
                Err(e) => {
                    let waited = start.elapsed();
                    if waited < ceiling {
                        warn!(
                            "Reconnection to {} failed, retrying in {:?}: {}",
                            self.params.address(),
                            poll,
                            e
                        );
                        sleep(poll).await;
                    } else {
                        error!(
                            "Reconnection to {} failed after {:?}. Manual intervention required",
                            self.params.address(),
                            waited
                        );
                        self.close().await;
                        return Err(SessionError::RebootRecoveryFailed {
                            host: self.params.host.clone(),
                            waited_secs: waited.as_secs(),
                        });
                    }
                }
            }
        }
    }

    /// Read a remote file over SFTP; `None` on any failure
    pub async fn read_remote_file(&self, path: &str) -> Option<Vec<u8>> {
        let (connection, _, _) = match self.parts().await {
            Ok(parts) => parts,
            Err(e) => {
                error!("Cannot read {}: {}", path, e);
                return None;
            }
        };

        let mut transfer = match connection.open_file_transfer().await {
            Ok(transfer) => transfer,
            Err(e) => {
                error!(
                    "Failed to open SFTP on {}: {}",
                    self.params.address(),
                    e
                );
                return None;
            }
        };

        info!("Reading file from '{}' on {}", path, self.params.address());
        let contents = match transfer.open_remote(path).await {
            Ok(mut file) => {
                let contents = file.read().await;
                if let Err(e) = file.close().await {
                    debug!("Closing remote file {} failed: {}", path, e);
                }
                contents
            }
            Err(e) => Err(e),
        };

        info!("Closing SFTP connection to {}", self.params.address());
        if let Err(e) = transfer.close().await {
            error!("Error closing SFTP: {}", e);
        }

        match contents {
            Ok(contents) => {
                debug!("Read {} bytes from {}", contents.len(), path);
                Some(contents)
            }
            Err(e) => {
                error!("Failed to read the file {}: {}", path, e);
                None
            }
        }
    }

    /// Ping the host; a positive answer is remembered for the handle's life
    pub async fn check_reachability(&self) -> bool {
        let host = &self.params.host;
        if self.reachable.load(Ordering::SeqCst) {
            info!(
                "Already verified that {} is reachable, skipping the ping test",
                host
            );
            return true;
        }

        let output = match self.probe.probe(host).await {
            Ok(output) => output,
            Err(e) => {
                error!("Ping test error: {}", e);
                return false;
            }
        };

        if !output.stderr.is_empty() {
            error!(
                "Ping test error: {}",
                String::from_utf8_lossy(&output.stderr)
            );
            return false;
        }

        info!(
            "Output of the ping test:\n{}",
            parse(&String::from_utf8_lossy(&output.stdout))
        );

        if !output.success() {
            info!("{} is not reachable", host);
            return false;
        }

        info!("{} is reachable", host);
        self.reachable.store(true, Ordering::SeqCst);
        true
    }

    pub async fn is_connected(&self) -> bool {
        self.link
            .lock()
            .await
            .as_ref()
            .is_some_and(|link| link.is_alive())
    }

    /// Stop the drainer, close the shell and disconnect
    pub async fn close(&self) {
        info!("Closing the connection with {}", self.params.address());
        let link = self.link.lock().await.take();
        if let Some(link) = link {
            link.shutdown().await;
        }
    }

    #[cfg(test)]
    pub(crate) async fn with_link<R>(&self, f: impl FnOnce(Option<&Link>) -> R) -> R {
        f(self.link.lock().await.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::SessionSettings;
    use crate::session::ProbeOutput;
    use crate::ssh::TransportError;
    use crate::testing::{FakeProbe, FakeTransport};

    fn params() -> ConnectionParameters {
        ConnectionParameters::with_password("10.0.0.5", 22, "root", "secret")
    }

    async fn connect_with(
        transport: Arc<FakeTransport>,
        settings: SessionSettings,
        probe: Arc<FakeProbe>,
    ) -> SessionHandle {
        let establisher = Arc::new(ConnectionEstablisher::new(transport, settings));
        SessionHandle::connect(params(), None, establisher, probe)
            .await
            .unwrap()
    }

    async fn connect(transport: Arc<FakeTransport>) -> SessionHandle {
        connect_with(
            transport,
            SessionSettings::default(),
            FakeProbe::new(ProbeOutput::default()),
        )
        .await
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_in_service_writes_eve_enter() {
        let transport = FakeTransport::new();
        let handle = connect(transport.clone()).await;
        let connection = transport.last_connection().unwrap();
        connection.shell.set_reply(b"NAME   READY\r\ncoredns   1/1\r\n");

        let start = Instant::now();
        let output = handle.run_in_service("kube", "get pods").await.unwrap();

        assert_eq!(connection.shell.written_text(), "eve enter kube 'get pods'\n");
        assert_eq!(output, "NAME   READY\ncoredns   1/1\n");
        assert_eq!(start.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_interactive_clears_previous_output() {
        let transport = FakeTransport::new();
        let handle = connect(transport.clone()).await;
        let connection = transport.last_connection().unwrap();

        connection.shell.push(b"login banner\r\n");
        sleep(Duration::from_millis(10)).await;
        assert_eq!(handle.current_output().await.unwrap(), "login banner\n");

        connection.shell.set_reply(b"\x1B[32mok\x1B[0m\r\n");
        let output = handle.run_interactive("echo ok").await.unwrap();
        assert_eq!(output, "ok\n");
        assert_eq!(handle.raw_output().await.unwrap(), b"\x1B[32mok\x1B[0m\r\n");
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_failure_keeps_session() {
        let transport = FakeTransport::new();
        let handle = connect(transport.clone()).await;
        let connection = transport.last_connection().unwrap();
        connection.shell.finish();

        let result = handle.run_interactive("uptime").await;
        assert!(matches!(
            result,
            Err(SessionError::Transport(TransportError::ChannelClosed))
        ));
        assert!(handle.is_connected().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_timeout_keeps_session() {
        let transport = FakeTransport::new();
        let handle = connect(transport.clone()).await;
        let connection = transport.last_connection().unwrap();
        connection.shell.stall_writes();

        let start = tokio::time::Instant::now();
        let result = handle.run_interactive("uptime").await;

        assert!(matches!(result, Err(SessionError::Timeout(_))));
        assert_eq!(start.elapsed(), Duration::from_secs(30));
        assert!(connection.shell.writes().is_empty());
        assert!(handle.is_connected().await);
        assert_eq!(connection.close_calls(), 0);
    }

    #[tokio::test]
    async fn test_run_direct_returns_stdout() {
        let transport = FakeTransport::new();
        let handle = connect(transport.clone()).await;
        let connection = transport.last_connection().unwrap();
        connection.set_exec_stdout("5.10.0\n");

        assert_eq!(handle.run_direct("uname -r").await.unwrap(), "5.10.0\n");
        assert_eq!(connection.execs(), vec!["uname -r".to_string()]);
        assert!(connection.shell.writes().is_empty());
    }

    #[tokio::test]
    async fn test_open_shell_is_idempotent() {
        let transport = FakeTransport::new();
        let handle = connect(transport.clone()).await;

        handle.open_shell().await.unwrap();
        handle.open_shell().await.unwrap();
        assert_eq!(transport.last_connection().unwrap().shells_opened(), 1);
    }

    #[tokio::test]
    async fn test_read_remote_file() {
        let transport = FakeTransport::new();
        let handle = connect(transport.clone()).await;
        let connection = transport.last_connection().unwrap();
        connection.add_file("/persist/status", b"ready\n");

        assert_eq!(
            handle.read_remote_file("/persist/status").await,
            Some(b"ready\n".to_vec())
        );
        assert_eq!(handle.read_remote_file("/persist/missing").await, None);
        assert_eq!(connection.transfers_closed(), 2);
    }

    #[tokio::test]
    async fn test_reachability_is_cached() {
        let probe = FakeProbe::new(ProbeOutput {
            stdout: b"4 packets transmitted, 4 received\n".to_vec(),
            stderr: Vec::new(),
            exit_code: Some(0),
        });
        let handle =
            connect_with(FakeTransport::new(), SessionSettings::default(), probe.clone()).await;

        assert!(handle.check_reachability().await);
        assert!(handle.check_reachability().await);
        assert_eq!(probe.calls(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_host() {
        let failing = FakeProbe::new(ProbeOutput {
            stdout: b"4 packets transmitted, 0 received\n".to_vec(),
            stderr: Vec::new(),
            exit_code: Some(1),
        });
        let handle =
            connect_with(FakeTransport::new(), SessionSettings::default(), failing.clone()).await;
        assert!(!handle.check_reachability().await);
        assert!(!handle.check_reachability().await);
        assert_eq!(failing.calls(), 2);

        let stderr = FakeProbe::new(ProbeOutput {
            stdout: Vec::new(),
            stderr: b"ping: unknown host".to_vec(),
            exit_code: Some(0),
        });
        let handle = connect_with(FakeTransport::new(), SessionSettings::default(), stderr).await;
        assert!(!handle.check_reachability().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hard_reboot_reconnects() {
        let transport = FakeTransport::new();
        let handle = connect(transport.clone()).await;
        let old = transport.last_connection().unwrap();
        transport.fail_next(vec![
            TransportError::Unreachable("rebooting".into()),
            TransportError::Unreachable("rebooting".into()),
            TransportError::Timeout("sshd not up".into()),
        ]);

        let start = Instant::now();
        handle.hard_reboot().await.unwrap();

        assert_eq!(start.elapsed(), Duration::from_secs(15));
        assert_eq!(old.execs(), vec!["reboot".to_string()]);
        assert_eq!(old.close_calls(), 1);
        assert_eq!(transport.attempts(), 5);
        assert_eq!(transport.connections().len(), 2);
        assert!(handle.is_connected().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hard_reboot_gives_up_at_ceiling() {
        let transport = FakeTransport::new();
        let settings = SessionSettings {
            reboot_poll_secs: 5,
            reboot_ceiling_secs: 10,
            ..Default::default()
        };
        let handle =
            connect_with(transport.clone(), settings, FakeProbe::new(ProbeOutput::default())).await;
        transport.last_connection().unwrap().fail_exec();
        transport.fail_next(
            (0..10)
                .map(|_| TransportError::Unreachable("down".into()))
                .collect(),
        );

        let start = Instant::now();
        let result = handle.hard_reboot().await;

        assert!(matches!(
            result,
            Err(SessionError::RebootRecoveryFailed { waited_secs: 10, .. })
        ));
        assert_eq!(start.elapsed(), Duration::from_secs(10));
        assert_eq!(transport.attempts(), 4);
        assert!(!handle.is_connected().await);
    }

    #[tokio::test]
    async fn test_close_tears_down_link() {
        let transport = FakeTransport::new();
        let handle = connect(transport.clone()).await;
        let connection = transport.last_connection().unwrap();

        handle.close().await;
        assert!(!handle.is_connected().await);
        assert_eq!(connection.close_calls(), 1);
        assert_eq!(connection.shell.close_calls(), 1);
        assert!(handle.with_link(|link| link.is_none()).await);
        assert!(matches!(
            handle.run_direct("uptime").await,
            Err(SessionError::NotConnected(_))
        ));
    }
}
