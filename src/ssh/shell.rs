//! Interactive shell channel over russh
//!
//! A pump task owns the `Channel<Msg>`: it forwards queued writes to the
//! server and parks incoming data in a pending queue that readers drain
//! through the [`ShellChannel`] trait.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use russh::client::Msg;
use russh::{Channel, ChannelMsg};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, error, info};

use super::error::TransportError;
use super::transport::ShellChannel;

enum ShellCommand {
    Data(Vec<u8>),
    Close,
}

#[derive(Default)]
struct ShellState {
    pending: Mutex<VecDeque<u8>>,
    closed: AtomicBool,
    notify: Notify,
}

impl ShellState {
    fn push(&self, data: &[u8]) {
        self.pending.lock().extend(data);
        self.notify.notify_one();
    }

    fn mark_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }
}

/// [`ShellChannel`] backed by a russh session channel with a PTY
pub struct RusshShellChannel {
    state: Arc<ShellState>,
    cmd_tx: mpsc::Sender<ShellCommand>,
}

impl RusshShellChannel {
    /// Take ownership of an open shell channel and start its pump task
    pub fn spawn(mut channel: Channel<Msg>, label: String) -> Self {
        let state = Arc::new(ShellState::default());
        let (cmd_tx, mut cmd_rx) = mpsc::channel::<ShellCommand>(256);

        let pump_state = state.clone();
        tokio::spawn(async move {
            debug!("Shell pump started for {}", label);

            loop {
                tokio::select! {
                    Some(cmd) = cmd_rx.recv() => {
                        match cmd {
                            ShellCommand::Data(data) => {
                                if let Err(e) = channel.data(&data[..]).await {
                                    error!("Failed to send data to shell on {}: {}", label, e);
                                    break;
                                }
                            }
                            ShellCommand::Close => {
                                debug!("Close requested for shell on {}", label);
                                let _ = channel.eof().await;
                                break;
                            }
                        }
                    }

                    Some(msg) = channel.wait() => {
                        match msg {
                            ChannelMsg::Data { data } => pump_state.push(&data),
                            // stderr shares the terminal stream
                            ChannelMsg::ExtendedData { data, ext } if ext == 1 => {
                                pump_state.push(&data)
                            }
                            ChannelMsg::Eof | ChannelMsg::Close => {
                                info!("Shell channel closed by {}", label);
                                break;
                            }
                            ChannelMsg::ExitStatus { exit_status } => {
                                info!("Shell on {} exited with status {}", label, exit_status);
                            }
                            _ => {}
                        }
                    }

                    else => break,
                }
            }

            pump_state.mark_closed();
            debug!("Shell pump terminated for {}", label);
        });

        Self { state, cmd_tx }
    }
}

#[async_trait]
impl ShellChannel for RusshShellChannel {
    fn data_ready(&self) -> bool {
        !self.state.pending.lock().is_empty()
    }

    async fn readable(&self) -> bool {
        loop {
            let notified = self.state.notify.notified();
            if self.data_ready() {
                return true;
            }
            if self.state.closed.load(Ordering::SeqCst) {
                return false;
            }
            notified.await;
        }
    }

    async fn read(&self, max_bytes: usize) -> Result<Vec<u8>, TransportError> {
        let mut pending = self.state.pending.lock();
        if pending.is_empty() && self.state.closed.load(Ordering::SeqCst) {
            return Err(TransportError::ChannelClosed);
        }
        let take = pending.len().min(max_bytes);
        Ok(pending.drain(..take).collect())
    }

    async fn write(&self, data: &[u8]) -> Result<(), TransportError> {
        self.cmd_tx
            .send(ShellCommand::Data(data.to_vec()))
            .await
            .map_err(|_| TransportError::ChannelClosed)
    }

    async fn close(&self) {
        let _ = self.cmd_tx.try_send(ShellCommand::Close);
    }
}
