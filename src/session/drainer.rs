//! Background shell reader
//!
//! Drains an interactive shell channel into [`OutputBuffers`] for as long as
//! the channel stays open. Commands are written to the channel directly and
//! never wait on the drainer.

use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

use super::buffer::OutputBuffers;
use crate::ssh::{ShellChannel, TransportError};

/// Bytes requested per read
pub const CHUNK_SIZE: usize = 1024;

/// Handle to a running drainer task
pub struct StreamDrainer {
    stop_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl StreamDrainer {
    /// Start draining `channel` into `buffers`
    pub fn spawn(
        channel: Arc<dyn ShellChannel>,
        buffers: Arc<OutputBuffers>,
        label: String,
    ) -> Self {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            debug!("Stream drainer started for {}", label);

            loop {
                tokio::select! {
                    _ = &mut stop_rx => {
                        debug!("Stream drainer stopped for {}", label);
                        break;
                    }

                    ready = channel.readable() => {
                        if !ready {
                            debug!("Shell channel for {} closed, drainer exiting", label);
                            break;
                        }
                        if let Err(e) = drain_ready(channel.as_ref(), &buffers).await {
                            debug!("Shell channel for {} went away: {}", label, e);
                            break;
                        }
                    }
                }
            }
        });

        Self {
            stop_tx: Some(stop_tx),
            task: Some(task),
        }
    }

    /// Signal the task to stop and wait for it to finish
    pub async fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

/// Read every chunk that is ready right now
async fn drain_ready(
    channel: &dyn ShellChannel,
    buffers: &OutputBuffers,
) -> Result<usize, TransportError> {
    let mut total = 0;
    while channel.data_ready() {
        let chunk = channel.read(CHUNK_SIZE).await?;
        if chunk.is_empty() {
            break;
        }
        total += chunk.len();
        buffers.append(&chunk);
    }
    Ok(total)
}
