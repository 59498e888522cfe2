//! One-shot reachability probe

use async_trait::async_trait;
use tokio::process::Command;

/// Captured result of a probe run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: Option<i32>,
}

impl ProbeOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Checks whether a host answers on the network
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn probe(&self, host: &str) -> std::io::Result<ProbeOutput>;
}

/// Runs `ping -c <count> <host>`
#[derive(Debug, Clone)]
pub struct PingProbe {
    count: u32,
}

impl Default for PingProbe {
    fn default() -> Self {
        Self { count: 4 }
    }
}

impl PingProbe {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReachabilityProbe for PingProbe {
    async fn probe(&self, host: &str) -> std::io::Result<ProbeOutput> {
        let output = Command::new("ping")
            .arg("-c")
            .arg(self.count.to_string())
            .arg(host)
            .kill_on_drop(true)
            .output()
            .await?;

        Ok(ProbeOutput {
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code: output.status.code(),
        })
    }
}
