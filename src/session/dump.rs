//! Output dump

use std::path::{Path, PathBuf};

use tracing::{error, info};

use crate::error::SessionError;

/// File name of the dump inside the target directory
pub const OUTPUT_FILE: &str = "output.txt";

/// Write `output` to `<dir>/output.txt`, replacing any previous dump
pub async fn dump_output(dir: &Path, output: &str) -> Result<PathBuf, SessionError> {
    let path = dir.join(OUTPUT_FILE);
    let written = async {
        tokio::fs::create_dir_all(dir).await?;
        tokio::fs::write(&path, output.as_bytes()).await
    }
    .await;

    if let Err(e) = written {
        error!("Failed to write command output to {}: {}", path.display(), e);
        return Err(e.into());
    }
    info!("Command output written to {}", path.display());
    Ok(path)
}
