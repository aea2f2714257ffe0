//! Proxy configuration file handling
//!
//! The external process reads one JSON file at a fixed path. It is
//! removed and rewritten before every launch; only the supervisor
//! writes it.

use std::path::Path;

use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::{Result, TetherError};
use crate::models::ServerDescriptor;

/// Replace the configuration file at `path` with one for `server`
pub async fn write_artifact(path: &Path, server: &ServerDescriptor) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("Removed previous configuration at {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(TetherError::Artifact(format!(
                "cannot remove {}: {}",
                path.display(),
                e
            )))
        }
    }

    let data = serde_json::to_vec_pretty(server)?;

    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create_new(true);
    // Holds a credential
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options
        .open(path)
        .await
        .map_err(|e| TetherError::Artifact(format!("cannot create {}: {}", path.display(), e)))?;

    file.write_all(&data)
        .await
        .map_err(|e| TetherError::Artifact(format!("cannot write {}: {}", path.display(), e)))?;
    file.flush()
        .await
        .map_err(|e| TetherError::Artifact(format!("cannot flush {}: {}", path.display(), e)))?;

    debug!("Wrote proxy configuration for {} to {}", server, path.display());
    Ok(())
}

/// Load a configuration file back into a descriptor
pub async fn read_artifact(path: &Path) -> Result<ServerDescriptor> {
    let data = tokio::fs::read(path)
        .await
        .map_err(|e| TetherError::Artifact(format!("cannot read {}: {}", path.display(), e)))?;
    Ok(serde_json::from_slice(&data)?)
}
