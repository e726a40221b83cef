use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, warn};

use crate::error::DownloadError;

/// Marker suffix appended to the destination filename to form the sidecar
/// path. The sidecar exists iff the last attempt did not complete.
pub const SIDECAR_SUFFIX: &str = "rget-resume";

/// Per-task resume checkpoint, stored as decimal text in a sidecar file next
/// to the destination. The value is only trustworthy at start-of-attempt and
/// at interruption; it is a checkpoint, not a live counter.
pub struct ResumeStore {
    sidecar: PathBuf,
}

impl ResumeStore {
    pub fn for_dest(dest: &Path) -> Self {
        Self {
            sidecar: sidecar_path(dest),
        }
    }

    /// Byte offset the next attempt should start from: the recorded value if
    /// a sidecar exists, otherwise 0. A sidecar we cannot parse counts as a
    /// fresh start rather than an error.
    pub async fn offset(&self) -> u64 {
        match fs::read_to_string(&self.sidecar).await {
            Ok(content) => match content.trim().parse::<u64>() {
                Ok(n) => n,
                Err(_) => {
                    warn!(sidecar = %self.sidecar.display(), "unreadable resume checkpoint, starting over");
                    0
                }
            },
            Err(_) => 0,
        }
    }

    /// Create the empty sidecar that marks an attempt as in flight. Written
    /// right before streaming starts so a crash mid-stream leaves evidence.
    pub async fn mark_active(&self) -> Result<(), DownloadError> {
        fs::write(&self.sidecar, b"").await.map_err(|source| DownloadError::Checkpoint {
            path: self.sidecar.clone(),
            source,
        })
    }

    /// Overwrite the sidecar with the flushed byte count of an interrupted
    /// attempt.
    pub async fn checkpoint(&self, bytes_written: u64) -> Result<(), DownloadError> {
        debug!(sidecar = %self.sidecar.display(), bytes_written, "persisting resume checkpoint");
        fs::write(&self.sidecar, bytes_written.to_string())
            .await
            .map_err(|source| DownloadError::Checkpoint {
                path: self.sidecar.clone(),
                source,
            })
    }

    /// Remove the sidecar. Called exactly once, on successful completion.
    pub async fn clear(&self) -> Result<(), DownloadError> {
        match fs::remove_file(&self.sidecar).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(DownloadError::Checkpoint {
                path: self.sidecar.clone(),
                source,
            }),
        }
    }
}

pub fn sidecar_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".{SIDECAR_SUFFIX}"));
    dest.with_file_name(name)
}
