use std::path::PathBuf;

use crate::error::DownloadError;
use crate::utils::{filename_from_url, sanitize_filename};

/// One URL-to-file download unit, driven end-to-end by a single worker.
#[derive(Clone, Debug)]
pub struct DownloadTask {
    pub url: String,
    pub dest_dir: PathBuf,
    /// Explicit filename override; derived from the URL when absent.
    pub filename: Option<String>,
}

impl DownloadTask {
    pub fn new(url: impl Into<String>, dest_dir: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            dest_dir: dest_dir.into(),
            filename: None,
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    /// Filename this task writes to. Explicit names are taken verbatim,
    /// derived ones are sanitized.
    pub fn filename(&self) -> String {
        match &self.filename {
            Some(name) => name.clone(),
            None => {
                let derived = filename_from_url(&self.url)
                    .unwrap_or_else(|_| format!("download_{}", uuid::Uuid::new_v4()));
                sanitize_filename(&derived)
            }
        }
    }

    pub fn dest_path(&self) -> PathBuf {
        self.dest_dir.join(self.filename())
    }
}

/// Terminal state of one task, reported in submission order.
#[derive(Debug)]
pub enum TaskOutcome {
    /// Stream exhausted normally; sidecar removed.
    Completed { path: PathBuf },
    /// Cancellation or stream failure; checkpoint persisted, resumable later.
    Interrupted { path: PathBuf, resume_at: u64 },
    /// Negotiation-level or destination error; siblings are unaffected.
    Failed(DownloadError),
}

impl TaskOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, TaskOutcome::Completed { .. })
    }
}
