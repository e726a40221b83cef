use std::path::PathBuf;
use thiserror::Error;

/// Errors a single download task can end with.
///
/// `Connection` is recoverable: the sidecar (if any) is left in place and a
/// later invocation resumes from the recorded offset. `PathConflict` and
/// `Destination` are fatal for the task but never for its siblings.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("failed to open request for '{url}'")]
    Connection {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("destination path '{path}' conflicts with an existing entry")]
    PathConflict { path: PathBuf },

    #[error("destination '{path}' could not be prepared")]
    Destination {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Losing the resume checkpoint defeats the whole design, so this is the
    /// one interruption-path failure that surfaces instead of being absorbed.
    #[error("could not persist resume checkpoint '{path}'")]
    Checkpoint {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
