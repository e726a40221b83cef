use std::io::{self, SeekFrom};
use std::sync::Arc;

use futures::TryStreamExt;
use reqwest::{header, Client};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::DownloadError;
use crate::progress::TaskProgress;
use crate::resume::ResumeStore;
use crate::task::{DownloadTask, TaskOutcome};

/// Read size per iteration. Small enough to keep resume granularity and
/// cancellation latency tight, large enough to avoid pathological loop
/// counts.
pub const CHUNK_SIZE: usize = 2048;

/// Drive one task end-to-end: negotiate the byte range, stream to disk,
/// checkpoint on interruption, clean up on success. Never panics the run;
/// every exit becomes a `TaskOutcome`.
pub async fn run_task(
    client: Client,
    task: DownloadTask,
    progress: Arc<TaskProgress>,
    cancel: CancellationToken,
) -> TaskOutcome {
    let dest = task.dest_path();
    match download(&client, &task, &progress, &cancel).await {
        Ok(StreamEnd::Finished) => TaskOutcome::Completed { path: dest },
        Ok(StreamEnd::Stopped { resume_at }) => TaskOutcome::Interrupted {
            path: dest,
            resume_at,
        },
        Err(err) => {
            warn!(url = %task.url, error = %err, "download failed");
            TaskOutcome::Failed(err)
        }
    }
}

enum StreamEnd {
    Finished,
    Stopped { resume_at: u64 },
}

async fn download(
    client: &Client,
    task: &DownloadTask,
    progress: &TaskProgress,
    cancel: &CancellationToken,
) -> Result<StreamEnd, DownloadError> {
    let dest = task.dest_path();

    if let Ok(meta) = fs::metadata(&dest).await {
        if !meta.is_file() {
            return Err(DownloadError::PathConflict { path: dest });
        }
    }

    let store = ResumeStore::for_dest(&dest);
    let offset = store.offset().await;

    // Negotiating: one GET per task, range request from the checkpoint.
    let response = client
        .get(&task.url)
        .header(header::RANGE, format!("bytes={}-", offset))
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|source| DownloadError::Connection {
            url: task.url.clone(),
            source,
        })?;

    // A response without content-range means the server ignored the range
    // request: restart from zero, total size comes from content-length.
    let (offset, total) = match response.headers().get(header::CONTENT_RANGE) {
        Some(value) => (offset, total_from_content_range(value)),
        None => (0, response.content_length().unwrap_or(0)),
    };
    debug!(url = %task.url, offset, total, "range negotiated");

    let mut file = open_dest(&dest).await?;
    let on_disk = file
        .metadata()
        .await
        .map_err(|source| DownloadError::Destination {
            path: dest.clone(),
            source,
        })?
        .len();

    progress.set_total(total);

    // Fresh attempt against an already-complete file: report 100% and stop
    // without streaming or creating a sidecar. A stale sidecar that parsed
    // to offset 0 is removed so it cannot outlive a completed task.
    if offset == 0 && total > 0 && on_disk == total {
        progress.resume_from(total);
        store.clear().await?;
        debug!(dest = %dest.display(), "destination already complete");
        return Ok(StreamEnd::Finished);
    }

    progress.resume_from(offset);

    // Streaming: drop any bytes beyond the checkpoint from a prior partial
    // write, then leave the empty sidecar as a crash marker.
    truncate_to(&mut file, offset, &dest).await?;
    store.mark_active().await?;

    let stream = response.bytes_stream().map_err(io::Error::other);
    let mut reader = StreamReader::new(stream);
    let mut buf = vec![0u8; CHUNK_SIZE];
    // Only ever advanced past a successful flush, so a checkpoint written
    // from it is exact, never an estimate.
    let mut written = offset;

    let finished = loop {
        if cancel.is_cancelled() {
            debug!(dest = %dest.display(), "cancellation observed, stopping stream");
            break false;
        }
        match reader.read(&mut buf).await {
            Ok(0) => break true,
            Ok(n) => {
                if let Err(e) = write_chunk(&mut file, &buf[..n]).await {
                    warn!(dest = %dest.display(), error = %e, "write failed mid-transfer");
                    break false;
                }
                written += n as u64;
                progress.record(n as u64);
            }
            Err(e) => {
                warn!(url = %task.url, error = %e, "stream broke mid-transfer");
                break false;
            }
        }
    };

    if finished {
        store.clear().await?;
        debug!(dest = %dest.display(), written, "download complete");
        Ok(StreamEnd::Finished)
    } else {
        store.checkpoint(written).await?;
        Ok(StreamEnd::Stopped { resume_at: written })
    }
}

async fn open_dest(dest: &std::path::Path) -> Result<File, DownloadError> {
    OpenOptions::new()
        .create(true)
        .write(true)
        .read(true)
        .open(dest)
        .await
        .map_err(|source| DownloadError::Destination {
            path: dest.to_path_buf(),
            source,
        })
}

async fn truncate_to(file: &mut File, offset: u64, dest: &std::path::Path) -> Result<(), DownloadError> {
    file.set_len(offset)
        .await
        .map_err(|source| DownloadError::Destination {
            path: dest.to_path_buf(),
            source,
        })?;
    file.seek(SeekFrom::Start(offset))
        .await
        .map_err(|source| DownloadError::Destination {
            path: dest.to_path_buf(),
            source,
        })?;
    Ok(())
}

async fn write_chunk(file: &mut File, chunk: &[u8]) -> io::Result<()> {
    file.write_all(chunk).await?;
    // Flush before counting: the byte counters must never get ahead of what
    // is actually on disk.
    file.flush().await
}

fn total_from_content_range(value: &header::HeaderValue) -> u64 {
    value
        .to_str()
        .ok()
        .and_then(|v| v.rsplit('/').next())
        .and_then(|total| total.parse().ok())
        .unwrap_or(0)
}
