use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::Client;
use tokio::fs;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::progress::{ProgressAggregator, ProgressSink, TaskProgress};
use crate::task::{DownloadTask, TaskOutcome};
use crate::worker;

pub const USER_AGENT: &str = concat!("rget/", env!("CARGO_PKG_VERSION"));

/// Aggregation/render cadence. The rendered view may lag the true state by
/// up to one tick; that staleness is accepted.
pub const TICK_INTERVAL: Duration = Duration::from_millis(500);

/// Owns the worker set, the shared cancellation token and the render loop.
pub struct DownloadOrchestrator {
    client: Client,
    cancel: CancellationToken,
    tick: Duration,
}

impl DownloadOrchestrator {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(10))
            // Target hosts are pre-trusted by the caller; certificate
            // validation is intentionally disabled for this engine's
            // requests. Do not re-enable without flagging it to operators.
            .danger_accept_invalid_certs(true)
            .build()
            .context("failed to build http client")?;

        Ok(Self {
            client,
            cancel: CancellationToken::new(),
            tick: TICK_INTERVAL,
        })
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Handle for the external interrupt hook; raising it stops every worker
    /// cooperatively within one chunk read.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run every task concurrently and return one outcome per task, in
    /// submission order. Per-task errors never abort siblings; only an
    /// unusable destination root fails the whole run.
    pub async fn run(
        &self,
        tasks: Vec<DownloadTask>,
        sink: &mut dyn ProgressSink,
    ) -> Result<Vec<TaskOutcome>> {
        self.ensure_dest_dirs(&tasks).await?;

        let progress: Vec<Arc<TaskProgress>> = tasks
            .iter()
            .map(|t| Arc::new(TaskProgress::new(t.filename())))
            .collect();
        let aggregator = ProgressAggregator::new(progress.clone(), self.tick);

        info!(tasks = tasks.len(), "starting download run");
        let mut handles: Vec<Option<JoinHandle<TaskOutcome>>> = tasks
            .into_iter()
            .zip(progress)
            .map(|(task, progress)| {
                Some(tokio::spawn(worker::run_task(
                    self.client.clone(),
                    task,
                    progress,
                    self.cancel.clone(),
                )))
            })
            .collect();
        let mut outcomes: Vec<Option<TaskOutcome>> = handles.iter().map(|_| None).collect();

        // sleep one tick, reap finished workers, hand a snapshot to the
        // renderer; repeat until every worker reached a terminal state.
        while handles.iter().any(Option::is_some) {
            tokio::time::sleep(self.tick).await;
            for (slot, outcome) in handles.iter_mut().zip(outcomes.iter_mut()) {
                if slot.as_ref().is_some_and(JoinHandle::is_finished) {
                    if let Some(handle) = slot.take() {
                        *outcome = Some(handle.await.context("download worker panicked")?);
                    }
                }
            }
            sink.render(&aggregator.snapshot());
        }

        Ok(outcomes.into_iter().flatten().collect())
    }

    async fn ensure_dest_dirs(&self, tasks: &[DownloadTask]) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for task in tasks {
            if !seen.insert(task.dest_dir.clone()) {
                continue;
            }
            match fs::metadata(&task.dest_dir).await {
                Ok(meta) if !meta.is_dir() => {
                    bail!(
                        "destination '{}' already exists and is not a directory",
                        task.dest_dir.display()
                    );
                }
                Ok(_) => {}
                Err(_) => {
                    fs::create_dir_all(&task.dest_dir).await.with_context(|| {
                        format!("failed to create destination '{}'", task.dest_dir.display())
                    })?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DownloadError;
    use crate::progress::ProgressSnapshot;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Default)]
    struct CaptureSink {
        snapshots: Vec<ProgressSnapshot>,
    }

    impl ProgressSink for CaptureSink {
        fn render(&mut self, snapshot: &ProgressSnapshot) {
            self.snapshots.push(snapshot.clone());
        }
    }

    fn orchestrator() -> DownloadOrchestrator {
        DownloadOrchestrator::new()
            .unwrap()
            .with_tick(Duration::from_millis(10))
    }

    async fn mount_file(server: &MockServer, name: &str, body: Vec<u8>) {
        Mock::given(method("GET"))
            .and(path(format!("/{name}")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn one_failing_task_leaves_its_siblings_alone() {
        let payload = vec![3u8; 50_000];
        let server = MockServer::start().await;
        mount_file(&server, "good.bin", payload.clone()).await;

        let dir = tempfile::tempdir().unwrap();
        let tasks = vec![
            DownloadTask::new(format!("{}/good.bin", server.uri()), dir.path()),
            DownloadTask::new("http://127.0.0.1:9/bad.bin", dir.path()),
        ];

        let mut sink = CaptureSink::default();
        let outcomes = orchestrator().run(tasks, &mut sink).await.unwrap();

        assert!(outcomes[0].is_completed());
        assert!(matches!(
            outcomes[1],
            TaskOutcome::Failed(DownloadError::Connection { .. })
        ));
        assert_eq!(std::fs::read(dir.path().join("good.bin")).unwrap(), payload);
        assert!(!dir.path().join("good.bin.rget-resume").exists());
        assert!(!dir.path().join("bad.bin.rget-resume").exists());
    }

    #[tokio::test]
    async fn percent_never_decreases_and_ends_at_100() {
        let server = MockServer::start().await;
        mount_file(&server, "file.bin", vec![1u8; 200_000]).await;

        let dir = tempfile::tempdir().unwrap();
        let tasks = vec![DownloadTask::new(format!("{}/file.bin", server.uri()), dir.path())];

        let mut sink = CaptureSink::default();
        let outcomes = orchestrator().run(tasks, &mut sink).await.unwrap();
        assert!(outcomes[0].is_completed());

        let percents: Vec<u64> = sink
            .snapshots
            .iter()
            .map(|s| s.rows[0].percent)
            .collect();
        assert!(!percents.is_empty());
        assert!(percents.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*percents.last().unwrap(), 100);
    }

    #[tokio::test]
    async fn snapshot_rows_stay_in_submission_order() {
        let server = MockServer::start().await;
        mount_file(&server, "b.bin", vec![2u8; 10_000]).await;
        mount_file(&server, "a.bin", vec![1u8; 10_000]).await;

        let dir = tempfile::tempdir().unwrap();
        let tasks = vec![
            DownloadTask::new(format!("{}/b.bin", server.uri()), dir.path()),
            DownloadTask::new(format!("{}/a.bin", server.uri()), dir.path()),
        ];

        let mut sink = CaptureSink::default();
        orchestrator().run(tasks, &mut sink).await.unwrap();

        for snapshot in &sink.snapshots {
            assert_eq!(snapshot.rows[0].filename, "b.bin");
            assert_eq!(snapshot.rows[1].filename, "a.bin");
        }
    }

    #[tokio::test]
    async fn cancelled_run_leaves_resumable_state_for_every_task() {
        let server = MockServer::start().await;
        mount_file(&server, "a.bin", vec![1u8; 100_000]).await;
        mount_file(&server, "b.bin", vec![2u8; 100_000]).await;

        let dir = tempfile::tempdir().unwrap();
        let tasks = vec![
            DownloadTask::new(format!("{}/a.bin", server.uri()), dir.path()),
            DownloadTask::new(format!("{}/b.bin", server.uri()), dir.path()),
        ];

        let orch = orchestrator();
        // operator abort before any chunk is consumed
        orch.cancellation_token().cancel();

        let mut sink = CaptureSink::default();
        let outcomes = orch.run(tasks, &mut sink).await.unwrap();

        for (outcome, name) in outcomes.iter().zip(["a.bin", "b.bin"]) {
            match outcome {
                TaskOutcome::Interrupted { resume_at, .. } => {
                    let sidecar = dir.path().join(format!("{name}.rget-resume"));
                    let recorded: u64 = std::fs::read_to_string(sidecar)
                        .unwrap()
                        .trim()
                        .parse()
                        .unwrap();
                    assert_eq!(recorded, *resume_at);
                    // partial payload is kept, never deleted
                    let on_disk = std::fs::metadata(dir.path().join(name)).unwrap().len();
                    assert_eq!(on_disk, *resume_at);
                }
                other => panic!("expected interruption, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn destination_root_that_is_a_file_fails_the_whole_run() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("not-a-dir");
        std::fs::write(&root, "occupied").unwrap();

        let tasks = vec![DownloadTask::new("http://127.0.0.1:9/x.bin", &root)];
        let mut sink = CaptureSink::default();
        let err = orchestrator().run(tasks, &mut sink).await.unwrap_err();
        assert!(err.to_string().contains("not a directory"));
    }

    #[tokio::test]
    async fn missing_destination_root_is_created_once() {
        let server = MockServer::start().await;
        mount_file(&server, "file.bin", vec![9u8; 1000]).await;

        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("nested").join("dl");
        let tasks = vec![DownloadTask::new(format!("{}/file.bin", server.uri()), &root)];

        let mut sink = CaptureSink::default();
        let outcomes = orchestrator().run(tasks, &mut sink).await.unwrap();
        assert!(outcomes[0].is_completed());
        assert!(root.join("file.bin").exists());
    }
}
