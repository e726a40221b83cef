use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::fs;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::installer;
use crate::orchestrator::{DownloadOrchestrator, USER_AGENT};
use crate::render::MultiBarRenderer;
use crate::resolver::{ComponentSpec, Resolver};
use crate::task::{DownloadTask, TaskOutcome};

/// Build the task list from positional URLs plus an optional tasks file
/// (one URL per line, `#` comments allowed).
pub async fn collect_tasks(
    urls: &[String],
    tasks_file: Option<&Path>,
    download_dir: &Path,
    filename: Option<&str>,
) -> Result<Vec<DownloadTask>> {
    let mut tasks: Vec<DownloadTask> = urls
        .iter()
        .map(|url| DownloadTask::new(url, download_dir))
        .collect();

    if let Some(path) = tasks_file {
        let file = fs::File::open(path)
            .await
            .with_context(|| format!("failed to open tasks file '{}'", path.display()))?;
        let mut lines = BufReader::new(file).lines();
        while let Some(line) = lines.next_line().await? {
            let url = line.trim();
            if url.is_empty() || url.starts_with('#') {
                continue;
            }
            tasks.push(DownloadTask::new(url, download_dir));
        }
    }

    if let Some(name) = filename {
        if tasks.len() != 1 {
            bail!("--filename requires exactly one URL");
        }
        tasks[0].filename = Some(name.to_string());
    }

    if tasks.is_empty() {
        bail!("nothing to download: pass URLs or --tasks-file");
    }
    Ok(tasks)
}

/// Run the engine over the tasks with the terminal renderer attached and a
/// Ctrl-C hook raising the shared cancellation token.
async fn drive(tasks: Vec<DownloadTask>, tick: Duration) -> Result<Vec<TaskOutcome>> {
    let orchestrator = DownloadOrchestrator::new()?.with_tick(tick);

    let cancel = orchestrator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nCanceling...");
            cancel.cancel();
        }
    });

    let mut renderer = MultiBarRenderer::new();
    let outcomes = orchestrator.run(tasks, &mut renderer).await?;
    renderer.finish();
    Ok(outcomes)
}

fn report(outcomes: &[TaskOutcome]) -> (usize, usize) {
    let mut failed = 0;
    let mut interrupted = 0;
    for outcome in outcomes {
        match outcome {
            TaskOutcome::Completed { path } => {
                println!("Completed   {}", path.display());
            }
            TaskOutcome::Interrupted { path, resume_at } => {
                interrupted += 1;
                println!(
                    "Interrupted {} (resumes at byte {})",
                    path.display(),
                    resume_at
                );
            }
            TaskOutcome::Failed(err) => {
                failed += 1;
                eprintln!("Failed      {err}");
            }
        }
    }
    (failed, interrupted)
}

pub async fn run_downloads(tasks: Vec<DownloadTask>, tick: Duration) -> Result<()> {
    let total = tasks.len();
    let outcomes = drive(tasks, tick).await?;
    let (failed, interrupted) = report(&outcomes);

    let completed = outcomes.iter().filter(|o| o.is_completed()).count();
    println!("{completed}/{total} downloads completed.");
    if interrupted > 0 {
        println!("{interrupted} download(s) unfinished; rerun the same command to resume.");
    }
    if failed > 0 {
        bail!("{failed} of {total} downloads failed");
    }
    Ok(())
}

/// Prepare flow: resolve each configured component to a concrete release,
/// persist the resolved manifest, download everything, then generate the
/// install script. The script is generated even after an interrupted run,
/// since partial downloads stay resumable.
pub async fn prepare(
    config_path: PathBuf,
    template_path: PathBuf,
    dist: PathBuf,
    tick: Duration,
) -> Result<()> {
    let raw = fs::read_to_string(&config_path)
        .await
        .with_context(|| format!("failed to read config '{}'", config_path.display()))?;
    let config: BTreeMap<String, ComponentSpec> =
        serde_json::from_str(&raw).context("invalid prepare config")?;
    if config.is_empty() {
        bail!("prepare config '{}' lists no components", config_path.display());
    }

    println!("Preparing urls ...");
    let client = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .build()
        .context("failed to build http client")?;
    let resolver = Resolver::new(client);

    let mut resolved = BTreeMap::new();
    for (name, spec) in &config {
        let release = resolver
            .resolve(name, spec)
            .await
            .with_context(|| format!("failed to resolve component '{name}'"))?;
        if release.url().is_empty() {
            bail!("pattern for component '{name}' captured no 'url' group");
        }
        println!("  {name} = {} ({})", release.version(), release.url());
        resolved.insert(name.clone(), release);
    }

    fs::create_dir_all(&dist)
        .await
        .with_context(|| format!("failed to create dist directory '{}'", dist.display()))?;
    let manifest = serde_json::to_string_pretty(&resolved)?;
    fs::write(dist.join("manifest.json"), manifest)
        .await
        .context("failed to write resolved manifest")?;

    println!("Start downloading ...");
    let tasks: Vec<DownloadTask> = resolved
        .values()
        .map(|release| DownloadTask::new(release.url(), &dist))
        .collect();
    let outcomes = drive(tasks, tick).await?;
    let (failed, interrupted) = report(&outcomes);

    println!("Generating install.sh ...");
    let names: BTreeMap<String, String> = resolved
        .iter()
        .map(|(name, release)| {
            let filename = DownloadTask::new(release.url(), &dist).filename();
            (name.clone(), filename)
        })
        .collect();
    installer::write_install_script(&dist, &template_path, &names).await?;

    if failed > 0 || interrupted > 0 {
        println!("Done with {failed} failed and {interrupted} unfinished download(s); rerun to resume.");
    } else {
        println!("All done. Run install.sh to set up.");
    }
    Ok(())
}
