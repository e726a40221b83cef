mod commands;
mod error;
mod installer;
mod orchestrator;
mod progress;
mod render;
mod resolver;
mod resume;
mod task;
mod utils;
mod worker;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// URLs to download
    urls: Vec<String>,

    /// Path to a file containing URLs (one per line, # comments allowed)
    #[arg(short = 't', long = "tasks-file")]
    tasks_file: Option<PathBuf>,

    /// Directory to save downloaded files
    #[arg(short = 'd', long = "download-dir", default_value = "downloads")]
    download_dir: PathBuf,

    /// Save under this name instead of the one derived from the URL
    /// (single-URL runs only)
    #[arg(short = 'n', long)]
    filename: Option<String>,

    /// Resolve release listings from the config and download everything
    #[arg(long)]
    prepare: bool,

    /// Component config for --prepare
    #[arg(short = 'c', long, default_value = "config.json")]
    config: PathBuf,

    /// Install-script template for --prepare
    #[arg(long, default_value = "installer_template.sh")]
    template: PathBuf,

    /// Output directory for --prepare
    #[arg(long = "dist-dir", default_value = "dist")]
    dist_dir: PathBuf,

    /// Progress refresh interval in milliseconds
    #[arg(long = "interval", default_value_t = 500)]
    interval_ms: u64,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let tick = std::time::Duration::from_millis(args.interval_ms.max(1));

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        if args.prepare {
            commands::prepare(args.config, args.template, args.dist_dir, tick).await
        } else {
            let tasks = commands::collect_tasks(
                &args.urls,
                args.tasks_file.as_deref(),
                &args.download_dir,
                args.filename.as_deref(),
            )
            .await?;
            commands::run_downloads(tasks, tick).await
        }
    })
}
