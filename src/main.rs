mod cli;
mod error;

use crate::cli::{BuildArgs, Cli, Command};
use crate::error::{ErrorKind, Result};
use clap::Parser;
use exn::ResultExt;
use prism_builder::{Builder, Processor, RunFlags, Scheduler, thumbnail_store, worker};
use prism_config::{BuildOptions, Config};
use prism_imaging::{ImageCodec, StandardCodec};
use prism_pool::ClusterPool;
use prism_storage::StorageManager;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = ?e, "Fatal error");
            ExitCode::FAILURE
        },
    }
}

/// Logs go to stderr: a worker's stdout carries its replies.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let Cli { root, config: config_path, command } = cli;
    let config = Config::load(&root, config_path.as_deref()).or_raise(|| ErrorKind::Config)?;
    let storage = StorageManager::from_config(&config.storage).or_raise(|| ErrorKind::Storage)?;
    let codec: Arc<dyn ImageCodec> = Arc::new(StandardCodec::default());
    match command {
        Command::Build(args) => {
            let scheduler = scheduler(&config, &args, &root, config_path.as_deref())?;
            let options = BuildOptions {
                default_concurrency: args.concurrency.unwrap_or(config.options.default_concurrency),
                ..config.options
            };
            Builder::new(storage.handle(), codec, root)
                .with_options(options)
                .with_scheduler(scheduler)
                .build(args.flags())
                .await
                .or_raise(|| ErrorKind::Build)?;
            Ok(())
        },
        Command::Worker => {
            let thumbnails = thumbnail_store(&root, codec.as_ref());
            let processor = Processor::new(storage.handle(), codec, thumbnails, RunFlags::from_env());
            worker::serve(processor).await.or_raise(|| ErrorKind::Worker)
        },
    }
}

/// Command-line options win over the configuration file.
fn scheduler(config: &Config, args: &BuildArgs, root: &Path, config_path: Option<&Path>) -> Result<Scheduler> {
    let worker = &config.performance.worker;
    if !(args.cluster || worker.use_cluster_mode) {
        return Ok(Scheduler::Local {
            concurrency: args.concurrency.unwrap_or(config.options.default_concurrency),
        });
    }
    let program = std::env::current_exe().or_raise(|| ErrorKind::Worker)?;
    let pool = ClusterPool::new(program)
        .args(worker_args(root, config_path))
        .with_workers(args.workers.unwrap_or(worker.worker_count))
        .with_worker_concurrency(args.worker_concurrency.unwrap_or(worker.worker_concurrency));
    tracing::info!(workers = pool.workers(), concurrency = pool.worker_concurrency(), "Using worker processes");
    Ok(Scheduler::Cluster(pool))
}

/// Arguments that make a child process serve the same project.
fn worker_args(root: &Path, config_path: Option<&Path>) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["--root".into(), absolute(root).into()];
    if let Some(path) = config_path {
        args.extend(["--config".into(), absolute(path).into()]);
    }
    args.push("worker".into());
    args
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}
