use clap::{Args, Parser, Subcommand};
use prism_builder::RunFlags;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "prism", version, about = "Build a photo gallery manifest from object storage", long_about = None)]
pub struct Cli {
    /// Project root; the manifest and previews are written below it.
    #[arg(long, global = true, default_value = ".")]
    pub root: PathBuf,
    /// Configuration file. Defaults to `prism.toml` in the project root.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Build or update the photo manifest.
    Build(BuildArgs),
    /// Serve one batch for a parent `build` over stdin/stdout.
    #[command(hide = true)]
    Worker,
}

#[derive(Debug, Args)]
pub struct BuildArgs {
    /// Ignore the existing manifest and regenerate everything.
    #[arg(long)]
    pub force: bool,
    /// Recompute every manifest entry, reusing existing previews.
    #[arg(long)]
    pub force_manifest: bool,
    /// Regenerate previews.
    #[arg(long)]
    pub force_thumbnails: bool,
    /// Photos processed concurrently (in-process scheduler).
    #[arg(long)]
    pub concurrency: Option<usize>,
    /// Spread processing over worker processes.
    #[arg(long)]
    pub cluster: bool,
    /// Number of worker processes.
    #[arg(long, requires = "cluster")]
    pub workers: Option<usize>,
    /// Photos processed concurrently inside each worker process.
    #[arg(long, requires = "cluster")]
    pub worker_concurrency: Option<usize>,
}

impl BuildArgs {
    pub fn flags(&self) -> RunFlags {
        RunFlags {
            force: self.force,
            force_manifest: self.force_manifest,
            force_thumbnails: self.force_thumbnails,
        }
    }
}
