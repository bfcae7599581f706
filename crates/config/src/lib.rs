//! Configuration loading for prism.
//!
//! Configuration is layered with [`figment`]:
//!
//! 1. Serde defaults declared on each struct.
//! 2. A configuration file (TOML, YAML or JSON, detected by extension).
//! 3. `PRISM_`-prefixed environment variables, with `__` separating nested
//!    keys (`PRISM_STORAGE__BUCKET=photos`).
//!
//! ```
//! use figment::{Figment, providers::{Format, Toml}};
//! use prism_config::{Config, StorageConfig};
//!
//! let figment = Figment::from(Toml::string(r#"
//!     [storage]
//!     provider = "github"
//!     owner = "someone"
//!     repo = "photos"
//! "#));
//! let config = Config::from_figment(figment).unwrap();
//! assert!(matches!(config.storage, StorageConfig::Github(_)));
//! assert_eq!(config.options.default_concurrency, 10);
//! ```

pub mod error;
mod storage;

pub use crate::storage::{GitHubConfig, LocalConfig, S3Config, StorageConfig};
use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Toml, Yaml};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "PRISM_";
/// File name searched for in the project root.
pub const DEFAULT_FILE_NAME: &str = "prism.toml";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Config {
    pub storage: StorageConfig,
    #[serde(default)]
    pub options: BuildOptions,
    #[serde(default)]
    pub performance: PerformanceConfig,
}

/// Knobs that shape a single build run.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BuildOptions {
    /// Number of photos processed concurrently by the in-process pool.
    pub default_concurrency: usize,
    /// Soft capacity: exceeding it logs a warning, nothing more. Also sizes
    /// the storage listing cap when `max_objects` is unset, see
    /// [`BuildOptions::listing_limit`].
    pub max_photos: usize,
    /// Pair images with `.mov` siblings of the same name.
    pub enable_live_photo_detection: bool,
}
impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            default_concurrency: 10,
            max_photos: 10_000,
            enable_live_photo_detection: true,
        }
    }
}

impl BuildOptions {
    /// Listing cap derived from `max_photos`: room for a `.mov` companion per
    /// photo, plus one so that going past the soft maximum is still seen.
    pub fn listing_limit(&self) -> usize {
        self.max_photos.saturating_mul(2).saturating_add(1)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    pub worker: WorkerConfig,
}

/// Multi-process execution settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub use_cluster_mode: bool,
    /// Number of worker processes.
    pub worker_count: usize,
    /// Concurrent photos inside each worker process.
    pub worker_concurrency: usize,
}
impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            use_cluster_mode: false,
            worker_count: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4),
            worker_concurrency: 2,
        }
    }
}

impl Config {
    /// Load configuration from `path` if given, otherwise from the first file
    /// found in the search locations (see [`Config::search_paths`]).
    pub fn load(root: impl AsRef<Path>, path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(p) => p.to_path_buf(),
            None => {
                let candidates = Self::search_paths(root.as_ref());
                match candidates.iter().find(|p| p.is_file()) {
                    Some(found) => found.clone(),
                    None => exn::bail!(ErrorKind::NotFound(candidates)),
                }
            },
        };
        tracing::debug!(path = %file.display(), "Loading configuration");
        Self::from_figment(Self::file_figment(&file)?.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Extract a [`Config`] from an already-assembled [`Figment`].
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let mut config: Self = figment.extract().or_raise(|| ErrorKind::Invalid)?;
        config.storage.default_max_objects(config.options.listing_limit());
        Ok(config)
    }

    /// Candidate configuration files, in order of preference.
    pub fn search_paths(root: &Path) -> Vec<PathBuf> {
        let mut paths = vec![root.join(DEFAULT_FILE_NAME)];
        if let Some(dirs) = ProjectDirs::from("", "", "prism") {
            paths.push(dirs.config_dir().join("config.toml"));
        }
        paths
    }

    fn file_figment(path: &Path) -> Result<Figment> {
        let extension = path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase);
        Ok(match extension.as_deref() {
            Some("toml") => Figment::from(Toml::file_exact(path)),
            Some("yaml" | "yml") => Figment::from(Yaml::file_exact(path)),
            Some("json") => Figment::from(Json::file_exact(path)),
            _ => exn::bail!(ErrorKind::UnsupportedFormat(path.to_path_buf())),
        })
    }
}
