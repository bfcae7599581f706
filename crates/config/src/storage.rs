//! Storage backend configuration.
//!
//! The `provider` key selects exactly one backend; the remaining keys of the
//! `[storage]` table are specific to that backend.

use serde::Deserialize;
use std::path::PathBuf;

/// Which backend the photos live in, plus the settings needed to reach it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum StorageConfig {
    S3(S3Config),
    #[serde(alias = "git")]
    Github(GitHubConfig),
    Local(LocalConfig),
}
impl StorageConfig {
    /// Discriminator name, as written in the configuration file.
    pub fn provider(&self) -> &'static str {
        match self {
            Self::S3(_) => "s3",
            Self::Github(_) => "github",
            Self::Local(_) => "local",
        }
    }

    /// Configured listing cap, if any.
    pub fn max_objects(&self) -> Option<usize> {
        match self {
            Self::S3(c) => c.max_objects,
            Self::Github(c) => c.max_objects,
            Self::Local(c) => c.max_objects,
        }
    }

    fn max_objects_mut(&mut self) -> &mut Option<usize> {
        match self {
            Self::S3(c) => &mut c.max_objects,
            Self::Github(c) => &mut c.max_objects,
            Self::Local(c) => &mut c.max_objects,
        }
    }

    /// Fill in the listing cap when the configuration leaves it unset.
    pub(crate) fn default_max_objects(&mut self, limit: usize) {
        self.max_objects_mut().get_or_insert(limit);
    }
}

/// S3-compatible object storage (AWS, Backblaze B2, MinIO, R2, ...).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct S3Config {
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint for non-AWS services.
    pub endpoint: Option<String>,
    pub access_key_id: String,
    pub secret_access_key: String,
    /// Key prefix acting as the virtual root of the photo collection.
    pub prefix: Option<String>,
    /// Public URL base used instead of the bucket URL, e.g. a CDN.
    pub custom_domain: Option<String>,
    /// Upper bound on the number of objects returned by a listing.
    pub max_objects: Option<usize>,
}

/// A Git repository hosted on GitHub.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GitHubConfig {
    pub owner: String,
    pub repo: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    /// Directory inside the repository holding the photos.
    pub path: Option<String>,
    /// Personal access token; anonymous requests are heavily rate limited.
    pub token: Option<String>,
    /// Link to `raw.githubusercontent.com` rather than the web view.
    #[serde(default = "default_true")]
    pub use_raw_url: bool,
    pub custom_domain: Option<String>,
    pub max_objects: Option<usize>,
}

/// A directory on the local filesystem.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LocalConfig {
    pub root: PathBuf,
    /// Public URL base the directory is served from.
    pub base_url: Option<String>,
    pub max_objects: Option<usize>,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_true() -> bool {
    true
}
