//! GitHub repository storage provider.
//!
//! Photos committed to a repository are listed through the git trees API
//! (one recursive request per listing) and fetched through the contents API.
//! Git records no per-file modification time, so listed objects carry
//! `last_modified: None` and the blob SHA as their etag.

use crate::backend::{DEFAULT_LIST_LIMIT, ObjectStream, join_url};
use crate::error::{ErrorKind, Result};
use crate::path::{check as check_key, normalize_prefix};
use crate::{StorageObject, StorageProvider};
use async_stream::stream;
use async_trait::async_trait;
use exn::ResultExt;
use prism_config::GitHubConfig;
use reqwest::{Client, Response, StatusCode, header};
use serde::Deserialize;
use std::time::Duration;

const API_BASE: &str = "https://api.github.com";
const USER_AGENT: &str = concat!("prism/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Deserialize)]
struct TreeResponse {
    tree: Vec<TreeEntry>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Debug, Deserialize)]
struct TreeEntry {
    path: String,
    #[serde(rename = "type")]
    kind: String,
    size: Option<u64>,
    sha: String,
}

/// Storage provider backed by a GitHub repository.
///
/// Anonymous requests are subject to a low hourly quota; configure a token
/// for anything but tiny collections. Quota exhaustion surfaces as
/// [`RateLimited`](ErrorKind::RateLimited), never as a panic.
#[derive(Debug, Clone)]
pub struct GitHubProvider {
    name: String,
    client: Client,
    owner: String,
    repo: String,
    branch: String,
    base_path: Option<String>,
    token: Option<String>,
    use_raw_url: bool,
    custom_domain: Option<String>,
    list_limit: usize,
}

impl GitHubProvider {
    pub fn new(name: impl Into<String>, config: &GitHubConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .user_agent(USER_AGENT)
            .build()
            .or_raise(|| ErrorKind::Configuration("failed to build HTTP client".to_string()))?;
        Ok(Self {
            name: name.into(),
            client,
            owner: config.owner.clone(),
            repo: config.repo.clone(),
            branch: config.branch.clone(),
            base_path: normalize_prefix(config.path.as_deref())?,
            token: config.token.clone(),
            use_raw_url: config.use_raw_url,
            custom_domain: config.custom_domain.clone(),
            list_limit: config.max_objects.unwrap_or(DEFAULT_LIST_LIMIT),
        })
    }

    fn get(&self, url: &str, accept: &'static str) -> reqwest::RequestBuilder {
        let request = self
            .client
            .get(url)
            .header(header::ACCEPT, accept)
            .header("X-GitHub-Api-Version", "2022-11-28");
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn fetch_tree(&self) -> Result<TreeResponse> {
        let url = format!(
            "{API_BASE}/repos/{}/{}/git/trees/{}?recursive=1",
            self.owner,
            self.repo,
            urlencoding::encode(&self.branch)
        );
        let response = self.get(&url, "application/vnd.github+json").send().await.map_err(transport_error)?;
        let body = check_status(response, &self.branch).await?.bytes().await.map_err(transport_error)?;
        parse_tree(&body)
    }
}

fn transport_error(e: reqwest::Error) -> ErrorKind {
    ErrorKind::Network(e.to_string())
}

/// Translate HTTP status codes into actionable error kinds.
async fn check_status(response: Response, what: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let remaining = response
        .headers()
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    match status {
        StatusCode::NOT_FOUND => exn::bail!(ErrorKind::NotFound(what.to_string())),
        StatusCode::TOO_MANY_REQUESTS => exn::bail!(ErrorKind::RateLimited(what.to_string())),
        StatusCode::FORBIDDEN if remaining.as_deref() == Some("0") => {
            exn::bail!(ErrorKind::RateLimited(what.to_string()))
        },
        StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => exn::bail!(ErrorKind::PermissionDenied(what.to_string())),
        _ => exn::bail!(ErrorKind::BackendError(format!("GitHub responded {status} for {what}"))),
    }
}

fn parse_tree(body: &[u8]) -> Result<TreeResponse> {
    serde_json::from_slice(body).or_raise(|| ErrorKind::BackendError("malformed git tree response".to_string()))
}

/// Blobs under `base_path`, keyed by their full repository path.
fn tree_objects(tree: TreeResponse, base_path: Option<&str>) -> Vec<StorageObject> {
    tree.tree
        .into_iter()
        .filter(|entry| entry.kind == "blob")
        .filter(|entry| match base_path {
            Some(base) => entry.path.strip_prefix(base).is_some_and(|rest| rest.starts_with('/')),
            None => true,
        })
        .map(|entry| StorageObject {
            key: entry.path,
            size: entry.size,
            last_modified: None,
            etag: Some(entry.sha),
        })
        .collect()
}

fn public_url(
    custom_domain: Option<&str>,
    use_raw_url: bool,
    owner: &str,
    repo: &str,
    branch: &str,
    key: &str,
) -> String {
    match (custom_domain, use_raw_url) {
        (Some(domain), _) => join_url(domain, key),
        (None, true) => join_url(&format!("https://raw.githubusercontent.com/{owner}/{repo}/{branch}"), key),
        (None, false) => format!("{}?raw=true", join_url(&format!("https://github.com/{owner}/{repo}/blob/{branch}"), key)),
    }
}

#[async_trait]
impl StorageProvider for GitHubProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn prefix(&self) -> Option<&str> {
        self.base_path.as_deref()
    }

    fn list_limit(&self) -> usize {
        self.list_limit
    }

    fn list_stream(&self) -> ObjectStream<'_> {
        Box::pin(stream! {
            let tree = match self.fetch_tree().await {
                Ok(tree) => tree,
                Err(e) => {
                    yield Err(e);
                    return;
                },
            };
            if tree.truncated {
                tracing::warn!(owner = %self.owner, repo = %self.repo, "Git tree listing was truncated by GitHub");
            }
            for object in tree_objects(tree, self.base_path.as_deref()) {
                yield Ok(object);
            }
        })
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>> {
        let key = check_key(key)?;
        let url = format!(
            "{}?ref={}",
            join_url(&format!("{API_BASE}/repos/{}/{}/contents", self.owner, self.repo), &key),
            urlencoding::encode(&self.branch)
        );
        let response = self.get(&url, "application/vnd.github.raw+json").send().await.map_err(transport_error)?;
        let body = check_status(response, &key).await?.bytes().await.map_err(transport_error)?;
        Ok(body.to_vec())
    }

    fn generate_public_url(&self, key: &str) -> String {
        public_url(self.custom_domain.as_deref(), self.use_raw_url, &self.owner, &self.repo, &self.branch, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const TREE: &str = r#"{
        "sha": "abc",
        "url": "https://api.github.com/repos/o/r/git/trees/abc",
        "tree": [
            {"path": "README.md", "mode": "100644", "type": "blob", "sha": "1", "size": 10},
            {"path": "photos", "mode": "040000", "type": "tree", "sha": "2"},
            {"path": "photos/a.jpg", "mode": "100644", "type": "blob", "sha": "3", "size": 2048},
            {"path": "photos/trip/b.heic", "mode": "100644", "type": "blob", "sha": "4", "size": 4096},
            {"path": "photos-old/c.jpg", "mode": "100644", "type": "blob", "sha": "5", "size": 1}
        ],
        "truncated": false
    }"#;

    #[test]
    fn test_tree_filtered_by_base_path() {
        let objects = tree_objects(parse_tree(TREE.as_bytes()).unwrap(), Some("photos"));
        let keys: Vec<_> = objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, ["photos/a.jpg", "photos/trip/b.heic"]);
        assert_eq!(objects[0].size, Some(2048));
        assert_eq!(objects[0].etag.as_deref(), Some("3"));
        assert!(objects[0].last_modified.is_none());
    }

    #[test]
    fn test_tree_without_base_path() {
        let objects = tree_objects(parse_tree(TREE.as_bytes()).unwrap(), None);
        assert_eq!(objects.len(), 4);
    }

    #[test]
    fn test_malformed_tree() {
        let err = parse_tree(b"{\"message\": \"Bad credentials\"}").unwrap_err();
        assert!(matches!(&*err, ErrorKind::BackendError(_)));
    }

    #[rstest]
    #[case(None, true, "https://raw.githubusercontent.com/me/pics/main/photos/a%20b.jpg")]
    #[case(None, false, "https://github.com/me/pics/blob/main/photos/a%20b.jpg?raw=true")]
    #[case(Some("https://img.example.com"), true, "https://img.example.com/photos/a%20b.jpg")]
    fn test_public_url(#[case] domain: Option<&str>, #[case] raw: bool, #[case] expected: &str) {
        assert_eq!(public_url(domain, raw, "me", "pics", "main", "photos/a b.jpg"), expected);
    }

    #[test]
    fn test_new_normalizes_path() {
        let config = GitHubConfig {
            owner: "me".to_string(),
            repo: "pics".to_string(),
            branch: "main".to_string(),
            path: Some("/photos/".to_string()),
            token: None,
            use_raw_url: true,
            custom_domain: None,
            max_objects: None,
        };
        let provider = GitHubProvider::new("github", &config).unwrap();
        assert_eq!(provider.prefix(), Some("photos"));
        assert_eq!(provider.list_limit(), DEFAULT_LIST_LIMIT);
    }
}
