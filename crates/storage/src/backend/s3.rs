//! S3-compatible storage provider.
//!
//! This module provides a storage provider implementation for S3-compatible
//! services including AWS S3, Backblaze B2, Cloudflare R2, MinIO and others.
//!
//! # Credentials
//!
//! Credentials are provided explicitly via the configuration file
//! (`access_key_id` and `secret_access_key`).

use crate::{
    StorageObject, StorageProvider,
    backend::{DEFAULT_LIST_LIMIT, ObjectStream, join_url},
    error::{ErrorKind, Result},
    path::{check as check_key, normalize_prefix},
};
use async_stream::stream;
use async_trait::async_trait;
use aws_sdk_s3::{
    Client,
    config::{BehaviorVersion, Credentials, Region, retry::RetryConfig},
    error::DisplayErrorContext,
    primitives::DateTime,
    types::Object,
};
use exn::ResultExt;
use prism_config::S3Config;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Generous default for concurrent S3 requests.
const DEFAULT_CONCURRENT_REQUESTS: usize = 100;
/// Objects requested per `ListObjectsV2` page (the S3 maximum).
const PAGE_SIZE: i32 = 1000;

/// S3-compatible storage provider.
///
/// Lists objects in a bucket, optionally under a key prefix. Listed keys are
/// full bucket keys (prefix included), so they can be fetched and linked
/// without any translation.
///
/// # Examples
///
/// ```no_run
/// use prism_config::S3Config;
/// use prism_storage::backend::S3Provider;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let provider = S3Provider::new("photos", &S3Config {
///     bucket: "my-bucket".to_string(),
///     region: "us-west-004".to_string(),
///     endpoint: Some("https://s3.us-west-004.backblazeb2.com".to_string()),
///     access_key_id: "access_key_id".to_string(),
///     secret_access_key: "secret_access_key".to_string(),
///     prefix: Some("gallery/".to_string()),
///     custom_domain: None,
///     max_objects: None,
/// }).map_err(|e| format!("{e:?}"))?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct S3Provider {
    name: String,
    client: Client,
    bucket: String,
    region: String,
    endpoint: Option<String>,
    prefix: Option<String>,
    custom_domain: Option<String>,
    list_limit: usize,
    /// Rate limiter for concurrent S3 requests.
    rate_limiter: Arc<Semaphore>,
}

impl S3Provider {
    /// Create a new S3 storage provider.
    ///
    /// # Arguments
    /// * `name` - A name for this provider (used in logging)
    /// * `config` - Bucket, region, endpoint, credentials and URL settings
    pub fn new(name: impl Into<String>, config: &S3Config) -> Result<Self> {
        let prefix = normalize_prefix(config.prefix.as_deref())?;
        let credentials = Credentials::new(
            config.access_key_id.clone(),
            config.secret_access_key.clone(),
            None,
            None,
            "prism-config",
        );
        let mut config_builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .credentials_provider(credentials)
            .region(Region::new(config.region.clone()))
            // Configure retry policy with exponential backoff (1 initial + 3 retries)
            .retry_config(RetryConfig::standard().with_max_attempts(4))
            // Use path-style addressing for better compatibility with
            // S3-compatible services (Backblaze, MinIO, etc.)
            .force_path_style(true);
        // Set custom endpoint for non-AWS services
        if let Some(endpoint_url) = &config.endpoint {
            config_builder = config_builder.endpoint_url(endpoint_url);
        }
        Ok(Self {
            name: name.into(),
            client: Client::from_conf(config_builder.build()),
            bucket: config.bucket.clone(),
            region: config.region.clone(),
            endpoint: config.endpoint.clone(),
            prefix,
            custom_domain: config.custom_domain.clone(),
            list_limit: config.max_objects.unwrap_or(DEFAULT_LIST_LIMIT),
            rate_limiter: Arc::new(Semaphore::new(DEFAULT_CONCURRENT_REQUESTS)),
        })
    }

    /// Acquire a rate limiter permit before making an S3 API call.
    async fn acquire_permit(&self) -> OwnedSemaphorePermit {
        // unwrap is safe: semaphore is never closed
        self.rate_limiter.clone().acquire_owned().await.unwrap()
    }

    /// Convert AWS DateTime to OffsetDateTime.
    fn parse_datetime(dt: &DateTime) -> Result<OffsetDateTime> {
        OffsetDateTime::from_unix_timestamp_nanos(dt.as_nanos())
            .or_raise(|| ErrorKind::BackendError("S3 datetime out of range".to_string()))
    }

    /// Listing prefix sent to S3; always ends in `/` so that `photos` doesn't
    /// also match `photos-private/`.
    fn list_prefix(&self) -> Option<String> {
        self.prefix.as_ref().map(|p| format!("{p}/"))
    }

    fn to_storage_object(key: &str, object: &Object) -> StorageObject {
        StorageObject {
            key: key.to_string(),
            size: object.size().and_then(|s| u64::try_from(s).ok()),
            last_modified: object.last_modified().and_then(|dt| Self::parse_datetime(dt).ok()),
            etag: object.e_tag().map(|t| t.trim_matches('"').to_string()),
        }
    }
}

/// URL scheme: custom domain, then AWS virtual-hosted style, then path-style
/// on the custom endpoint.
fn public_url(
    custom_domain: Option<&str>,
    endpoint: Option<&str>,
    bucket: &str,
    region: &str,
    key: &str,
) -> String {
    if let Some(domain) = custom_domain {
        return join_url(domain, key);
    }
    match endpoint {
        Some(endpoint) if !endpoint.contains("amazonaws.com") => join_url(&format!("{}/{bucket}", endpoint.trim_end_matches('/')), key),
        _ => join_url(&format!("https://{bucket}.s3.{region}.amazonaws.com"), key),
    }
}

#[async_trait]
impl StorageProvider for S3Provider {
    fn name(&self) -> &str {
        &self.name
    }

    fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    fn list_limit(&self) -> usize {
        self.list_limit
    }

    fn list_stream(&self) -> ObjectStream<'_> {
        Box::pin(stream! {
            let mut continuation: Option<String> = None;
            loop {
                let permit = self.acquire_permit().await;
                let response = self
                    .client
                    .list_objects_v2()
                    .bucket(&self.bucket)
                    .set_prefix(self.list_prefix())
                    .set_continuation_token(continuation.take())
                    .max_keys(PAGE_SIZE)
                    .send()
                    .await;
                drop(permit);
                let page = match response {
                    Ok(page) => page,
                    Err(e) => {
                        yield Err(exn::Exn::from(ErrorKind::Network(DisplayErrorContext(&e).to_string())));
                        return;
                    },
                };
                for object in page.contents() {
                    match object.key() {
                        // Zero-byte "directory" markers created by some S3 consoles.
                        Some(key) if !key.ends_with('/') => yield Ok(Self::to_storage_object(key, object)),
                        _ => {},
                    }
                }
                match page.next_continuation_token() {
                    Some(token) if page.is_truncated().unwrap_or(false) => {
                        tracing::debug!(bucket = %self.bucket, "Fetching next listing page");
                        continuation = Some(token.to_string());
                    },
                    _ => break,
                }
            }
        })
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>> {
        let key = check_key(key)?;
        let _permit = self.acquire_permit().await;
        let output = match self.client.get_object().bucket(&self.bucket).key(key).send().await {
            Ok(output) => output,
            Err(e) if e.as_service_error().is_some_and(|s| s.is_no_such_key()) => {
                exn::bail!(ErrorKind::NotFound(key.to_string()))
            },
            Err(e) => exn::bail!(ErrorKind::Network(DisplayErrorContext(&e).to_string())),
        };
        let body = output.body.collect().await.or_raise(|| ErrorKind::Network(format!("truncated body: {key}")))?;
        Ok(body.into_bytes().to_vec())
    }

    fn generate_public_url(&self, key: &str) -> String {
        public_url(self.custom_domain.as_deref(), self.endpoint.as_deref(), &self.bucket, &self.region, key)
    }
}
