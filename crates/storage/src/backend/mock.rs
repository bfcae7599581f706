//! In-memory storage provider for testing.

use super::{DEFAULT_LIST_LIMIT, ObjectStream};
use crate::error::{ErrorKind, Result};
use crate::path::validate as validate_key;
use crate::{StorageObject, StorageProvider};
use async_stream::stream;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use time::OffsetDateTime;
use tokio::sync::RwLock;

/// In-memory storage provider for testing.
///
/// Objects are kept in a sorted map behind a [`RwLock`], so listings are
/// deterministic (lexicographic by key). Every [`read()`](StorageProvider::read)
/// is counted per key, which lets tests assert that unchanged photos were
/// never fetched.
///
/// # Examples
///
/// ```
/// use prism_storage::StorageProvider;
/// use prism_storage::backend::MockProvider;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let provider = MockProvider::with_files([("2024/a.jpg", b"jpeg bytes")]);
/// assert_eq!(provider.list_images().await.unwrap().len(), 1);
/// assert!(provider.get_file("2024/a.jpg").await.is_some());
/// assert_eq!(provider.read_count("2024/a.jpg"), 1);
/// # }
/// ```
pub struct MockProvider {
    name: String,
    list_limit: usize,
    timestamps: bool,
    storage: RwLock<BTreeMap<String, (OffsetDateTime, Vec<u8>)>>,
    reads: Mutex<HashMap<String, usize>>,
}

impl MockProvider {
    /// Create a mock provider pre-populated with objects.
    ///
    /// Panics if any key fails validation (e.g. path traversal). If test
    /// setup is wrong, then test should not pass.
    pub fn with_files(files: impl IntoIterator<Item = (impl Into<String>, impl Into<Vec<u8>>)>) -> Self {
        let now = OffsetDateTime::now_utc();
        let mut map = BTreeMap::new();
        for (key, data) in files {
            map.insert(Self::checked(key.into()), (now, data.into()));
        }
        Self {
            name: "mock".to_string(),
            list_limit: DEFAULT_LIST_LIMIT,
            timestamps: true,
            storage: RwLock::new(map),
            reads: Mutex::new(HashMap::new()),
        }
    }

    /// Change the name of the mock provider.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Change the listing cap.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.list_limit = limit;
        self
    }

    /// List objects without modification times, the way git-backed
    /// providers do. Sizes are still reported.
    pub fn without_timestamps(mut self) -> Self {
        self.timestamps = false;
        self
    }

    fn checked(key: String) -> String {
        match validate_key(&key) {
            Ok(validated) => validated,
            // The panic here is DELIBERATE: the mock only exists for tests.
            Err(_) => panic!("MockProvider: invalid key {key}"),
        }
    }

    /// Add or replace an object, stamped with the current time.
    pub async fn insert(&self, key: impl Into<String>, data: impl Into<Vec<u8>>) {
        let key = Self::checked(key.into());
        self.storage.write().await.insert(key, (OffsetDateTime::now_utc(), data.into()));
    }

    /// Override an object's last-modified time. Returns `false` if the key
    /// doesn't exist.
    pub async fn touch(&self, key: &str, modified: OffsetDateTime) -> bool {
        match self.storage.write().await.get_mut(key) {
            Some((stamp, _)) => {
                *stamp = modified;
                true
            },
            None => false,
        }
    }

    /// Remove an object. Returns `false` if the key doesn't exist.
    pub async fn remove(&self, key: &str) -> bool {
        self.storage.write().await.remove(key).is_some()
    }

    /// How many times `key` has been read, successful or not.
    pub fn read_count(&self, key: &str) -> usize {
        // unwrap is safe: the lock is never held across a panic
        self.reads.lock().unwrap().get(key).copied().unwrap_or(0)
    }

    /// Total number of reads across all keys.
    pub fn total_reads(&self) -> usize {
        // unwrap is safe: the lock is never held across a panic
        self.reads.lock().unwrap().values().sum()
    }
}
impl Default for MockProvider {
    fn default() -> Self {
        let files: [(&str, &[u8]); 0] = [];
        Self::with_files(files)
    }
}

#[async_trait]
impl StorageProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_limit(&self) -> usize {
        self.list_limit
    }

    fn list_stream(&self) -> ObjectStream<'_> {
        Box::pin(stream! {
            // Snapshot under the read lock, then drop it before yielding to
            // avoid holding the lock across yield points.
            let entries: Vec<StorageObject> = {
                let guard = self.storage.read().await;
                guard
                    .iter()
                    .map(|(key, (modified, data))| {
                        let object = StorageObject::new(key.clone()).with_size(data.len() as u64);
                        match self.timestamps {
                            true => object.with_last_modified(*modified),
                            false => object,
                        }
                    })
                    .collect()
            };
            for object in entries {
                yield Ok(object);
            }
        })
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>> {
        let key = validate_key(key)?;
        // unwrap is safe: the lock is never held across a panic
        *self.reads.lock().unwrap().entry(key.clone()).or_default() += 1;
        let guard = self.storage.read().await;
        let (_modified, data) = guard.get(&key).ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(key.clone())))?;
        Ok(data.clone())
    }

    fn generate_public_url(&self, key: &str) -> String {
        format!("mock://{}/{key}", self.name)
    }
}
