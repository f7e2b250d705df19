//! Object store backends.
//!
//! - [`S3Store`]: any S3-compatible endpoint (Cloudflare R2 in production)
//! - [`FsStore`]: a local directory mirroring the key layout (`--output-dir`, dry runs)
//! - [`MemoryStore`]: in-process map with failure injection for tests

use async_trait::async_trait;
use s3::creds::Credentials;
use s3::{Bucket, Region};
#[cfg(test)]
use std::collections::HashMap;
use std::path::PathBuf;
#[cfg(test)]
use std::sync::{Mutex, PoisonError};
use tracing::{debug, instrument};

use crate::error::StoreError;
use crate::utils::ensure_writable_dir;

/// Minimal PUT/GET surface the storage writer needs.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Human readable target for logs.
    fn describe(&self) -> String;

    /// Create or overwrite `key`.
    async fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<(), StoreError>;

    /// Read `key`; `None` when it does not exist.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
}

/// Connection settings for an S3-compatible bucket.
#[derive(Clone)]
pub struct S3Settings {
    pub bucket: String,
    pub endpoint: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl S3Settings {
    /// Cloudflare R2 endpoint for an account.
    pub fn r2(account_id: &str, bucket: &str, access_key_id: &str, secret_access_key: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            endpoint: format!("https://{account_id}.r2.cloudflarestorage.com"),
            region: "auto".to_string(),
            access_key_id: access_key_id.to_string(),
            secret_access_key: secret_access_key.to_string(),
        }
    }
}

pub struct S3Store {
    bucket: Box<Bucket>,
    endpoint: String,
}

impl S3Store {
    pub fn new(settings: &S3Settings) -> Result<Self, StoreError> {
        let region = Region::Custom {
            region: settings.region.clone(),
            endpoint: settings.endpoint.clone(),
        };
        let credentials = Credentials::new(
            Some(&settings.access_key_id),
            Some(&settings.secret_access_key),
            None,
            None,
            None,
        )
        .map_err(|e| StoreError::Config(e.to_string()))?;
        let bucket = Bucket::new(&settings.bucket, region, credentials)
            .map_err(|e| StoreError::Config(e.to_string()))?
            .with_path_style();

        Ok(Self {
            bucket,
            endpoint: settings.endpoint.clone(),
        })
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    fn describe(&self) -> String {
        format!("s3://{} at {}", self.bucket.name(), self.endpoint)
    }

    #[instrument(level = "debug", skip(self, bytes), fields(len = bytes.len()))]
    async fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<(), StoreError> {
        let resp = self
            .bucket
            .put_object_with_content_type(key, bytes, content_type)
            .await
            .map_err(|e| StoreError::Io {
                key: key.to_string(),
                message: e.to_string(),
            })?;
        match resp.status_code() {
            200..=299 => Ok(()),
            status => Err(StoreError::Status {
                key: key.to_string(),
                status,
            }),
        }
    }

    #[instrument(level = "debug", skip(self))]
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let resp = self.bucket.get_object(key).await.map_err(|e| StoreError::Io {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        match resp.status_code() {
            200..=299 => Ok(Some(resp.bytes().to_vec())),
            404 => Ok(None),
            status => Err(StoreError::Status {
                key: key.to_string(),
                status,
            }),
        }
    }
}

/// Local directory store. Keys become relative paths.
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Create the root directory if needed and check it is writable.
    pub async fn open(root: &str) -> Result<Self, StoreError> {
        ensure_writable_dir(root)
            .await
            .map_err(|e| StoreError::Config(format!("{root}: {e}")))?;
        Ok(Self {
            root: PathBuf::from(root),
        })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        if key.split('/').any(|part| part == "..") {
            return Err(StoreError::Config(format!("key escapes store root: {key}")));
        }
        Ok(self.root.join(key.trim_start_matches('/')))
    }
}

#[async_trait]
impl ObjectStore for FsStore {
    fn describe(&self) -> String {
        format!("file://{}", self.root.display())
    }

    async fn put(&self, key: &str, bytes: &[u8], _content_type: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        let io = |e: std::io::Error| StoreError::Io {
            key: key.to_string(),
            message: e.to_string(),
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io)?;
        }
        tokio::fs::write(&path, bytes).await.map_err(io)?;
        debug!(path = %path.display(), "Wrote object");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io {
                key: key.to_string(),
                message: e.to_string(),
            }),
        }
    }
}

/// In-memory store. Counts PUTs per key and can fail or stall a key.
#[cfg(test)]
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<HashMap<String, (Vec<u8>, String)>>,
    puts: Mutex<HashMap<String, usize>>,
    failures: Mutex<Vec<(String, usize)>>,
    stalls: Mutex<Vec<(String, std::time::Duration)>>,
}

#[cfg(test)]
impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` PUTs to any key ending in `suffix`.
    pub fn fail_puts(&self, suffix: &str, times: usize) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((suffix.to_string(), times));
    }

    /// Delay every PUT to a key ending in `suffix` by `delay` before it lands.
    pub fn stall_puts(&self, suffix: &str, delay: std::time::Duration) {
        self.stalls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((suffix.to_string(), delay));
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .map(|(bytes, _)| bytes.clone())
    }

    pub fn content_type(&self, key: &str) -> Option<String> {
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .map(|(_, ct)| ct.clone())
    }

    /// Attempted PUTs (successful or not) to `key`.
    pub fn put_attempts(&self, key: &str) -> usize {
        self.puts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .copied()
            .unwrap_or(0)
    }
}

#[cfg(test)]
#[async_trait]
impl ObjectStore for MemoryStore {
    fn describe(&self) -> String {
        "memory".to_string()
    }

    async fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<(), StoreError> {
        *self
            .puts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.to_string())
            .or_default() += 1;

        {
            let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some((_, remaining)) = failures
                .iter_mut()
                .find(|(suffix, remaining)| *remaining > 0 && key.ends_with(suffix.as_str()))
            {
                *remaining -= 1;
                return Err(StoreError::Status {
                    key: key.to_string(),
                    status: 503,
                });
            }
        }

        let stall = self
            .stalls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|(suffix, _)| key.ends_with(suffix.as_str()))
            .map(|(_, delay)| *delay);
        if let Some(delay) = stall {
            tokio::time::sleep(delay).await;
        }

        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), (bytes.to_vec(), content_type.to_string()));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.object(key))
    }
}
