//! Object storage for staged artifacts.
//!
//! Production runs write to Google Cloud Storage; tests use the in-memory
//! backend through the same interface.

use bytes::Bytes;
use object_store::gcp::{GcpCredentialProvider, GoogleCloudStorageBuilder};
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload, RetryConfig};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{PipelineError, PipelineResult};

/// Storage provider that abstracts over the supported backends.
#[derive(Clone)]
pub struct StorageProvider {
    object_store: Arc<dyn ObjectStore>,
    canonical_url: String,
    credentials: Option<GcpCredentialProvider>,
}

impl std::fmt::Debug for StorageProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StorageProvider<{}>", self.canonical_url)
    }
}

impl StorageProvider {
    /// Bucket-scoped GCS store, authenticated from the environment.
    pub fn gcs(bucket: &str) -> PipelineResult<Self> {
        let mut builder = GoogleCloudStorageBuilder::from_env()
            .with_bucket_name(bucket)
            .with_retry(RetryConfig::default());

        if let Ok(service_account_key) = std::env::var("GOOGLE_SERVICE_ACCOUNT_KEY") {
            debug!("Constructing GCS builder with service account key");
            builder = builder.with_service_account_key(&service_account_key);
        }

        let store = builder.build().map_err(|source| PipelineError::Storage {
            key: bucket.to_string(),
            source,
        })?;
        let credentials = Some(store.credentials().clone());

        Ok(Self {
            object_store: Arc::new(store),
            canonical_url: format!("gs://{bucket}"),
            credentials,
        })
    }

    pub fn memory() -> Self {
        Self {
            object_store: Arc::new(InMemory::new()),
            canonical_url: "memory://store".to_string(),
            credentials: None,
        }
    }

    /// GCS token source, when backed by GCS.
    pub fn credentials(&self) -> Option<&GcpCredentialProvider> {
        self.credentials.as_ref()
    }

    /// Fully qualified URI of `key`, e.g. `gs://bucket/raw/x.json`.
    pub fn uri_for(&self, key: &str) -> String {
        format!("{}/{}", self.canonical_url, key)
    }

    /// Inverse of [`uri_for`](Self::uri_for); `None` for URIs of other stores.
    pub fn key_for_uri<'a>(&self, uri: &'a str) -> Option<&'a str> {
        uri.strip_prefix(self.canonical_url.as_str())?.strip_prefix('/')
    }

    /// Copy a local file verbatim to `key`, replacing any existing object.
    ///
    /// Returns the number of bytes uploaded.
    pub async fn upload_file(&self, local: &std::path::Path, key: &str) -> PipelineResult<usize> {
        let bytes = tokio::fs::read(local)
            .await
            .map_err(|e| PipelineError::io(local, e))?;
        let size = bytes.len();

        self.put(key, Bytes::from(bytes)).await?;

        info!(
            from = %local.display(),
            to = %self.uri_for(key),
            bytes = size,
            "Uploaded file"
        );
        Ok(size)
    }

    pub async fn put(&self, key: &str, bytes: Bytes) -> PipelineResult<()> {
        self.object_store
            .put(&Path::from(key), PutPayload::from(bytes))
            .await
            .map_err(|source| PipelineError::Storage {
                key: key.to_string(),
                source,
            })?;
        Ok(())
    }

    pub async fn get(&self, key: &str) -> PipelineResult<Bytes> {
        let storage_err = |source| PipelineError::Storage {
            key: key.to_string(),
            source,
        };

        self.object_store
            .get(&Path::from(key))
            .await
            .map_err(storage_err)?
            .bytes()
            .await
            .map_err(storage_err)
    }
}
