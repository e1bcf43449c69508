/// Binary asset storage (avatars, post images)
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::AssetSettings;
use crate::domain::AssetRef;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AssetError {
    #[error("asset {0} not found")]
    NotFound(String),

    #[error("asset store failure: {0}")]
    Backend(String),
}

/// Opaque external asset store
#[async_trait::async_trait]
pub trait AssetStore: Send + Sync {
    async fn upload(&self, blob: Vec<u8>, folder: &str) -> Result<AssetRef, AssetError>;

    async fn delete(&self, public_id: &str) -> Result<(), AssetError>;
}

/// Delete treating an already-missing asset as done.
pub async fn delete_if_present(store: &dyn AssetStore, public_id: &str) -> Result<(), AssetError> {
    match store.delete(public_id).await {
        Ok(()) | Err(AssetError::NotFound(_)) => Ok(()),
        Err(e) => Err(e),
    }
}

/// S3-backed asset store; `public_id` is the object key
#[derive(Clone)]
pub struct S3AssetStore {
    client: Arc<Client>,
    bucket: String,
    public_base_url: String,
}

impl S3AssetStore {
    pub fn new(client: Arc<Client>, settings: &AssetSettings) -> Self {
        Self {
            client,
            bucket: settings.bucket.clone(),
            public_base_url: settings.public_base_url.trim_end_matches('/').to_string(),
        }
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_base_url, key)
    }
}

#[async_trait::async_trait]
impl AssetStore for S3AssetStore {
    async fn upload(&self, blob: Vec<u8>, folder: &str) -> Result<AssetRef, AssetError> {
        let key = format!("{}/{}", folder.trim_matches('/'), Uuid::new_v4());
        let size = blob.len();

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(blob))
            .send()
            .await
            .map_err(|e| AssetError::Backend(format!("put {key}: {e}")))?;

        info!(key = %key, size, "Uploaded asset");
        Ok(AssetRef {
            url: self.public_url(&key),
            public_id: key,
        })
    }

    async fn delete(&self, public_id: &str) -> Result<(), AssetError> {
        // S3 deletes are idempotent; a missing key is reported as success.
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(public_id)
            .send()
            .await
            .map_err(|e| AssetError::Backend(format!("delete {public_id}: {e}")))?;

        debug!(key = %public_id, "Deleted asset");
        Ok(())
    }
}

/// Process-local asset store for development and tests
#[derive(Default)]
pub struct InMemoryAssetStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryAssetStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn contains(&self, public_id: &str) -> bool {
        self.blobs.read().await.contains_key(public_id)
    }

    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }
}

#[async_trait::async_trait]
impl AssetStore for InMemoryAssetStore {
    async fn upload(&self, blob: Vec<u8>, folder: &str) -> Result<AssetRef, AssetError> {
        let public_id = format!("{}/{}", folder.trim_matches('/'), Uuid::new_v4());
        self.blobs.write().await.insert(public_id.clone(), blob);
        Ok(AssetRef {
            url: format!("memory://{public_id}"),
            public_id,
        })
    }

    async fn delete(&self, public_id: &str) -> Result<(), AssetError> {
        self.blobs
            .write()
            .await
            .remove(public_id)
            .map(|_| ())
            .ok_or_else(|| AssetError::NotFound(public_id.to_string()))
    }
}
