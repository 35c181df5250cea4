use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use crate::errors::ServiceError;

/// Storage seam for uploaded media. The order core never touches this;
/// only the review subsystem stores files.
#[async_trait]
pub trait MediaStorage: Send + Sync {
    /// Persists `bytes` under `logical_key` and returns the relative path
    /// clients can use to retrieve the file.
    async fn store(&self, bytes: &[u8], logical_key: &str) -> Result<String, ServiceError>;
}

/// Media storage backed by a local directory tree.
pub struct LocalMediaStorage {
    root: PathBuf,
}

impl LocalMediaStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, logical_key: &str) -> Result<PathBuf, ServiceError> {
        let key = Path::new(logical_key);
        let traversal = key.components().any(|c| {
            matches!(
                c,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        });
        if logical_key.is_empty() || traversal {
            return Err(ServiceError::ValidationError(format!(
                "Invalid media key: {}",
                logical_key
            )));
        }
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl MediaStorage for LocalMediaStorage {
    async fn store(&self, bytes: &[u8], logical_key: &str) -> Result<String, ServiceError> {
        let target = self.resolve(logical_key)?;

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ServiceError::MediaError(format!("create {:?}: {}", parent, e)))?;
        }

        tokio::fs::write(&target, bytes)
            .await
            .map_err(|e| ServiceError::MediaError(format!("write {:?}: {}", target, e)))?;

        debug!(key = %logical_key, size = bytes.len(), "stored media file");
        Ok(logical_key.to_string())
    }
}

/// Builds the canonical storage key for a review image.
pub fn review_image_key(
    product_id: Uuid,
    order_number: &str,
    image_index: u32,
    extension: &str,
) -> String {
    format!(
        "reviews/{}/{}/{}.{}",
        product_id, order_number, image_index, extension
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_writes_file_and_returns_key() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalMediaStorage::new(dir.path());

        let key = review_image_key(Uuid::new_v4(), "ORD-42", 0, "jpg");
        let path = storage.store(b"fake-jpeg-bytes", &key).await.unwrap();
        assert_eq!(path, key);

        let on_disk = tokio::fs::read(dir.path().join(&key)).await.unwrap();
        assert_eq!(on_disk, b"fake-jpeg-bytes");
    }

    #[tokio::test]
    async fn store_rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalMediaStorage::new(dir.path());

        let result = storage.store(b"x", "../../etc/passwd").await;
        assert!(matches!(result, Err(ServiceError::ValidationError(_))));

        let result = storage.store(b"x", "/absolute/key").await;
        assert!(matches!(result, Err(ServiceError::ValidationError(_))));
    }
}
