use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::services::validation;

/// Write-once key of an image held by the [`ImageStore`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ImageRef(String);

impl ImageRef {
    /// Accepts flat keys of `[A-Za-z0-9._-]` that do not start with a dot.
    pub fn parse(key: &str) -> Result<Self, StorageError> {
        let valid = !key.is_empty()
            && key.len() <= 128
            && !key.starts_with('.')
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));

        if valid {
            Ok(Self(key.to_string()))
        } else {
            Err(StorageError::InvalidRef(key.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ImageRef {
    type Error = StorageError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ImageRef> for String {
    fn from(value: ImageRef) -> Self {
        value.0
    }
}

/// Local filesystem store for uploaded and generated images.
pub struct ImageStore {
    root: PathBuf,
    public_base_url: String,
}

impl ImageStore {
    /// Open the store rooted at `root`, creating the directory if needed.
    ///
    /// `base_url` is the externally reachable server root; images are
    /// published under `{base_url}/static/images/`.
    pub async fn open(root: impl Into<PathBuf>, base_url: &str) -> Result<Self, StorageError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            public_base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Durably store image bytes under a fresh key.
    ///
    /// The data is fsynced to a temporary file before being renamed into
    /// place, so a returned reference always points at complete bytes.
    pub async fn put(&self, data: &[u8]) -> Result<ImageRef, StorageError> {
        let extension = validation::detect_format(data)
            .map(validation::file_extension)
            .unwrap_or("bin");
        let image_ref = ImageRef(format!("{}.{}", Uuid::new_v4().simple(), extension));

        let final_path = self.path_for(&image_ref);
        let temp_path = self.root.join(format!(".{}.partial", image_ref));

        store_file(&temp_path, &final_path, &image_ref, data).await?;
        self.sync_root().await?;

        tracing::debug!(image_ref = %image_ref, bytes = data.len(), "Stored image");
        Ok(image_ref)
    }

    /// Read back previously stored bytes.
    pub async fn get(&self, image_ref: &ImageRef) -> Result<Vec<u8>, StorageError> {
        match tokio::fs::read(self.path_for(image_ref)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(image_ref.to_string()))
            }
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    /// Remove a stored image. Removing one that is already gone succeeds.
    pub async fn delete(&self, image_ref: &ImageRef) -> Result<(), StorageError> {
        match tokio::fs::remove_file(self.path_for(image_ref)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    /// Public URL the static file route serves this image at.
    pub fn url(&self, image_ref: &ImageRef) -> String {
        format!("{}/static/images/{}", self.public_base_url, image_ref)
    }

    /// Check the storage directory is still present (for health checks).
    pub async fn health_check(&self) -> Result<(), StorageError> {
        let meta = tokio::fs::metadata(&self.root).await?;
        if meta.is_dir() {
            Ok(())
        } else {
            Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} is not a directory", self.root.display()),
            )))
        }
    }

    fn path_for(&self, image_ref: &ImageRef) -> PathBuf {
        self.root.join(image_ref.as_str())
    }

    #[cfg(unix)]
    async fn sync_root(&self) -> Result<(), StorageError> {
        tokio::fs::File::open(&self.root).await?.sync_all().await?;
        Ok(())
    }

    #[cfg(not(unix))]
    async fn sync_root(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

/// Write `data` via `temp_path` into `final_path`; no temp file survives a failure.
async fn store_file(
    temp_path: &Path,
    final_path: &Path,
    image_ref: &ImageRef,
    data: &[u8],
) -> Result<(), StorageError> {
    let result = write_then_rename(temp_path, final_path, image_ref, data).await;
    if result.is_err() {
        let _ = tokio::fs::remove_file(temp_path).await;
    }
    result
}

async fn write_then_rename(
    temp_path: &Path,
    final_path: &Path,
    image_ref: &ImageRef,
    data: &[u8],
) -> Result<(), StorageError> {
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(temp_path)
        .await?;
    file.write_all(data).await?;
    file.sync_all().await?;
    drop(file);

    if tokio::fs::try_exists(final_path).await? {
        return Err(StorageError::AlreadyExists(image_ref.to_string()));
    }
    tokio::fs::rename(temp_path, final_path).await?;
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Image not found: {0}")]
    NotFound(String),

    #[error("Invalid image reference: {0}")]
    InvalidRef(String),

    #[error("Image reference already in use: {0}")]
    AlreadyExists(String),

    #[error("Storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
}
