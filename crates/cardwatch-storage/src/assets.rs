use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum AssetError {
    #[error("invalid asset name {0:?}")]
    InvalidName(String),
    #[error("asset io at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct StoredAsset {
    /// Opaque key handed back to the caller, e.g. `fighters/12345.jpg`.
    pub key: String,
    pub content_hash: String,
    pub byte_size: usize,
    /// Identical bytes were already stored under this key.
    pub deduplicated: bool,
}

/// Binary object store for fighter images and other downloaded media.
#[async_trait]
pub trait AssetStore: Send + Sync {
    /// Store `bytes` under `<stem>.<ext>`, the extension derived from
    /// `content_type`. Re-putting a stem replaces the previous bytes.
    async fn put(
        &self,
        stem: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<StoredAsset, AssetError>;
}

pub fn extension_for_content_type(content_type: &str) -> &'static str {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    match mime.as_str() {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        _ => "jpg",
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn validate_stem(stem: &str) -> Result<(), AssetError> {
    let well_formed = !stem.trim().is_empty()
        && Path::new(stem)
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if well_formed {
        Ok(())
    } else {
        Err(AssetError::InvalidName(stem.to_string()))
    }
}

/// Filesystem asset store rooted at a directory; writes go through a temp
/// file and an atomic rename.
#[derive(Debug, Clone)]
pub struct LocalAssetStore {
    root: PathBuf,
}

impl LocalAssetStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for_key(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> AssetError + '_ {
    move |source| AssetError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[async_trait]
impl AssetStore for LocalAssetStore {
    async fn put(
        &self,
        stem: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<StoredAsset, AssetError> {
        validate_stem(stem)?;
        let key = format!("{stem}.{}", extension_for_content_type(content_type));
        let absolute_path = self.root.join(&key);
        let content_hash = sha256_hex(bytes);

        let parent = absolute_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());
        fs::create_dir_all(&parent).await.map_err(io_err(&parent))?;

        if let Ok(existing) = fs::read(&absolute_path).await {
            if sha256_hex(&existing) == content_hash {
                return Ok(StoredAsset {
                    key,
                    content_hash,
                    byte_size: bytes.len(),
                    deduplicated: true,
                });
            }
        }

        let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .map_err(io_err(&temp_path))?;
        file.write_all(bytes).await.map_err(io_err(&temp_path))?;
        file.flush().await.map_err(io_err(&temp_path))?;
        drop(file);

        if let Err(source) = fs::rename(&temp_path, &absolute_path).await {
            if let Err(err) = fs::remove_file(&temp_path).await {
                tracing::debug!(path = %temp_path.display(), error = %err, "temp asset not removed");
            }
            return Err(AssetError::Io {
                path: absolute_path,
                source,
            });
        }

        tracing::debug!(key = %key, bytes = bytes.len(), "stored asset");
        Ok(StoredAsset {
            key,
            content_hash,
            byte_size: bytes.len(),
            deduplicated: false,
        })
    }
}
