use std::future::Future;
use std::path::{Component, Path, PathBuf};

use anyhow::{Result, bail};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use uuid::Uuid;

/// What the blob store reports back for a stored file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub url: String,
    pub size: u64,
    pub filename: String,
}

/// External file storage.
pub trait BlobStore: Send + Sync {
    fn upload(
        &self,
        bytes: Vec<u8>,
        path_prefix: &str,
        extension: &str,
    ) -> impl Future<Output = Result<StoredBlob>> + Send;

    /// Delete a blob written by `upload`. A blob that is already gone is not
    /// an error.
    fn remove(&self, path_prefix: &str, filename: &str) -> impl Future<Output = Result<()>> + Send;
}

/// Stores blobs under a local directory and serves them from `public_base_url`.
///
/// Each upload lands at `{root}/{path_prefix}/{uuid}.{extension}`.
pub struct DiskBlobStore {
    root: PathBuf,
    public_base_url: String,
}

impl DiskBlobStore {
    pub async fn new(root: PathBuf, public_base_url: impl Into<String>) -> Result<Self> {
        fs::create_dir_all(&root).await?;
        info!("Blob storage directory: {}", root.display());
        Ok(Self {
            root,
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

impl DiskBlobStore {
    fn dir_for(&self, path_prefix: &str) -> Result<PathBuf> {
        let prefix = Path::new(path_prefix);
        // Prefixes are built by us, but never let one escape the root.
        if prefix.components().any(|c| !matches!(c, Component::Normal(_))) {
            bail!("Invalid blob path prefix '{}'", path_prefix);
        }
        Ok(self.root.join(prefix))
    }
}

impl BlobStore for DiskBlobStore {
    async fn upload(&self, bytes: Vec<u8>, path_prefix: &str, extension: &str) -> Result<StoredBlob> {
        let dir = self.dir_for(path_prefix)?;
        fs::create_dir_all(&dir).await?;

        let filename = format!("{}.{}", Uuid::new_v4(), extension);
        let path = dir.join(&filename);
        let mut file = fs::File::create(&path).await?;
        file.write_all(&bytes).await?;
        file.flush().await?;

        Ok(StoredBlob {
            url: format!("{}/{}/{}", self.public_base_url, path_prefix, filename),
            size: bytes.len() as u64,
            filename,
        })
    }

    async fn remove(&self, path_prefix: &str, filename: &str) -> Result<()> {
        let mut parts = Path::new(filename).components();
        if !matches!((parts.next(), parts.next()), (Some(Component::Normal(_)), None)) {
            bail!("Invalid blob filename '{}'", filename);
        }
        let path = self.dir_for(path_prefix)?.join(filename);
        match fs::remove_file(&path).await {
            Ok(()) => {
                info!("Deleted blob {}/{}", path_prefix, filename);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Blob {}/{} already gone", path_prefix, filename);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
