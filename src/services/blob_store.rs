use async_trait::async_trait;
use std::io::SeekFrom;
use std::path::PathBuf;
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum BlobStoreError {
    /// The caller's offset does not match the stored object; retrying the
    /// same request cannot succeed, the caller must re-probe.
    #[error("offset mismatch: object has {expected} bytes, append at {got}")]
    OffsetMismatch { expected: u64, got: u64 },
    #[error("blob not found: {0}")]
    NotFound(Uuid),
    #[error("short body: got {written} of {expected} bytes")]
    ShortBody { written: u64, expected: u64 },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl BlobStoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, BlobStoreError::Io(_))
    }
}

pub type BlobReader = Box<dyn AsyncRead + Send + Unpin>;

/// Byte storage for in-flight uploads, keyed by upload id. Objects are
/// append-only while a session is open; an append either lands fully or
/// leaves the object size unchanged from the caller's point of view.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn append(
        &self,
        upload_id: Uuid,
        offset: u64,
        body: &mut (dyn AsyncRead + Send + Unpin),
        len: u64,
    ) -> Result<u64, BlobStoreError>;

    async fn size(&self, upload_id: Uuid) -> Result<u64, BlobStoreError>;

    async fn read_range(
        &self,
        upload_id: Uuid,
        start: u64,
        end: u64,
    ) -> Result<BlobReader, BlobStoreError>;

    async fn delete(&self, upload_id: Uuid) -> Result<(), BlobStoreError>;
}

/// Filesystem-backed store: one `<upload_id>.part` file per session under
/// the blob root.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, upload_id: Uuid) -> PathBuf {
        self.root.join(format!("{upload_id}.part"))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn append(
        &self,
        upload_id: Uuid,
        offset: u64,
        body: &mut (dyn AsyncRead + Send + Unpin),
        len: u64,
    ) -> Result<u64, BlobStoreError> {
        fs::create_dir_all(&self.root).await?;
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(self.object_path(upload_id))
            .await?;
        let current = file.metadata().await?.len();
        if current < offset {
            return Err(BlobStoreError::OffsetMismatch {
                expected: current,
                got: offset,
            });
        }
        if current > offset {
            // torn tail from an interrupted append; the high-water mark in
            // the session record is authoritative
            file.set_len(offset).await?;
        }
        file.seek(SeekFrom::Start(offset)).await?;
        let written = match tokio::io::copy(&mut body.take(len), &mut file).await {
            Ok(n) => n,
            Err(e) => {
                let _ = file.set_len(offset).await;
                return Err(e.into());
            }
        };
        if written < len {
            file.set_len(offset).await?;
            return Err(BlobStoreError::ShortBody {
                written,
                expected: len,
            });
        }
        file.flush().await?;
        file.sync_data().await?;
        Ok(offset + len)
    }

    async fn size(&self, upload_id: Uuid) -> Result<u64, BlobStoreError> {
        match fs::metadata(self.object_path(upload_id)).await {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BlobStoreError::NotFound(upload_id))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn read_range(
        &self,
        upload_id: Uuid,
        start: u64,
        end: u64,
    ) -> Result<BlobReader, BlobStoreError> {
        let mut file = match fs::File::open(self.object_path(upload_id)).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BlobStoreError::NotFound(upload_id));
            }
            Err(e) => return Err(e.into()),
        };
        file.seek(SeekFrom::Start(start)).await?;
        Ok(Box::new(file.take(end - start + 1)))
    }

    async fn delete(&self, upload_id: Uuid) -> Result<(), BlobStoreError> {
        match fs::remove_file(self.object_path(upload_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

pub async fn read_all(store: &dyn BlobStore, upload_id: Uuid) -> Result<Vec<u8>, BlobStoreError> {
    let size = store.size(upload_id).await?;
    if size == 0 {
        return Ok(Vec::new());
    }
    let mut reader = store.read_range(upload_id, 0, size - 1).await?;
    let mut buf = Vec::with_capacity(size as usize);
    reader.read_to_end(&mut buf).await?;
    Ok(buf)
}
