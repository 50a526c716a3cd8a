use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum CasError {
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("invalid content address: {0}")]
    InvalidAddress(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CasError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, CasError::Io(_))
    }
}

pub type CasReader = Box<dyn AsyncRead + Send + Unpin>;

/// Content-addressed object store. `put` returns the address derived from
/// the stored bytes; identical content always yields the same address.
#[async_trait]
pub trait ContentAddressedStore: Send + Sync {
    async fn put(
        &self,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<(String, u64), CasError>;

    async fn open(&self, address: &str) -> Result<CasReader, CasError>;

    async fn delete(&self, address: &str) -> Result<(), CasError>;
}

/// Streams `reader` through sha-256 and returns the lowercase hex digest
/// together with the byte count.
pub async fn hash_stream(
    reader: &mut (dyn AsyncRead + Send + Unpin),
) -> std::io::Result<(String, u64)> {
    let mut hasher = Sha256::new();
    let mut size = 0u64;
    let mut buf = [0_u8; 8192];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }
    Ok((hex::encode(hasher.finalize()), size))
}

/// Filesystem CAS: objects live at `<root>/<aa>/<hex>` where `aa` is the
/// first digest byte, written via a temp file + rename so a crash never
/// leaves a partial object under its final address.
pub struct FsCasStore {
    root: PathBuf,
}

impl FsCasStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, address: &str) -> Result<PathBuf, CasError> {
        let valid =
            address.len() == 64 && address.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase());
        if !valid {
            return Err(CasError::InvalidAddress(address.to_string()));
        }
        Ok(self.root.join(&address[..2]).join(address))
    }
}

#[async_trait]
impl ContentAddressedStore for FsCasStore {
    async fn put(
        &self,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<(String, u64), CasError> {
        let tmp_dir = self.root.join("tmp");
        fs::create_dir_all(&tmp_dir).await?;
        let tmp_path = tmp_dir.join(Uuid::new_v4().to_string());
        let mut tmp = fs::File::create(&tmp_path).await?;

        let mut hasher = Sha256::new();
        let mut size = 0u64;
        let mut buf = [0_u8; 8192];
        let write_res: std::io::Result<()> = async {
            loop {
                let n = reader.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
                tmp.write_all(&buf[..n]).await?;
                size += n as u64;
            }
            tmp.sync_data().await
        }
        .await;
        if let Err(e) = write_res {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }

        let address = hex::encode(hasher.finalize());
        let final_path = self.object_path(&address)?;
        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        if fs::metadata(&final_path).await.is_ok() {
            // identical content already stored
            let _ = fs::remove_file(&tmp_path).await;
        } else {
            fs::rename(&tmp_path, &final_path).await?;
        }
        Ok((address, size))
    }

    async fn open(&self, address: &str) -> Result<CasReader, CasError> {
        let path = self.object_path(address)?;
        match fs::File::open(&path).await {
            Ok(f) => Ok(Box::new(f)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(CasError::NotFound(address.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, address: &str) -> Result<(), CasError> {
        let path = self.object_path(address)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
