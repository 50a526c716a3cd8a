use crate::models::media::PinRecord;
use crate::services::cas::{CasError, ContentAddressedStore, hash_stream};
use crate::utils::backoff::backoff_delay;
use crate::utils::now_ts;
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};

#[derive(Debug, thiserror::Error)]
pub enum PinError {
    /// The stored object does not hash back to its own address. This is
    /// corruption, not a transient fault; retrying cannot help.
    #[error("content verification mismatch: stored {stored}, computed {computed}")]
    Mismatch { stored: String, computed: String },
    #[error("nothing to pin")]
    EmptyArtifactSet,
    #[error(transparent)]
    Cas(#[from] CasError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl PinError {
    pub fn is_retryable(&self) -> bool {
        match self {
            PinError::Cas(e) => e.is_retryable(),
            PinError::Io(_) => true,
            PinError::Mismatch { .. } | PinError::EmptyArtifactSet => false,
        }
    }
}

/// Pins a finalized artifact set to the content-addressed store and, when
/// configured, re-reads the stored object to verify the address.
pub struct PinService {
    cas: Arc<dyn ContentAddressedStore>,
    verify: bool,
    retry_max: u32,
    retry_base: Duration,
    retry_factor: u32,
    retry_cap: Duration,
}

impl PinService {
    pub fn new(
        cas: Arc<dyn ContentAddressedStore>,
        verify: bool,
        retry_max: u32,
        retry_base: Duration,
        retry_factor: u32,
        retry_cap: Duration,
    ) -> Self {
        Self {
            cas,
            verify,
            retry_max,
            retry_base,
            retry_factor,
            retry_cap,
        }
    }

    pub async fn pin(&self, artifacts: &[PathBuf]) -> Result<PinRecord, PinError> {
        if artifacts.is_empty() {
            return Err(PinError::EmptyArtifactSet);
        }
        // deterministic bundle ordering, independent of discovery order
        let mut sorted = artifacts.to_vec();
        sorted.sort();

        let mut attempt = 0;
        loop {
            match self.try_pin(&sorted).await {
                Ok(record) => return Ok(record),
                Err(e) if e.is_retryable() && attempt + 1 < self.retry_max => {
                    let delay =
                        backoff_delay(self.retry_base, self.retry_factor, self.retry_cap, attempt);
                    tracing::warn!(attempt, error = %e, "pin attempt failed, retrying in {delay:?}");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn try_pin(&self, sorted: &[PathBuf]) -> Result<PinRecord, PinError> {
        let mut bundle = bundle_reader(sorted).await?;
        let (content_address, size) = self.cas.put(&mut bundle).await?;
        let verified_at = if self.verify {
            let mut stored = self.cas.open(&content_address).await?;
            let (computed, _) = hash_stream(&mut stored).await?;
            if computed != content_address {
                return Err(PinError::Mismatch {
                    stored: content_address,
                    computed,
                });
            }
            Some(now_ts())
        } else {
            None
        };
        Ok(PinRecord {
            content_address,
            size,
            verified_at,
        })
    }
}

/// Frames each artifact as `<file name>\n<byte len>\n<bytes>` and chains
/// them into one stream, so the content address binds names and contents.
async fn bundle_reader(
    sorted: &[PathBuf],
) -> std::io::Result<Box<dyn AsyncRead + Send + Unpin>> {
    let mut chained: Box<dyn AsyncRead + Send + Unpin> = Box::new(Cursor::new(Vec::new()));
    for path in sorted {
        let file = tokio::fs::File::open(path).await?;
        let len = file.metadata().await?.len();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        let header = format!("{name}\n{len}\n").into_bytes();
        chained = Box::new(chained.chain(Cursor::new(header)).chain(file.take(len)));
    }
    Ok(chained)
}
