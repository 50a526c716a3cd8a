use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Lifecycle of one upload session. Transitions are forward-only; `failed`
/// and `aborted` are terminal, `hd_ready` is the normal terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Open,
    Uploaded,
    Processing,
    Playable,
    HdReady,
    Failed,
    Aborted,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Open => "open",
            SessionState::Uploaded => "uploaded",
            SessionState::Processing => "processing",
            SessionState::Playable => "playable",
            SessionState::HdReady => "hd_ready",
            SessionState::Failed => "failed",
            SessionState::Aborted => "aborted",
        }
    }

    /// Abort is legal from every state except the two failure terminals.
    pub fn may_abort(self) -> bool {
        !matches!(self, SessionState::Failed | SessionState::Aborted)
    }

    /// Once the session leaves `open`, `received_bytes` is frozen.
    pub fn accepts_bytes(self) -> bool {
        matches!(self, SessionState::Open)
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::HdReady | SessionState::Failed | SessionState::Aborted
        )
    }

    pub fn can_transition(self, to: SessionState) -> bool {
        use SessionState::*;
        match (self, to) {
            (Open, Uploaded) => true,
            (Uploaded, Processing) => true,
            (Processing, Playable) => true,
            (Processing, Failed) => true,
            (Playable, HdReady) => true,
            (from, Aborted) => from.may_abort(),
            _ => false,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown session state: {0}")]
pub struct UnknownState(pub String);

impl FromStr for SessionState {
    type Err = UnknownState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "open" => SessionState::Open,
            "uploaded" => SessionState::Uploaded,
            "processing" => SessionState::Processing,
            "playable" => SessionState::Playable,
            "hd_ready" => SessionState::HdReady,
            "failed" => SessionState::Failed,
            "aborted" => SessionState::Aborted,
            other => return Err(UnknownState(other.to_string())),
        })
    }
}

/// `(filename, size, lastModified)` bound at create time; a resume attempt
/// carrying a different tuple is a different file, not a resumable one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub filename: String,
    pub size: u64,
    pub last_modified: i64,
}

impl Fingerprint {
    pub fn new(filename: impl Into<String>, size: u64, last_modified: i64) -> Self {
        Self {
            filename: filename.into(),
            size,
            last_modified,
        }
    }

    /// Wire form used by the `X-Upload-Fingerprint` header:
    /// `<size>-<lastModified>-<filename>`.
    pub fn parse_header(raw: &str) -> Option<Self> {
        let mut parts = raw.splitn(3, '-');
        let size = parts.next()?.parse().ok()?;
        let last_modified = parts.next()?.parse().ok()?;
        let filename = parts.next()?;
        if filename.is_empty() {
            return None;
        }
        Some(Self::new(filename, size, last_modified))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.size, self.last_modified, self.filename)
    }
}

/// Authoritative record of one in-flight or completed upload.
#[derive(Debug, Clone)]
pub struct UploadSession {
    pub upload_id: Uuid,
    pub owner_id: String,
    pub filename: String,
    pub declared_mime: String,
    pub declared_size: u64,
    pub chunk_size: u64,
    pub received_bytes: u64,
    pub fingerprint: Fingerprint,
    pub idempotency_key: String,
    pub state: SessionState,
    pub error_code: Option<String>,
    pub warning: Option<String>,
    pub draft_id: Option<Uuid>,
    pub content_address: Option<String>,
    pub pin_size: Option<u64>,
    pub pin_verified_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
    pub first_playable_at: Option<i64>,
    pub hd_ready_at: Option<i64>,
}

impl UploadSession {
    pub fn is_fully_received(&self) -> bool {
        self.received_bytes == self.declared_size
    }

    pub fn progress(&self) -> f64 {
        if self.declared_size == 0 {
            return 0.0;
        }
        self.received_bytes as f64 / self.declared_size as f64
    }
}
