use uuid::Uuid;

/// Fire-and-forget lifecycle notifications; emission must never block or
/// fail the operation that produced them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Created { upload_id: Uuid, owner_id: String },
    Uploaded { upload_id: Uuid, owner_id: String },
    Playable { upload_id: Uuid, owner_id: String },
    HdReady { upload_id: Uuid, owner_id: String },
    Failed {
        upload_id: Uuid,
        owner_id: String,
        error_code: String,
    },
    Aborted { upload_id: Uuid, owner_id: String },
}

impl SessionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::Created { .. } => "session.created",
            SessionEvent::Uploaded { .. } => "session.uploaded",
            SessionEvent::Playable { .. } => "session.playable",
            SessionEvent::HdReady { .. } => "session.hd_ready",
            SessionEvent::Failed { .. } => "session.failed",
            SessionEvent::Aborted { .. } => "session.aborted",
        }
    }

    pub fn upload_id(&self) -> Uuid {
        match self {
            SessionEvent::Created { upload_id, .. }
            | SessionEvent::Uploaded { upload_id, .. }
            | SessionEvent::Playable { upload_id, .. }
            | SessionEvent::HdReady { upload_id, .. }
            | SessionEvent::Failed { upload_id, .. }
            | SessionEvent::Aborted { upload_id, .. } => *upload_id,
        }
    }
}
