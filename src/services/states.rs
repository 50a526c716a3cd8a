pub mod config;
pub mod db;

use crate::services::blob_store::BlobStore;
use crate::services::cas::ContentAddressedStore;
use crate::services::drafts::DraftStore;
use crate::services::events::EventSink;
use crate::services::queue::JobQueue;
use crate::services::session_locks::SessionLocks;
use config::AppConfig;
use db::DataBaseState;
use std::sync::Arc;

pub struct SpoolState {
    pub db: DataBaseState,
    pub config: Arc<AppConfig>,
    pub blob: Arc<dyn BlobStore>,
    pub cas: Arc<dyn ContentAddressedStore>,
    pub queue: Arc<dyn JobQueue>,
    pub drafts: Arc<dyn DraftStore>,
    pub events: Arc<dyn EventSink>,
    pub locks: SessionLocks,
}
