pub mod blob_store;
pub mod cas;
pub mod drafts;
pub mod events;
pub mod media;
pub mod pinner;
pub mod pipeline;
pub mod queue;
pub mod session_locks;
pub mod states;
pub mod sweeper;
