use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// Per-upload append locks. Appends for one session are strictly serialized;
/// pipelined clients queue here and out-of-order chunks are rejected after
/// the lock is taken, never reordered.
///
/// Entries are evicted after being idle well past the append deadline, so a
/// finished or abandoned session does not pin its mutex forever.
pub struct SessionLocks {
    inner: Cache<Uuid, Arc<Mutex<()>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self {
            inner: Cache::builder()
                .time_to_idle(Duration::from_secs(30 * 60))
                .build(),
        }
    }

    pub async fn acquire(&self, upload_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = self
            .inner
            .get_with(upload_id, async { Arc::new(Mutex::new(())) })
            .await;
        lock.lock_owned().await
    }
}

impl Default for SessionLocks {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn same_session_serializes() {
        let locks = Arc::new(SessionLocks::new());
        let id = Uuid::new_v4();
        let in_section = Arc::new(AtomicU32::new(0));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let in_section = in_section.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.acquire(id).await;
                assert_eq!(in_section.fetch_add(1, Ordering::SeqCst), 0);
                tokio::task::yield_now().await;
                in_section.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
    }

    #[tokio::test]
    async fn distinct_sessions_do_not_contend() {
        let locks = SessionLocks::new();
        let a = locks.acquire(Uuid::new_v4()).await;
        // a second session's lock must be immediately available
        let b = locks.acquire(Uuid::new_v4()).await;
        drop(a);
        drop(b);
    }
}
