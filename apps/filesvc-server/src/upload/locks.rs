//! Per-session locks
//!
//! Chunk writes, commit and abort on one session run one at a time;
//! different sessions never wait on each other. Entries are dropped once
//! no task holds or waits for them.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Clone, Default)]
pub struct SessionLocks {
    inner: Arc<Mutex<HashMap<String, Weak<AsyncMutex<()>>>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `upload_id`
    pub async fn lock(&self, upload_id: &str) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut map = self.inner.lock();
            map.retain(|_, weak| weak.strong_count() > 0);

            match map.get(upload_id).and_then(Weak::upgrade) {
                Some(mutex) => mutex,
                None => {
                    let mutex = Arc::new(AsyncMutex::new(()));
                    map.insert(upload_id.to_string(), Arc::downgrade(&mutex));
                    mutex
                }
            }
        };

        mutex.lock_owned().await
    }

    /// Number of sessions currently tracked
    #[cfg(test)]
    fn len(&self) -> usize {
        let map = self.inner.lock();
        map.values().filter(|weak| weak.strong_count() > 0).count()
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
