use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Per-feed-URL async locks.
///
/// At most one holder per URL; different URLs never contend. The map only
/// keeps weak references, so a URL's entry disappears once its last holder
/// or waiter is gone.
#[derive(Default)]
pub(crate) struct FeedLocks {
    locks: Mutex<HashMap<String, Weak<AsyncMutex<()>>>>,
}

impl FeedLocks {
    /// Waits until no other caller holds `feed_url`, then holds it until the
    /// guard is dropped.
    pub(crate) async fn acquire(&self, feed_url: &str) -> OwnedMutexGuard<()> {
        let lock = {
            // The map is never left inconsistent, so a poisoned lock is still usable
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.retain(|_, weak| weak.strong_count() > 0);

            match locks.get(feed_url).and_then(Weak::upgrade) {
                Some(lock) => lock,
                None => {
                    let lock = Arc::new(AsyncMutex::new(()));
                    locks.insert(feed_url.to_owned(), Arc::downgrade(&lock));
                    lock
                }
            }
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    fn live_entries(&self) -> usize {
        let locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.values().filter(|w| w.strong_count() > 0).count()
    }
}
