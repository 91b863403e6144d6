use std::future::Future;
use std::sync::Arc;

use tokio::sync::RwLock;

/// Lazily built, process-wide handle behind a reader/writer lock.
///
/// Readers share the cached value. On a miss the first writer rebuilds it
/// while later callers wait on the write lock and then see the new value.
/// `invalidate` clears the slot so the next caller rebuilds from current
/// configuration.
pub struct ClientCache<T: ?Sized> {
    slot: RwLock<Option<Arc<T>>>,
}

impl<T: ?Sized> Default for ClientCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> ClientCache<T> {
    pub fn new() -> Self {
        Self {
            slot: RwLock::new(None),
        }
    }

    pub async fn get_or_try_init<E, F, Fut>(&self, init: F) -> Result<Arc<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<T>, E>>,
    {
        if let Some(value) = self.slot.read().await.as_ref() {
            return Ok(Arc::clone(value));
        }

        let mut slot = self.slot.write().await;
        // another caller may have filled it while we waited
        if let Some(value) = slot.as_ref() {
            return Ok(Arc::clone(value));
        }

        let value = init().await?;
        *slot = Some(Arc::clone(&value));
        Ok(value)
    }

    pub async fn invalidate(&self) {
        self.slot.write().await.take();
    }

    pub async fn is_cached(&self) -> bool {
        self.slot.read().await.is_some()
    }
}
