use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use tokio::sync::Notify;
use uuid::Uuid;

/// Signal shared between the owner of an execution and whoever may tear it down.
#[derive(Clone, Debug, Default)]
pub struct AbortHandle {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl AbortHandle {
    pub fn abort(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_aborted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Resolves once `abort` has been called.
    pub async fn aborted(&self) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_aborted() {
            return;
        }
        notified.await;
    }

    /// Raw flag for code that cannot await, like the engine's interrupt hook.
    pub fn flag(&self) -> Arc<AtomicBool> {
        self.flag.clone()
    }
}

/// Execution contexts currently alive in this process.
#[derive(Clone, Debug, Default)]
pub struct ContextRegistry {
    live: Arc<DashMap<Uuid, AbortHandle>>,
}

impl ContextRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new context. It stays registered until the lease is dropped.
    pub fn acquire(&self) -> ContextLease {
        let id = Uuid::new_v4();
        let handle = AbortHandle::default();
        self.live.insert(id, handle.clone());
        tracing::debug!(context = %id, "execution context acquired");
        ContextLease {
            id,
            handle,
            live: self.live.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Aborts every live context and forgets about them.
    pub fn abort_all(&self) -> usize {
        let mut aborted = 0;
        self.live.retain(|id, handle| {
            tracing::debug!(context = %id, "aborting execution context");
            handle.abort();
            aborted += 1;
            false
        });
        aborted
    }
}

#[derive(Debug)]
pub struct ContextLease {
    id: Uuid,
    handle: AbortHandle,
    live: Arc<DashMap<Uuid, AbortHandle>>,
}

impl ContextLease {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn handle(&self) -> &AbortHandle {
        &self.handle
    }
}

impl Drop for ContextLease {
    fn drop(&mut self) {
        if self.live.remove(&self.id).is_some() {
            tracing::debug!(context = %self.id, "execution context released");
        }
    }
}
