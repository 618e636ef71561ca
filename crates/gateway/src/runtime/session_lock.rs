//! Advisory locks around thread resolution.
//!
//! Two widget requests for the same assistant that both arrive without a
//! thread id would otherwise race to create threads. Resolution for one
//! assistant id therefore runs under a lock keyed by that id. The lock only
//! serializes; it does not deduplicate, and [`LocalLockManager`] covers a
//! single process. A shared-store implementation of [`LockManager`] can
//! replace it without touching call sites.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use cr_domain::error::Result;
use parking_lot::Mutex;

/// Keyed mutual exclusion. `acquire` waits until the key is free.
#[async_trait]
pub trait LockManager: Send + Sync {
    async fn acquire(&self, key: &str) -> Result<()>;

    /// Releasing a key that is not held is a no-op.
    async fn release(&self, key: &str);
}

/// In-process lock set. Waiters re-check the set every `poll_interval`.
pub struct LocalLockManager {
    held: Mutex<HashSet<String>>,
    poll_interval: Duration,
}

impl LocalLockManager {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            held: Mutex::new(HashSet::new()),
            poll_interval,
        }
    }

    /// Number of keys currently held (for monitoring).
    pub fn held_count(&self) -> usize {
        self.held.lock().len()
    }

    pub fn is_held(&self, key: &str) -> bool {
        self.held.lock().contains(key)
    }
}

#[async_trait]
impl LockManager for LocalLockManager {
    async fn acquire(&self, key: &str) -> Result<()> {
        let mut waited = false;
        loop {
            // Check-and-insert under one guard so two waiters can never
            // both observe the key as free.
            if self.held.lock().insert(key.to_owned()) {
                if waited {
                    tracing::debug!(key, "assistant lock acquired after waiting");
                }
                return Ok(());
            }
            if !waited {
                tracing::debug!(key, "assistant lock held, waiting");
                waited = true;
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn release(&self, key: &str) {
        self.held.lock().remove(key);
    }
}
