//! Per-workspace run serialization.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// One async mutex per workspace. At most one run per workspace holds its
/// guard at a time; the guard releases on drop, including during unwinding.
#[derive(Clone, Default)]
pub struct TenantLocks {
    locks: Arc<Mutex<HashMap<i64, Arc<AsyncMutex<()>>>>>,
}

impl TenantLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, workspace_id: i64) -> Arc<AsyncMutex<()>> {
        let mut locks = match self.locks.lock() {
            Ok(locks) => locks,
            Err(poisoned) => poisoned.into_inner(),
        };
        locks
            .entry(workspace_id)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Waits until no other run of the workspace is active.
    pub async fn acquire(&self, workspace_id: i64) -> OwnedMutexGuard<()> {
        self.lock_for(workspace_id).lock_owned().await
    }

    /// Acquires without waiting; `None` when a run is active.
    pub fn try_acquire(&self, workspace_id: i64) -> Option<OwnedMutexGuard<()>> {
        self.lock_for(workspace_id).try_lock_owned().ok()
    }
}
