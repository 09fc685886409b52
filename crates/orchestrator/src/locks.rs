//! Per-cluster serialization of topology mutations

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;

/// One async mutex per cluster ID
///
/// Every load-mutate-save of a `ClusterConfig` runs under its cluster's lock,
/// so at most one lifecycle operation is in flight per cluster.
#[derive(Default)]
pub struct ClusterLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ClusterLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to a cluster
    pub async fn lock(&self, cluster_id: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .lock()
            .entry(cluster_id.to_string())
            .or_default()
            .clone();
        lock.lock_owned().await
    }

    /// Forget a deleted cluster's lock unless someone still holds or awaits it
    ///
    /// Returns true when the entry was removed.
    pub fn forget(&self, cluster_id: &str) -> bool {
        let mut locks = self.locks.lock();
        match locks.get(cluster_id) {
            Some(lock) if Arc::strong_count(lock) == 1 => {
                locks.remove(cluster_id);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_cluster_is_exclusive() {
        let locks = Arc::new(ClusterLocks::new());
        let guard = locks.lock("c1").await;

        let other = locks.clone();
        let waiter = tokio::spawn(async move {
            let _g = other.lock("c1").await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        // A different cluster is not blocked
        let _c2 = locks.lock("c2").await;

        drop(guard);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_forget_keeps_contended_lock() {
        let locks = Arc::new(ClusterLocks::new());
        let guard = locks.lock("c1").await;

        let other = locks.clone();
        let (entered_tx, mut entered_rx) = tokio::sync::mpsc::channel(1);
        let waiter = tokio::spawn(async move {
            let _g = other.lock("c1").await;
            entered_tx.send(()).await.unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        drop(guard);
        // The waiter still holds the mutex, so it must stay shared
        assert!(!locks.forget("c1"));
        entered_rx.recv().await.unwrap();

        let late = locks.clone();
        let third = tokio::spawn(async move {
            let _g = late.lock("c1").await;
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!third.is_finished());

        waiter.await.unwrap();
        third.await.unwrap();
        assert!(locks.forget("c1"));
        assert!(!locks.forget("c1"));
    }
}
