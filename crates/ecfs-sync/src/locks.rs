//! Per-key transfer locks.
//!
//! Keys are an item uuid for downloads and `local_path + parent` for
//! uploads. Entries are created lazily and never evicted: the table grows by
//! one small mutex per distinct key ever transferred.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Default)]
pub struct TransferLocks {
    table: DashMap<String, Arc<Mutex<()>>>,
}

impl TransferLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other transfer holds `key`. Released on guard drop.
    pub async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .table
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Lock-table key for an upload.
    pub fn upload_key(local_path: &std::path::Path, parent: &str) -> String {
        format!("{}:{parent}", local_path.display())
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_key_is_exclusive() {
        let locks = Arc::new(TransferLocks::new());
        let guard = locks.acquire("item").await;

        let l2 = locks.clone();
        let waiter = tokio::spawn(async move {
            let _g = l2.acquire("item").await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn different_keys_do_not_block() {
        let locks = TransferLocks::new();
        let _a = locks.acquire("a").await;
        let _b = tokio::time::timeout(Duration::from_secs(1), locks.acquire("b"))
            .await
            .expect("independent key must not block");
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn entries_are_retained() {
        let locks = TransferLocks::new();
        drop(locks.acquire("x").await);
        assert_eq!(locks.len(), 1);
    }
}
