use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

/// Exclusive locks over calendar-day buckets of the master event table.
///
/// Single merges hold the shared table lock plus their window's bucket
/// locks. Operations that rewrite arbitrary buckets (clear, batch
/// deduplication) take the table lock exclusively.
#[derive(Default)]
pub struct BucketLocks {
    table: Arc<RwLock<()>>,
    buckets: Mutex<HashMap<NaiveDate, Arc<AsyncMutex<()>>>>,
}

pub struct BucketGuard {
    // Field order matters: bucket guards drop before the table guard.
    _buckets: Vec<OwnedMutexGuard<()>>,
    _table: OwnedRwLockReadGuard<()>,
}

pub struct TableGuard {
    _table: OwnedRwLockWriteGuard<()>,
}

impl BucketLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks `buckets` in ascending order so overlapping windows cannot deadlock.
    pub async fn lock_buckets(&self, buckets: &[NaiveDate]) -> BucketGuard {
        let table = Arc::clone(&self.table).read_owned().await;

        let mut wanted = buckets.to_vec();
        wanted.sort();
        wanted.dedup();

        let mutexes: Vec<Arc<AsyncMutex<()>>> = {
            let mut map = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
            map.retain(|_, m| Arc::strong_count(m) > 1);
            wanted
                .iter()
                .map(|day| Arc::clone(map.entry(*day).or_default()))
                .collect()
        };

        let mut guards = Vec::with_capacity(mutexes.len());
        for mutex in mutexes {
            guards.push(mutex.lock_owned().await);
        }

        BucketGuard {
            _buckets: guards,
            _table: table,
        }
    }

    pub async fn lock_table(&self) -> TableGuard {
        TableGuard {
            _table: Arc::clone(&self.table).write_owned().await,
        }
    }
}
