//! Process-wide pool registry keyed by [`PoolKey`]

use crate::pool::{ConnectionPool, PoolStats, ShardPool};
use crate::topology::PoolKey;
use crate::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Holds at most one live pool per key. Created at application start and
/// shared by every router that serves the same category.
pub struct PoolRegistry<P: ConnectionPool> {
    pools: RwLock<HashMap<PoolKey, Arc<ShardPool<P>>>>,
}

impl<P: ConnectionPool> PoolRegistry<P> {
    pub fn new() -> Self {
        Self {
            pools: RwLock::new(HashMap::new()),
        }
    }

    /// Return the pool for `key`, creating it with `create` on first access.
    ///
    /// Creation runs under the write lock, so concurrent first accesses
    /// observe a single pool. A failed creation leaves no entry behind.
    pub async fn get_or_try_insert_with<F>(
        &self,
        key: &PoolKey,
        create: F,
    ) -> Result<Arc<ShardPool<P>>>
    where
        F: FnOnce() -> Result<ShardPool<P>>,
    {
        if let Some(pool) = self.pools.read().await.get(key) {
            return Ok(Arc::clone(pool));
        }

        let mut pools = self.pools.write().await;
        if let Some(pool) = pools.get(key) {
            return Ok(Arc::clone(pool));
        }

        let pool = Arc::new(create()?);
        pools.insert(key.clone(), Arc::clone(&pool));
        info!("Registered pool {} ({} total)", key, pools.len());

        Ok(pool)
    }

    /// Install `pool` under `key`, returning the entry it replaced
    pub async fn insert(
        &self,
        key: PoolKey,
        pool: Arc<ShardPool<P>>,
    ) -> Option<Arc<ShardPool<P>>> {
        let replaced = self.pools.write().await.insert(key.clone(), pool);
        if replaced.is_some() {
            debug!("Replaced registered pool {}", key);
        }
        replaced
    }

    pub async fn get(&self, key: &PoolKey) -> Option<Arc<ShardPool<P>>> {
        self.pools.read().await.get(key).cloned()
    }

    pub async fn remove(&self, key: &PoolKey) -> Option<Arc<ShardPool<P>>> {
        self.pools.write().await.remove(key)
    }

    /// Pools registered right now
    pub async fn snapshot(&self) -> Vec<(PoolKey, Arc<ShardPool<P>>)> {
        let pools = self.pools.read().await;
        let mut entries: Vec<_> = pools
            .iter()
            .map(|(key, pool)| (key.clone(), Arc::clone(pool)))
            .collect();
        entries.sort_by(|(a, _), (b, _)| a.cmp(b));
        entries
    }

    /// Remove and return every registered pool
    pub async fn drain(&self) -> Vec<(PoolKey, Arc<ShardPool<P>>)> {
        let mut entries: Vec<_> = self.pools.write().await.drain().collect();
        entries.sort_by(|(a, _), (b, _)| a.cmp(b));
        entries
    }

    pub async fn len(&self) -> usize {
        self.pools.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.pools.read().await.is_empty()
    }

    /// Statistics for every registered pool
    pub async fn stats(&self) -> Vec<(PoolKey, PoolStats)> {
        let mut all_stats = Vec::new();
        for (key, pool) in self.snapshot().await {
            all_stats.push((key, pool.stats().await));
        }
        all_stats
    }
}

impl<P: ConnectionPool> Default for PoolRegistry<P> {
    fn default() -> Self {
        Self::new()
    }
}
