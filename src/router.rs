//! Connection router for shard-aware pool selection
//!
//! This module provides the ConnectionRouter component that handles:
//! - Choosing between the default pool and a registry-managed pool
//! - Rebinding the chosen pool to the active shard
//! - Failing over to alternate server configurations when a connection
//!   cannot be acquired
//! - Bulk lifecycle operations across every registered pool

use crate::config::{ConfigCandidates, DatabaseConfig};
use crate::context::ShardContext;
use crate::environment::Environment;
use crate::factory::PoolFactory;
use crate::pool::{ConnectionPool, PoolDriver, PoolStats, ShardPool};
use crate::registry::PoolRegistry;
use crate::topology::{PoolKey, Shard, ShardId};
use crate::{Result, RouterError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

type Connection<D> = <<D as PoolDriver>::Pool as ConnectionPool>::Connection;
type SharedPool<D> = Arc<ShardPool<<D as PoolDriver>::Pool>>;

/// Shard, environment and default-server facts captured once per call
struct Resolution {
    shard: Arc<Shard>,
    environment: Environment,
    is_default_shard: bool,
    on_default_server: bool,
}

impl Resolution {
    fn key(&self) -> PoolKey {
        PoolKey::resolve(&self.shard, self.environment)
    }

    /// The default pool serves the primary of a shareable default server
    fn uses_default_pool(&self) -> bool {
        self.on_default_server
            && self.environment.is_primary()
            && self.shard.server().is_shareable()
    }
}

/// Registered pool summary for status output
#[derive(Debug, Clone, Serialize)]
pub struct PoolReport {
    pub key: String,
    pub url: String,
    pub bound_shard: ShardId,
    pub created_at: DateTime<Utc>,
    pub stats: PoolStats,
}

/// Routes connection requests for one category to the right pool
pub struct ConnectionRouter<D: PoolDriver> {
    category: String,
    default_pool: SharedPool<D>,
    registry: Arc<PoolRegistry<D::Pool>>,
    factory: Arc<PoolFactory<D>>,
    context: Arc<dyn ShardContext>,
    isolated: bool,
}

impl<D: PoolDriver> Clone for ConnectionRouter<D> {
    fn clone(&self) -> Self {
        Self {
            category: self.category.clone(),
            default_pool: Arc::clone(&self.default_pool),
            registry: Arc::clone(&self.registry),
            factory: Arc::clone(&self.factory),
            context: Arc::clone(&self.context),
            isolated: self.isolated,
        }
    }
}

impl<D: PoolDriver> ConnectionRouter<D> {
    /// Create a new router
    pub fn new(
        category: &str,
        default_pool: SharedPool<D>,
        registry: Arc<PoolRegistry<D::Pool>>,
        factory: Arc<PoolFactory<D>>,
        context: Arc<dyn ShardContext>,
    ) -> Self {
        Self {
            category: category.to_string(),
            default_pool,
            registry,
            factory,
            context,
            isolated: false,
        }
    }

    /// In isolated (test) execution every operation routes to the primary
    pub fn with_isolated_environment(mut self, isolated: bool) -> Self {
        self.isolated = isolated;
        self
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn default_pool(&self) -> &SharedPool<D> {
        &self.default_pool
    }

    pub fn registry(&self) -> &Arc<PoolRegistry<D::Pool>> {
        &self.registry
    }

    /// Currently active shard
    pub fn active_shard(&self) -> Arc<Shard> {
        self.context.active_shard()
    }

    /// Currently active environment
    pub fn active_environment(&self) -> Environment {
        if self.isolated {
            Environment::Primary
        } else {
            self.context.active_environment()
        }
    }

    /// Pool key for the active shard and environment
    pub fn pool_key(&self) -> PoolKey {
        self.resolve().key()
    }

    fn resolve(&self) -> Resolution {
        let shard = self.context.active_shard();
        let default_shard = self.context.default_shard();

        Resolution {
            environment: self.active_environment(),
            is_default_shard: *shard == *default_shard,
            on_default_server: shard.shares_server_with(&default_shard),
            shard,
        }
    }

    /// Pool backing the next operation, bound to the active shard
    pub async fn current_pool(&self) -> Result<SharedPool<D>> {
        let resolution = self.resolve();
        self.pool_for(&resolution).await
    }

    async fn pool_for(&self, resolution: &Resolution) -> Result<SharedPool<D>> {
        let pool = if resolution.uses_default_pool() {
            Arc::clone(&self.default_pool)
        } else {
            let key = resolution.key();
            self.registry
                .get_or_try_insert_with(&key, || {
                    self.factory.create_pool(
                        Arc::clone(&resolution.shard),
                        resolution.environment,
                        resolution.is_default_shard,
                        &self.default_pool,
                    )
                })
                .await?
        };

        pool.bind(Arc::clone(&resolution.shard)).await;
        Ok(pool)
    }

    /// Resolved configuration of the current pool
    pub async fn config(&self) -> Result<DatabaseConfig> {
        Ok(self.current_pool().await?.config().clone())
    }

    /// Acquire a live connection for the active shard, failing over to
    /// alternate configurations on connectivity failures
    pub async fn connection(&self) -> Result<Connection<D>> {
        let resolution = self.resolve();
        let pool = self.pool_for(&resolution).await?;

        match pool.acquire(&resolution.shard).await {
            Ok(conn) => Ok(conn),
            Err(err) if err.is_connectivity_failure() => self.fail_over(&resolution, err).await,
            Err(err) => Err(err),
        }
    }

    async fn fail_over(&self, resolution: &Resolution, err: RouterError) -> Result<Connection<D>> {
        let shard = &resolution.shard;
        let environment = resolution.environment;

        if resolution.on_default_server && environment.is_primary() {
            warn!(
                "[{}] Connection to primary of default server '{}' failed; not failing over",
                self.category,
                shard.server().id()
            );
            return Err(err);
        }

        let candidates = match shard
            .server()
            .config_for(environment)
            .and_then(ConfigCandidates::failover_candidates)
        {
            Some(candidates) => candidates,
            None => {
                debug!(
                    "[{}] Server '{}' has a single {} configuration; nothing to fail over to",
                    self.category,
                    shard.server().id(),
                    environment
                );
                return Err(err);
            }
        };

        let key = resolution.key();
        let last = candidates.len() - 1;
        warn!(
            "[{}] Failing over pool {} across {} candidate configurations",
            self.category,
            key,
            candidates.len()
        );

        for (idx, config) in candidates.iter().enumerate() {
            let pool = self
                .factory
                .create_pool_with_config(Arc::clone(shard), config.clone())?;

            match pool.acquire(shard).await {
                Ok(conn) => {
                    info!(
                        "[{}] Candidate {} ({}) accepted connections; installed as {}",
                        self.category,
                        idx,
                        config.masked_connection_url(),
                        key
                    );
                    self.registry.insert(key, Arc::new(pool)).await;
                    return Ok(conn);
                }
                Err(e) if e.is_connectivity_failure() && idx < last => {
                    warn!(
                        "[{}] Candidate {} ({}) failed: {}",
                        self.category,
                        idx,
                        config.masked_connection_url(),
                        e
                    );
                }
                Err(e) => return Err(e),
            }
        }

        Err(err)
    }

    /// Release connections held by every registered pool
    pub async fn release_connection(&self) -> Result<()> {
        let pools = self.registry.snapshot().await;
        self.broadcast("release_connection", pools, |pool| async move {
            pool.release_connection().await
        })
        .await
    }

    /// Disconnect every registered pool. The registry is emptied first so
    /// later resolutions open fresh pools.
    pub async fn disconnect(&self) -> Result<()> {
        let pools = self.registry.drain().await;
        self.broadcast("disconnect", pools, |pool| async move { pool.disconnect().await })
            .await
    }

    pub async fn clear_reloadable_connections(&self) -> Result<()> {
        let pools = self.registry.snapshot().await;
        self.broadcast("clear_reloadable_connections", pools, |pool| async move {
            pool.clear_reloadable_connections().await
        })
        .await
    }

    pub async fn verify_active_connections(&self) -> Result<()> {
        let pools = self.registry.snapshot().await;
        self.broadcast("verify_active_connections", pools, |pool| async move {
            pool.verify_active_connections().await
        })
        .await
    }

    pub async fn clear_stale_cached_connections(&self) -> Result<()> {
        let pools = self.registry.snapshot().await;
        self.broadcast("clear_stale_cached_connections", pools, |pool| async move {
            pool.clear_stale_cached_connections().await
        })
        .await
    }

    /// Apply `op` to every pool; failures are collected, not short-circuited
    async fn broadcast<F, Fut>(
        &self,
        operation: &str,
        pools: Vec<(PoolKey, SharedPool<D>)>,
        op: F,
    ) -> Result<()>
    where
        F: Fn(SharedPool<D>) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let total = pools.len();
        let mut failures = Vec::new();

        for (key, pool) in pools {
            if let Err(e) = op(pool).await {
                warn!("[{}] {} failed for pool {}: {}", self.category, operation, key, e);
                failures.push((key.to_string(), e));
            }
        }

        if failures.is_empty() {
            debug!("[{}] {} applied to {} pool(s)", self.category, operation, total);
            Ok(())
        } else {
            Err(RouterError::lifecycle_error(operation.to_string(), failures))
        }
    }

    /// Connection statistics of every registered pool
    pub async fn pool_stats(&self) -> Vec<(PoolKey, PoolStats)> {
        self.registry.stats().await
    }

    /// Summary of every registered pool
    pub async fn pool_reports(&self) -> Vec<PoolReport> {
        let mut reports = Vec::new();
        for (key, pool) in self.registry.snapshot().await {
            reports.push(PoolReport {
                key: key.to_string(),
                url: pool.config().masked_connection_url(),
                bound_shard: pool.bound_shard().await.id(),
                created_at: pool.created_at(),
                stats: pool.stats().await,
            });
        }
        reports
    }
}
