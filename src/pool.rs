//! Driver pool contract and the shard-bound pool wrapper
//!
//! This module provides:
//! - The [`ConnectionPool`] trait every driver pool implements
//! - The [`PoolDriver`] trait that opens driver pools from a connection spec
//! - [`ShardPool`], which binds a driver pool to the shard it last served
//!   and classifies driver errors into the router's error categories
//! - Per-pool connection statistics

use crate::config::DatabaseConfig;
use crate::factory::ConnectionSpec;
use crate::topology::Shard;
use crate::{Result, RouterError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Result of a raw driver call
pub type DriverResult<T> = std::result::Result<T, sqlx::Error>;

/// Operations the router needs from an underlying connection pool.
///
/// Queueing, connection limits and timeouts are the driver's business.
#[async_trait]
pub trait ConnectionPool: Send + Sync + 'static {
    /// Live connection handed to callers
    type Connection: Send;

    /// Acquire a connection for `shard`. May block waiting for a free
    /// connection.
    async fn acquire(&self, shard: &Shard) -> DriverResult<Self::Connection>;

    /// Return connections held on behalf of the caller
    async fn release_connection(&self) -> DriverResult<()>;

    /// Close every connection; the pool is unusable afterwards
    async fn disconnect(&self) -> DriverResult<()>;

    /// Check that pooled connections are still alive
    async fn verify_active_connections(&self) -> DriverResult<()>;

    /// Drop connections that must be re-established after a reload
    async fn clear_reloadable_connections(&self) -> DriverResult<()>;

    /// Drop cached connections whose owners are gone
    async fn clear_stale_cached_connections(&self) -> DriverResult<()>;

    /// Whether `err` means the backend could not be reached or used
    fn is_connectivity_failure(&self, err: &sqlx::Error) -> bool {
        is_connectivity_failure(err)
    }
}

/// Opens driver pools for one adapter
pub trait PoolDriver: Send + Sync + 'static {
    type Pool: ConnectionPool;

    /// Adapter name this driver serves (matches `DatabaseConfig::adapter`)
    fn adapter(&self) -> &str;

    /// Instantiate a new pool. Must not block on network I/O.
    fn open(&self, spec: &ConnectionSpec) -> Result<Self::Pool>;
}

/// Default connectivity classification shared by sqlx drivers: transport,
/// TLS and pool-state errors, plus SQLSTATE class 08 (connection exception).
pub fn is_connectivity_failure(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db) => db
            .code()
            .map(|code| code.starts_with("08"))
            .unwrap_or(false),
        _ => false,
    }
}

/// Connection statistics for one pool
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    /// Successful acquisitions
    pub total_connections_acquired: u64,
    /// Failed acquisitions
    pub total_connection_failures: u64,
    /// Times the pool was bound to a shard
    pub total_rebinds: u64,
    /// Last successful acquisition
    pub last_successful_connection: Option<DateTime<Utc>>,
    /// Last failed acquisition
    pub last_failed_connection: Option<DateTime<Utc>>,
    /// Acquisition success rate (percentage)
    pub connection_success_rate: f64,
}

impl Default for PoolStats {
    fn default() -> Self {
        Self {
            total_connections_acquired: 0,
            total_connection_failures: 0,
            total_rebinds: 0,
            last_successful_connection: None,
            last_failed_connection: None,
            connection_success_rate: 100.0,
        }
    }
}

impl PoolStats {
    /// Update connection statistics
    pub fn record_connection_attempt(&mut self, success: bool) {
        let now = Utc::now();

        if success {
            self.total_connections_acquired += 1;
            self.last_successful_connection = Some(now);
        } else {
            self.total_connection_failures += 1;
            self.last_failed_connection = Some(now);
        }

        let total_attempts = self.total_connections_acquired + self.total_connection_failures;
        if total_attempts > 0 {
            self.connection_success_rate =
                (self.total_connections_acquired as f64 / total_attempts as f64) * 100.0;
        }
    }
}

/// A driver pool bound to the shard it currently serves
pub struct ShardPool<P: ConnectionPool> {
    inner: P,
    config: DatabaseConfig,
    bound_shard: RwLock<Arc<Shard>>,
    stats: RwLock<PoolStats>,
    created_at: DateTime<Utc>,
}

impl<P: ConnectionPool> ShardPool<P> {
    /// Wrap `inner`, opened from `config`, bound to `shard`
    pub fn new(inner: P, config: DatabaseConfig, shard: Arc<Shard>) -> Self {
        Self {
            inner,
            config,
            bound_shard: RwLock::new(shard),
            stats: RwLock::new(PoolStats::default()),
            created_at: Utc::now(),
        }
    }

    /// Resolved configuration this pool was opened from
    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Rebind to `shard`
    pub async fn bind(&self, shard: Arc<Shard>) {
        let mut bound = self.bound_shard.write().await;
        if bound.id() != shard.id() {
            debug!(
                "Rebinding pool {} from shard {} to shard {}",
                self.config.masked_connection_url(),
                bound.id(),
                shard.id()
            );
        }
        *bound = shard;
        self.stats.write().await.total_rebinds += 1;
    }

    /// Shard this pool was last bound to
    pub async fn bound_shard(&self) -> Arc<Shard> {
        Arc::clone(&*self.bound_shard.read().await)
    }

    pub async fn stats(&self) -> PoolStats {
        self.stats.read().await.clone()
    }

    /// Acquire a connection for `shard`.
    ///
    /// The shard is passed explicitly so a concurrent rebind cannot change
    /// which shard this acquisition serves.
    pub async fn acquire(&self, shard: &Shard) -> Result<P::Connection> {
        let result = self.inner.acquire(shard).await;
        self.stats.write().await.record_connection_attempt(result.is_ok());

        result.map_err(|e| self.classify("acquire", e))
    }

    pub async fn release_connection(&self) -> Result<()> {
        self.inner
            .release_connection()
            .await
            .map_err(|e| self.classify("release_connection", e))
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.inner
            .disconnect()
            .await
            .map_err(|e| self.classify("disconnect", e))
    }

    pub async fn verify_active_connections(&self) -> Result<()> {
        self.inner
            .verify_active_connections()
            .await
            .map_err(|e| self.classify("verify_active_connections", e))
    }

    pub async fn clear_reloadable_connections(&self) -> Result<()> {
        self.inner
            .clear_reloadable_connections()
            .await
            .map_err(|e| self.classify("clear_reloadable_connections", e))
    }

    pub async fn clear_stale_cached_connections(&self) -> Result<()> {
        self.inner
            .clear_stale_cached_connections()
            .await
            .map_err(|e| self.classify("clear_stale_cached_connections", e))
    }

    fn classify(&self, operation: &str, err: sqlx::Error) -> RouterError {
        RouterError::from_driver(operation, err, |e| self.inner.is_connectivity_failure(e))
    }
}

impl<P: ConnectionPool> std::fmt::Debug for ShardPool<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardPool")
            .field("url", &self.config.masked_connection_url())
            .field("created_at", &self.created_at)
            .finish()
    }
}
