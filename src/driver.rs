//! sqlx MySQL driver adapter

use crate::factory::ConnectionSpec;
use crate::pool::{ConnectionPool, DriverResult, PoolDriver};
use crate::topology::Shard;
use crate::Result;
use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlDatabaseError, MySqlPool, MySqlPoolOptions};
use sqlx::pool::PoolConnection;
use sqlx::{Connection, MySql};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// MySQL server and client error numbers that mean the server is unreachable
/// or went away: too many connections, shutdown in progress, can't connect
/// (socket/TCP), server gone away, lost connection during query.
const MYSQL_CONNECTIVITY_ERRORS: [u16; 6] = [1040, 1053, 2002, 2003, 2006, 2013];

/// Opens lazily connecting sqlx MySQL pools
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlDriver;

impl PoolDriver for MySqlDriver {
    type Pool = MySqlPoolHandle;

    fn adapter(&self) -> &str {
        "mysql"
    }

    /// No connection is made until the first acquisition. Must be called
    /// from within a tokio runtime.
    fn open(&self, spec: &ConnectionSpec) -> Result<MySqlPoolHandle> {
        let config = spec.config();
        let connect_options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.username)
            .password(&config.password)
            .database(&config.database);

        Ok(MySqlPoolHandle::new(
            connect_options,
            spec.max_connections(),
            spec.connect_timeout(),
        ))
    }
}

/// A sqlx MySQL pool that can be replaced in place when its connections
/// have to be re-established
pub struct MySqlPoolHandle {
    pool: RwLock<MySqlPool>,
    connect_options: MySqlConnectOptions,
    max_connections: u32,
    acquire_timeout: Duration,
}

impl MySqlPoolHandle {
    fn new(
        connect_options: MySqlConnectOptions,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Self {
        let pool = Self::lazy_pool(&connect_options, max_connections, acquire_timeout);
        Self {
            pool: RwLock::new(pool),
            connect_options,
            max_connections,
            acquire_timeout,
        }
    }

    fn lazy_pool(
        options: &MySqlConnectOptions,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> MySqlPool {
        MySqlPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect_lazy_with(options.clone())
    }

    /// The sqlx pool currently in use
    pub async fn current(&self) -> MySqlPool {
        self.pool.read().await.clone()
    }

    async fn replace_pool(&self) {
        let fresh = Self::lazy_pool(
            &self.connect_options,
            self.max_connections,
            self.acquire_timeout,
        );
        let old = std::mem::replace(&mut *self.pool.write().await, fresh);
        old.close().await;
    }
}

#[async_trait]
impl ConnectionPool for MySqlPoolHandle {
    type Connection = PoolConnection<MySql>;

    async fn acquire(&self, shard: &Shard) -> DriverResult<PoolConnection<MySql>> {
        let pool = self.current().await;
        let conn = pool.acquire().await?;
        debug!(
            "Acquired MySQL connection for shard {} ({} open, {} idle)",
            shard.id(),
            pool.size(),
            pool.num_idle()
        );
        Ok(conn)
    }

    async fn release_connection(&self) -> DriverResult<()> {
        // sqlx connections go back to the pool when dropped
        Ok(())
    }

    async fn disconnect(&self) -> DriverResult<()> {
        let pool = self.current().await;
        let open = pool.size();
        pool.close().await;
        info!("Closed MySQL pool ({} connections)", open);
        Ok(())
    }

    async fn verify_active_connections(&self) -> DriverResult<()> {
        let pool = self.current().await;
        if pool.size() == 0 {
            return Ok(());
        }

        let mut conn = pool.acquire().await?;
        conn.ping().await
    }

    async fn clear_reloadable_connections(&self) -> DriverResult<()> {
        self.replace_pool().await;
        debug!("Replaced MySQL pool to clear reloadable connections");
        Ok(())
    }

    async fn clear_stale_cached_connections(&self) -> DriverResult<()> {
        if self.current().await.is_closed() {
            self.replace_pool().await;
            debug!("Replaced closed MySQL pool");
        }
        Ok(())
    }

    fn is_connectivity_failure(&self, err: &sqlx::Error) -> bool {
        if crate::pool::is_connectivity_failure(err) {
            return true;
        }

        match err {
            sqlx::Error::Database(db) => db
                .try_downcast_ref::<MySqlDatabaseError>()
                .map(|e| MYSQL_CONNECTIVITY_ERRORS.contains(&e.number()))
                .unwrap_or(false),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::pool::ShardPool;
    use crate::topology::{DatabaseServer, ShardId};
    use std::sync::Arc;

    fn spec(host: &str, port: u16) -> ConnectionSpec {
        let mut config = DatabaseConfig::new(host, "app", "app");
        config.port = port;
        config.connection_timeout = 1;
        ConnectionSpec::new(config).unwrap()
    }

    fn shard() -> Arc<Shard> {
        let server = Arc::new(DatabaseServer::new("main", true));
        Arc::new(Shard::new(ShardId(1), "default", server))
    }

    #[tokio::test]
    async fn test_open_is_lazy() {
        let handle = MySqlDriver.open(&spec("db.invalid", 3306)).unwrap();
        let pool = handle.current().await;

        assert_eq!(pool.size(), 0);
        assert!(!pool.is_closed());
        assert!(handle.verify_active_connections().await.is_ok());
    }

    #[tokio::test]
    async fn test_disconnect_then_clear_stale_reopens() {
        let handle = MySqlDriver.open(&spec("db.invalid", 3306)).unwrap();

        handle.disconnect().await.unwrap();
        assert!(handle.current().await.is_closed());

        handle.clear_stale_cached_connections().await.unwrap();
        assert!(!handle.current().await.is_closed());
    }

    #[tokio::test]
    async fn test_clear_reloadable_swaps_pool() {
        let handle = MySqlDriver.open(&spec("db.invalid", 3306)).unwrap();
        let before = handle.current().await;

        handle.clear_reloadable_connections().await.unwrap();

        assert!(before.is_closed());
        assert!(!handle.current().await.is_closed());
    }

    #[tokio::test]
    async fn test_unreachable_server_is_connectivity_failure() {
        let spec = spec("127.0.0.1", 1);
        let handle = MySqlDriver.open(&spec).unwrap();
        let pool = ShardPool::new(handle, spec.config().clone(), shard());

        let err = pool.acquire(&shard()).await.unwrap_err();
        assert!(err.is_connectivity_failure());
    }

    #[test]
    fn test_classification_covers_transport_errors() {
        let refused = sqlx::Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "refused",
        ));
        assert!(crate::pool::is_connectivity_failure(&refused));
        assert!(!crate::pool::is_connectivity_failure(&sqlx::Error::ColumnNotFound(
            "id".to_string()
        )));
    }
}
