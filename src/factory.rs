//! Pool factory: resolves the effective configuration for a shard and opens
//! a new driver pool bound to it

use crate::config::DatabaseConfig;
use crate::environment::Environment;
use crate::pool::{PoolDriver, ShardPool};
use crate::topology::Shard;
use crate::{Result, RouterError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Driver connection specification built from a resolved configuration
#[derive(Debug, Clone)]
pub struct ConnectionSpec {
    config: DatabaseConfig,
    adapter_method: String,
}

impl ConnectionSpec {
    /// Validate `config` and derive a connection spec from it
    pub fn new(config: DatabaseConfig) -> Result<Self> {
        config.validate("connection_spec")?;
        let adapter_method = format!("{}_connection", config.adapter);

        Ok(Self {
            config,
            adapter_method,
        })
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn adapter(&self) -> &str {
        &self.config.adapter
    }

    /// Name of the driver entry point, e.g. `mysql_connection`
    pub fn adapter_method(&self) -> &str {
        &self.adapter_method
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.config.connection_timeout)
    }

    pub fn max_connections(&self) -> u32 {
        self.config.max_connections
    }

    pub fn masked_url(&self) -> String {
        self.config.masked_connection_url()
    }
}

/// Creates pools for shards through a [`PoolDriver`]
pub struct PoolFactory<D: PoolDriver> {
    driver: D,
}

impl<D: PoolDriver> PoolFactory<D> {
    pub fn new(driver: D) -> Self {
        Self { driver }
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Effective configuration for `shard` in `environment`.
    ///
    /// Non-default shards use the first configuration their server lists for
    /// the environment, with the shard override applied. The default shard
    /// uses the default pool's configuration merged with its sub-record for
    /// the environment.
    pub fn resolve_config(
        &self,
        shard: &Shard,
        environment: Environment,
        is_default_shard: bool,
        default_pool: &ShardPool<D::Pool>,
    ) -> Result<DatabaseConfig> {
        if is_default_shard {
            return Ok(default_pool.config().merged_for(environment));
        }

        let config = shard.server().primary_config_for(environment)?;
        Ok(match shard.config_override() {
            Some(overrides) => config.with_override(overrides),
            None => config.clone(),
        })
    }

    /// Create a pool with a derived configuration
    pub fn create_pool(
        &self,
        shard: Arc<Shard>,
        environment: Environment,
        is_default_shard: bool,
        default_pool: &ShardPool<D::Pool>,
    ) -> Result<ShardPool<D::Pool>> {
        let config = self.resolve_config(&shard, environment, is_default_shard, default_pool)?;
        debug!(
            "Resolved {} configuration for shard {}: {}",
            environment,
            shard.id(),
            config.masked_connection_url()
        );
        self.create_pool_with_config(shard, config)
    }

    /// Open the default pool: the default shard's server primary
    /// configuration, with the shard override applied
    pub fn create_default_pool(&self, default_shard: Arc<Shard>) -> Result<ShardPool<D::Pool>> {
        let config = default_shard.server().primary_config_for(Environment::Primary)?;
        let config = match default_shard.config_override() {
            Some(overrides) => config.with_override(overrides),
            None => config.clone(),
        };
        self.create_pool_with_config(default_shard, config)
    }

    /// Create a pool from an explicit configuration
    pub fn create_pool_with_config(
        &self,
        shard: Arc<Shard>,
        config: DatabaseConfig,
    ) -> Result<ShardPool<D::Pool>> {
        let spec = ConnectionSpec::new(config)?;

        if spec.adapter() != self.driver.adapter() {
            return Err(RouterError::configuration_error(
                "adapter".to_string(),
                format!(
                    "Adapter '{}' is not served by the '{}' driver",
                    spec.adapter(),
                    self.driver.adapter()
                ),
            ));
        }

        let pool = self.driver.open(&spec)?;
        info!(
            "Created connection pool {} for shard {} ({})",
            spec.masked_url(),
            shard.id(),
            spec.adapter_method()
        );

        Ok(ShardPool::new(pool, spec.config, shard))
    }
}
