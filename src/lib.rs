//! Shard Pool Router
//!
//! Shard-aware connection pool routing for MySQL: picks the pool that serves
//! the active shard and environment, fails over across alternate server
//! configurations, and broadcasts lifecycle operations to every pool.

pub mod config;
pub mod context;
pub mod driver;
pub mod environment;
pub mod error;
pub mod factory;
pub mod pool;
pub mod registry;
pub mod router;
pub mod topology;

pub use config::{Config, ConfigCandidates, ConfigOverride, DatabaseConfig};
pub use context::{ShardContext, TaskShardContext};
pub use driver::{MySqlDriver, MySqlPoolHandle};
pub use environment::Environment;
pub use error::{Result, RouterError};
pub use factory::{ConnectionSpec, PoolFactory};
pub use pool::{ConnectionPool, PoolDriver, PoolStats, ShardPool};
pub use registry::PoolRegistry;
pub use router::{ConnectionRouter, PoolReport};
pub use topology::{DatabaseServer, PoolGroup, PoolKey, Shard, ShardId, Topology};
