//! Shards, logical servers and pool keys

use crate::config::{ConfigCandidates, ConfigOverride, DatabaseConfig};
use crate::environment::Environment;
use crate::{Result, RouterError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Shard identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShardId(pub u64);

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A named backend grouping one or more shards
#[derive(Debug, Clone)]
pub struct DatabaseServer {
    id: String,
    shareable: bool,
    pool_key: String,
    environments: HashMap<Environment, ConfigCandidates>,
}

impl DatabaseServer {
    pub fn new(id: &str, shareable: bool) -> Self {
        Self {
            id: id.to_string(),
            shareable,
            pool_key: id.to_string(),
            environments: HashMap::new(),
        }
    }

    pub fn with_pool_key(mut self, pool_key: &str) -> Self {
        self.pool_key = pool_key.to_string();
        self
    }

    pub fn with_config(mut self, environment: Environment, candidates: ConfigCandidates) -> Self {
        self.environments.insert(environment, candidates);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether all shards on this server may share one pool per environment
    pub fn is_shareable(&self) -> bool {
        self.shareable
    }

    pub fn pool_key(&self) -> &str {
        &self.pool_key
    }

    /// Configuration candidates for an environment. Environments without
    /// their own entry use the primary configuration.
    pub fn config_for(&self, environment: Environment) -> Option<&ConfigCandidates> {
        self.environments
            .get(&environment)
            .or_else(|| self.environments.get(&Environment::Primary))
    }

    /// The configuration regular pool creation uses for `environment`
    pub fn primary_config_for(&self, environment: Environment) -> Result<&DatabaseConfig> {
        self.config_for(environment)
            .and_then(ConfigCandidates::first)
            .ok_or_else(|| {
                RouterError::configuration_error(
                    format!("servers.{}.environments.{}", self.id, environment),
                    "No configuration available".to_string(),
                )
            })
    }
}

impl PartialEq for DatabaseServer {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for DatabaseServer {}

/// A logical slice of data routed to a server
#[derive(Debug, Clone)]
pub struct Shard {
    id: ShardId,
    name: String,
    server: Arc<DatabaseServer>,
    config_override: Option<ConfigOverride>,
}

impl Shard {
    pub fn new(id: ShardId, name: &str, server: Arc<DatabaseServer>) -> Self {
        Self {
            id,
            name: name.to_string(),
            server,
            config_override: None,
        }
    }

    pub fn with_override(mut self, overrides: ConfigOverride) -> Self {
        self.config_override = Some(overrides);
        self
    }

    pub fn id(&self) -> ShardId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn server(&self) -> &Arc<DatabaseServer> {
        &self.server
    }

    pub fn config_override(&self) -> Option<&ConfigOverride> {
        self.config_override.as_ref()
    }

    /// Whether both shards live on the same logical server
    pub fn shares_server_with(&self, other: &Shard) -> bool {
        self.server == other.server
    }
}

impl PartialEq for Shard {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Shard {}

/// Grouping half of a [`PoolKey`]
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PoolGroup {
    /// All shards of a shareable server
    Server(String),
    /// A single shard of a non-shareable server
    Shard(ShardId),
}

/// Selects which pool serves a shard in an environment
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoolKey {
    pub environment: Environment,
    pub group: PoolGroup,
}

impl PoolKey {
    /// Shareable servers collapse to one key per environment; every other
    /// shard gets its own key.
    pub fn resolve(shard: &Shard, environment: Environment) -> Self {
        let server = shard.server();
        let group = if server.is_shareable() {
            PoolGroup::Server(server.pool_key().to_string())
        } else {
            PoolGroup::Shard(shard.id())
        };

        Self { environment, group }
    }
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.group {
            PoolGroup::Server(key) => write!(f, "{}/server:{}", self.environment, key),
            PoolGroup::Shard(id) => write!(f, "{}/shard:{}", self.environment, id),
        }
    }
}

/// All configured servers and shards
#[derive(Debug, Clone)]
pub struct Topology {
    servers: HashMap<String, Arc<DatabaseServer>>,
    shards: Vec<Arc<Shard>>,
    default_shard: Arc<Shard>,
}

impl Topology {
    pub fn new(
        servers: HashMap<String, Arc<DatabaseServer>>,
        shards: Vec<Arc<Shard>>,
        default_shard: ShardId,
    ) -> Result<Self> {
        let default_shard = shards
            .iter()
            .find(|shard| shard.id() == default_shard)
            .cloned()
            .ok_or_else(|| {
                RouterError::configuration_error(
                    "default.shard".to_string(),
                    format!("Default shard {} is not configured", default_shard),
                )
            })?;

        Ok(Self {
            servers,
            shards,
            default_shard,
        })
    }

    pub fn default_shard(&self) -> &Arc<Shard> {
        &self.default_shard
    }

    pub fn shard(&self, id: ShardId) -> Option<&Arc<Shard>> {
        self.shards.iter().find(|shard| shard.id() == id)
    }

    pub fn shards(&self) -> &[Arc<Shard>] {
        &self.shards
    }

    pub fn server(&self, id: &str) -> Option<&Arc<DatabaseServer>> {
        self.servers.get(id)
    }
}
