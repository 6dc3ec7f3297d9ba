//! Configuration structures for the shard pool router

use crate::environment::Environment;
use crate::topology::{DatabaseServer, Shard, ShardId, Topology};
use crate::{Result, RouterError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// Complete router configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub router: RouterSettings,
    pub default: DefaultSection,
    pub servers: HashMap<String, ServerSection>,
    #[serde(default)]
    pub shards: Vec<ShardSection>,
}

/// Router settings section
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouterSettings {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Connection category served by this router
    #[serde(default = "default_category")]
    pub category: String,
    /// Isolated (test) execution: every operation routes to the primary
    #[serde(default)]
    pub isolated: bool,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            category: default_category(),
            isolated: false,
        }
    }
}

/// Identifies the default shard, whose server owns the default pool
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DefaultSection {
    pub shard: u64,
}

/// A logical server
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerSection {
    /// Whether all shards on this server may share one pool per environment
    #[serde(default = "default_shareable")]
    pub shareable: bool,
    /// Pool grouping key, defaults to the server id
    #[serde(default)]
    pub pool_key: Option<String>,
    /// Configuration candidates keyed by environment name
    pub environments: HashMap<String, ConfigCandidates>,
}

/// A shard (partition) hosted on a logical server
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ShardSection {
    pub id: u64,
    pub name: String,
    pub server: String,
    /// Shard-specific settings applied on top of the server configuration
    #[serde(default, rename = "override")]
    pub config_override: Option<ConfigOverride>,
}

/// Either a single configuration record or an ordered list of candidates,
/// primary first, fallbacks after
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(untagged)]
pub enum ConfigCandidates {
    Single(DatabaseConfig),
    List(Vec<DatabaseConfig>),
}

impl ConfigCandidates {
    /// The configuration used for regular pool creation
    pub fn first(&self) -> Option<&DatabaseConfig> {
        match self {
            ConfigCandidates::Single(config) => Some(config),
            ConfigCandidates::List(configs) => configs.first(),
        }
    }

    /// Ordered failover candidates. `None` unless more than one
    /// configuration exists.
    pub fn failover_candidates(&self) -> Option<&[DatabaseConfig]> {
        match self {
            ConfigCandidates::List(configs) if configs.len() > 1 => Some(configs.as_slice()),
            _ => None,
        }
    }

    /// Whether the candidates were declared as an ordered list
    pub fn is_list(&self) -> bool {
        matches!(self, ConfigCandidates::List(_))
    }

    pub fn len(&self) -> usize {
        match self {
            ConfigCandidates::Single(_) => 1,
            ConfigCandidates::List(configs) => configs.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn iter(&self) -> impl Iterator<Item = &DatabaseConfig> {
        let configs: &[DatabaseConfig] = match self {
            ConfigCandidates::Single(config) => std::slice::from_ref(config),
            ConfigCandidates::List(configs) => configs.as_slice(),
        };
        configs.iter()
    }
}

/// Database configuration record
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct DatabaseConfig {
    /// Driver adapter name (e.g., mysql)
    #[serde(default = "default_adapter")]
    pub adapter: String,
    /// Database host (e.g., localhost, 192.168.1.100)
    pub host: String,
    /// Database port (default: 3306)
    #[serde(default = "default_mysql_port")]
    pub port: u16,
    /// Database username
    pub username: String,
    /// Database password
    #[serde(default)]
    pub password: String,
    /// Database name
    pub database: String,
    /// Connection timeout in seconds
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout: u64,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Environment-specific sub-records merged over this record
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub environments: HashMap<String, ConfigOverride>,
}

impl DatabaseConfig {
    /// Create a MySQL configuration with default port, timeout and pool size
    pub fn new(host: &str, username: &str, database: &str) -> Self {
        Self {
            adapter: default_adapter(),
            host: host.to_string(),
            port: default_mysql_port(),
            username: username.to_string(),
            password: String::new(),
            database: database.to_string(),
            connection_timeout: default_connection_timeout(),
            max_connections: default_max_connections(),
            environments: HashMap::new(),
        }
    }

    /// Build connection URL from individual components
    pub fn build_connection_url(&self) -> String {
        format!(
            "{}://{}:{}@{}:{}/{}",
            self.adapter, self.username, self.password, self.host, self.port, self.database
        )
    }

    /// Get masked connection URL for logging (hides password)
    pub fn masked_connection_url(&self) -> String {
        format!(
            "{}://{}:****@{}:{}/{}",
            self.adapter, self.username, self.host, self.port, self.database
        )
    }

    /// Apply the non-empty fields of an override
    pub fn with_override(&self, overrides: &ConfigOverride) -> Self {
        let mut config = self.clone();
        if let Some(host) = &overrides.host {
            config.host = host.clone();
        }
        if let Some(port) = overrides.port {
            config.port = port;
        }
        if let Some(username) = &overrides.username {
            config.username = username.clone();
        }
        if let Some(password) = &overrides.password {
            config.password = password.clone();
        }
        if let Some(database) = &overrides.database {
            config.database = database.clone();
        }
        if let Some(timeout) = overrides.connection_timeout {
            config.connection_timeout = timeout;
        }
        if let Some(max) = overrides.max_connections {
            config.max_connections = max;
        }
        config
    }

    /// This record merged with its sub-record for `environment`, if any
    pub fn merged_for(&self, environment: Environment) -> Self {
        let sub_record = self
            .environments
            .iter()
            .find(|(name, _)| name.parse::<Environment>().ok() == Some(environment));

        match sub_record {
            Some((_, overrides)) => self.with_override(overrides),
            None => self.clone(),
        }
    }

    /// Validate a single record; `parameter` names it in errors
    pub fn validate(&self, parameter: &str) -> Result<()> {
        let invalid = |message: &str| {
            Err(RouterError::configuration_error(
                parameter.to_string(),
                message.to_string(),
            ))
        };

        if self.adapter.is_empty() {
            return invalid("Adapter cannot be empty");
        }
        if self.host.is_empty() {
            return invalid("Database host cannot be empty");
        }
        if self.username.is_empty() {
            return invalid("Database username cannot be empty");
        }
        if self.database.is_empty() {
            return invalid("Database name cannot be empty");
        }
        if self.port == 0 {
            return invalid("Database port cannot be 0");
        }
        if self.connection_timeout == 0 {
            return invalid("Connection timeout cannot be 0");
        }
        if self.max_connections == 0 {
            return invalid("Max connections cannot be 0");
        }
        for name in self.environments.keys() {
            name.parse::<Environment>().map_err(|_| {
                RouterError::configuration_error(
                    format!("{}.environments", parameter),
                    format!("Unknown environment sub-record: {}", name),
                )
            })?;
        }

        Ok(())
    }
}

/// Partial configuration merged over a [`DatabaseConfig`]
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct ConfigOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<u32>,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(RouterError::validation_error(
                format!("Configuration file not found: {}", path.display()),
                Some("Create a config.toml file or set SHARD_ROUTER_CONFIG".to_string()),
            ));
        }

        let content = fs::read_to_string(path).map_err(|e| {
            RouterError::io_error(e, format!("reading configuration file {}", path.display()))
        })?;

        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from `SHARD_ROUTER_CONFIG` or the default file
    /// locations
    pub fn load() -> Result<Self> {
        if let Ok(path) = std::env::var("SHARD_ROUTER_CONFIG") {
            return Self::from_file(path);
        }

        let config_paths = ["config.toml", "config/config.toml"];

        for path in &config_paths {
            if Path::new(path).exists() {
                return Self::from_file(path);
            }
        }

        Err(RouterError::validation_error(
            "No configuration file found".to_string(),
            Some("Create a config.toml file or set SHARD_ROUTER_CONFIG".to_string()),
        ))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        match self.router.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(RouterError::validation_error(
                    format!("Invalid log level: {}", self.router.log_level),
                    Some("Valid log levels: trace, debug, info, warn, error".to_string()),
                ));
            }
        }

        if self.router.category.is_empty() {
            return Err(RouterError::configuration_error(
                "router.category".to_string(),
                "Category cannot be empty".to_string(),
            ));
        }

        for (server_id, server) in &self.servers {
            let mut has_primary = false;
            for (env_name, candidates) in &server.environments {
                let parameter = format!("servers.{}.environments.{}", server_id, env_name);
                let environment: Environment = env_name.parse().map_err(|_| {
                    RouterError::configuration_error(
                        parameter.clone(),
                        format!("Unknown environment: {}", env_name),
                    )
                })?;
                has_primary |= environment.is_primary();

                if candidates.is_empty() {
                    return Err(RouterError::configuration_error(
                        parameter,
                        "Candidate list cannot be empty".to_string(),
                    ));
                }
                for (idx, config) in candidates.iter().enumerate() {
                    config.validate(&format!("{}[{}]", parameter, idx))?;
                }
            }

            if !has_primary {
                return Err(RouterError::configuration_error(
                    format!("servers.{}", server_id),
                    "Server has no primary configuration".to_string(),
                ));
            }
        }

        let mut seen = std::collections::HashSet::new();
        for shard in &self.shards {
            if !seen.insert(shard.id) {
                return Err(RouterError::configuration_error(
                    format!("shards.{}", shard.id),
                    "Duplicate shard id".to_string(),
                ));
            }
            if !self.servers.contains_key(&shard.server) {
                return Err(RouterError::configuration_error(
                    format!("shards.{}.server", shard.id),
                    format!("Unknown server '{}'", shard.server),
                ));
            }
        }

        if !seen.contains(&self.default.shard) {
            return Err(RouterError::configuration_error(
                "default.shard".to_string(),
                format!("Default shard {} is not configured", self.default.shard),
            ));
        }

        Ok(())
    }

    /// Build shared shard and server values from this configuration
    pub fn topology(&self) -> Result<Topology> {
        let mut servers = HashMap::new();
        for (server_id, section) in &self.servers {
            let mut server = DatabaseServer::new(server_id, section.shareable);
            if let Some(pool_key) = &section.pool_key {
                server = server.with_pool_key(pool_key);
            }
            for (env_name, candidates) in &section.environments {
                server = server.with_config(env_name.parse()?, candidates.clone());
            }
            servers.insert(server_id.clone(), Arc::new(server));
        }

        let mut shards = Vec::with_capacity(self.shards.len());
        for section in &self.shards {
            let server = servers.get(&section.server).ok_or_else(|| {
                RouterError::configuration_error(
                    format!("shards.{}.server", section.id),
                    format!("Unknown server '{}'", section.server),
                )
            })?;
            let mut shard = Shard::new(ShardId(section.id), &section.name, Arc::clone(server));
            if let Some(overrides) = &section.config_override {
                shard = shard.with_override(overrides.clone());
            }
            shards.push(Arc::new(shard));
        }

        Topology::new(servers, shards, ShardId(self.default.shard))
    }
}

// Default value functions for serde
fn default_log_level() -> String {
    "info".to_string()
}

fn default_category() -> String {
    "primary".to_string()
}

fn default_shareable() -> bool {
    true
}

fn default_adapter() -> String {
    "mysql".to_string()
}

fn default_mysql_port() -> u16 {
    3306
}

fn default_connection_timeout() -> u64 {
    30
}

fn default_max_connections() -> u32 {
    10
}
