//! Scripted pool driver and router fixture shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use shard_pool_router::config::{ConfigCandidates, ConfigOverride, DatabaseConfig};
use shard_pool_router::context::TaskShardContext;
use shard_pool_router::environment::Environment;
use shard_pool_router::factory::{ConnectionSpec, PoolFactory};
use shard_pool_router::pool::{ConnectionPool, DriverResult, PoolDriver};
use shard_pool_router::registry::PoolRegistry;
use shard_pool_router::router::ConnectionRouter;
use shard_pool_router::topology::{DatabaseServer, Shard, ShardId};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Everything the mock pools observed, plus the failures they are told to
/// produce, keyed by host
#[derive(Default)]
pub struct MockState {
    opened: AtomicUsize,
    attempts: Mutex<Vec<String>>,
    lifecycle_calls: Mutex<Vec<(String, String)>>,
    unreachable_hosts: Mutex<HashSet<String>>,
    broken_hosts: Mutex<HashSet<String>>,
    failing_lifecycle_hosts: Mutex<HashSet<String>>,
}

impl MockState {
    /// Acquisitions against `host` fail with a connectivity error
    pub fn make_unreachable(&self, host: &str) {
        self.unreachable_hosts.lock().unwrap().insert(host.to_string());
    }

    pub fn make_reachable(&self, host: &str) {
        self.unreachable_hosts.lock().unwrap().remove(host);
    }

    /// Acquisitions against `host` fail with a non-connectivity error
    pub fn make_broken(&self, host: &str) {
        self.broken_hosts.lock().unwrap().insert(host.to_string());
    }

    /// Lifecycle operations on pools for `host` fail
    pub fn fail_lifecycle(&self, host: &str) {
        self.failing_lifecycle_hosts.lock().unwrap().insert(host.to_string());
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Hosts of every acquisition attempt, in order
    pub fn attempts(&self) -> Vec<String> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn clear_attempts(&self) {
        self.attempts.lock().unwrap().clear();
    }

    /// `(operation, host)` of every lifecycle call, in order
    pub fn lifecycle_calls(&self) -> Vec<(String, String)> {
        self.lifecycle_calls.lock().unwrap().clone()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MockConnection {
    pub host: String,
    pub shard: ShardId,
}

pub struct MockPool {
    host: String,
    state: Arc<MockState>,
}

impl MockPool {
    fn lifecycle(&self, operation: &str) -> DriverResult<()> {
        self.state
            .lifecycle_calls
            .lock()
            .unwrap()
            .push((operation.to_string(), self.host.clone()));

        if self.state.failing_lifecycle_hosts.lock().unwrap().contains(&self.host) {
            return Err(sqlx::Error::Protocol(format!("{} failed on {}", operation, self.host)));
        }
        Ok(())
    }
}

#[async_trait]
impl ConnectionPool for MockPool {
    type Connection = MockConnection;

    async fn acquire(&self, shard: &Shard) -> DriverResult<MockConnection> {
        self.state.attempts.lock().unwrap().push(self.host.clone());

        if self.state.unreachable_hosts.lock().unwrap().contains(&self.host) {
            return Err(sqlx::Error::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("connection refused by {}", self.host),
            )));
        }
        if self.state.broken_hosts.lock().unwrap().contains(&self.host) {
            return Err(sqlx::Error::Protocol(format!("unexpected packet from {}", self.host)));
        }

        Ok(MockConnection {
            host: self.host.clone(),
            shard: shard.id(),
        })
    }

    async fn release_connection(&self) -> DriverResult<()> {
        self.lifecycle("release_connection")
    }

    async fn disconnect(&self) -> DriverResult<()> {
        self.lifecycle("disconnect")
    }

    async fn verify_active_connections(&self) -> DriverResult<()> {
        self.lifecycle("verify_active_connections")
    }

    async fn clear_reloadable_connections(&self) -> DriverResult<()> {
        self.lifecycle("clear_reloadable_connections")
    }

    async fn clear_stale_cached_connections(&self) -> DriverResult<()> {
        self.lifecycle("clear_stale_cached_connections")
    }
}

pub struct MockDriver {
    state: Arc<MockState>,
}

impl PoolDriver for MockDriver {
    type Pool = MockPool;

    fn adapter(&self) -> &str {
        "mysql"
    }

    fn open(&self, spec: &ConnectionSpec) -> shard_pool_router::Result<MockPool> {
        self.state.opened.fetch_add(1, Ordering::SeqCst);
        Ok(MockPool {
            host: spec.config().host.clone(),
            state: Arc::clone(&self.state),
        })
    }
}

fn config(host: &str) -> DatabaseConfig {
    DatabaseConfig::new(host, "app", "app")
}

fn single(host: &str) -> ConfigCandidates {
    ConfigCandidates::Single(config(host))
}

fn list(hosts: &[&str]) -> ConfigCandidates {
    ConfigCandidates::List(hosts.iter().map(|host| config(host)).collect())
}

/// Router over three servers:
/// - `main` (shareable unless told otherwise, default): shards 1 (default)
///   and 2
/// - `shared` (shareable, pool key `shared-cluster`): shards 10 and 11
/// - `tenants` (not shareable): shards 20 and 21
pub struct Fixture {
    pub router: ConnectionRouter<MockDriver>,
    pub state: Arc<MockState>,
    shards: HashMap<u64, Arc<Shard>>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_default_server_shareable(true)
    }

    /// Same topology, with the default server's `shareable` flag set to
    /// `shareable`
    pub fn with_default_server_shareable(shareable: bool) -> Self {
        let mut main_primary = config("main-primary");
        main_primary.environments.insert(
            "deploy".to_string(),
            ConfigOverride {
                host: Some("main-deploy".to_string()),
                ..ConfigOverride::default()
            },
        );

        let main = Arc::new(
            DatabaseServer::new("main", shareable)
                .with_config(Environment::Primary, ConfigCandidates::Single(main_primary))
                .with_config(Environment::Replica, list(&["main-replica-1", "main-replica-2"])),
        );
        let shared = Arc::new(
            DatabaseServer::new("shared", true)
                .with_pool_key("shared-cluster")
                .with_config(Environment::Primary, single("shared-primary"))
                .with_config(
                    Environment::Replica,
                    list(&["shared-replica-1", "shared-replica-2", "shared-replica-3"]),
                ),
        );
        let tenants = Arc::new(
            DatabaseServer::new("tenants", false)
                .with_config(Environment::Primary, single("tenant-primary"))
                .with_config(Environment::Replica, single("tenant-replica")),
        );

        let mut shards = HashMap::new();
        for (id, server) in [
            (1, &main),
            (2, &main),
            (10, &shared),
            (11, &shared),
            (20, &tenants),
            (21, &tenants),
        ] {
            let shard = Shard::new(ShardId(id), &format!("shard_{}", id), Arc::clone(server));
            shards.insert(id, Arc::new(shard));
        }

        let state = Arc::new(MockState::default());
        let factory = Arc::new(PoolFactory::new(MockDriver {
            state: Arc::clone(&state),
        }));
        let default_shard = Arc::clone(&shards[&1]);
        let default_pool = Arc::new(
            factory
                .create_default_pool(Arc::clone(&default_shard))
                .expect("default pool"),
        );
        let context = Arc::new(TaskShardContext::new(default_shard));

        let router = ConnectionRouter::new(
            "primary",
            default_pool,
            Arc::new(PoolRegistry::new()),
            factory,
            context,
        );

        Self {
            router,
            state,
            shards,
        }
    }

    pub fn shard(&self, id: u64) -> Arc<Shard> {
        Arc::clone(&self.shards[&id])
    }

    /// Run `f` with shard `id` active in `environment`
    pub async fn on<F: Future>(&self, id: u64, environment: Environment, f: F) -> F::Output {
        TaskShardContext::scope(self.shard(id), environment, f).await
    }
}
