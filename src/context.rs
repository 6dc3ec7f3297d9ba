//! Active shard and environment for the calling task

use crate::environment::Environment;
use crate::topology::Shard;
use std::future::Future;
use std::sync::Arc;

/// Supplies the shard and environment the current operation runs against.
///
/// Implementations hold per-task state; the router queries it once per
/// call and never caches the answer.
pub trait ShardContext: Send + Sync {
    /// Currently active shard
    fn active_shard(&self) -> Arc<Shard>;

    /// Currently active read/write environment
    fn active_environment(&self) -> Environment;

    /// The shard whose server owns the default pool
    fn default_shard(&self) -> Arc<Shard>;

    /// Whether the active shard is the default shard
    fn is_default_shard(&self) -> bool {
        *self.active_shard() == *self.default_shard()
    }
}

#[derive(Clone)]
struct ActiveScope {
    shard: Arc<Shard>,
    environment: Environment,
}

tokio::task_local! {
    static ACTIVE_SCOPE: ActiveScope;
}

/// [`ShardContext`] backed by a tokio task-local scope.
///
/// Code running outside [`TaskShardContext::scope`] sees the default shard
/// in the primary environment.
#[derive(Debug, Clone)]
pub struct TaskShardContext {
    default_shard: Arc<Shard>,
}

impl TaskShardContext {
    pub fn new(default_shard: Arc<Shard>) -> Self {
        Self { default_shard }
    }

    /// Run `f` with `shard` and `environment` active
    pub async fn scope<F>(shard: Arc<Shard>, environment: Environment, f: F) -> F::Output
    where
        F: Future,
    {
        ACTIVE_SCOPE
            .scope(ActiveScope { shard, environment }, f)
            .await
    }

    /// The scoped shard and environment, if any
    pub fn current() -> Option<(Arc<Shard>, Environment)> {
        ACTIVE_SCOPE
            .try_with(|scope| (Arc::clone(&scope.shard), scope.environment))
            .ok()
    }
}

impl ShardContext for TaskShardContext {
    fn active_shard(&self) -> Arc<Shard> {
        ACTIVE_SCOPE
            .try_with(|scope| Arc::clone(&scope.shard))
            .unwrap_or_else(|_| Arc::clone(&self.default_shard))
    }

    fn active_environment(&self) -> Environment {
        ACTIVE_SCOPE
            .try_with(|scope| scope.environment)
            .unwrap_or_default()
    }

    fn default_shard(&self) -> Arc<Shard> {
        Arc::clone(&self.default_shard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::{DatabaseServer, ShardId};

    fn shards() -> (Arc<Shard>, Arc<Shard>) {
        let server = Arc::new(DatabaseServer::new("main", true));
        (
            Arc::new(Shard::new(ShardId(1), "default", Arc::clone(&server))),
            Arc::new(Shard::new(ShardId(2), "tenant", server)),
        )
    }

    #[tokio::test]
    async fn test_defaults_outside_scope() {
        let (default_shard, _) = shards();
        let context = TaskShardContext::new(Arc::clone(&default_shard));

        assert_eq!(context.active_shard().id(), ShardId(1));
        assert_eq!(context.active_environment(), Environment::Primary);
        assert!(context.is_default_shard());
        assert!(TaskShardContext::current().is_none());
    }

    #[tokio::test]
    async fn test_scope_sets_shard_and_environment() {
        let (default_shard, tenant) = shards();
        let context = TaskShardContext::new(default_shard);

        TaskShardContext::scope(tenant, Environment::Replica, async {
            assert_eq!(context.active_shard().id(), ShardId(2));
            assert_eq!(context.active_environment(), Environment::Replica);
            assert!(!context.is_default_shard());
        })
        .await;

        assert_eq!(context.active_shard().id(), ShardId(1));
    }

    #[tokio::test]
    async fn test_scope_is_per_task() {
        let (default_shard, tenant) = shards();
        let context = Arc::new(TaskShardContext::new(default_shard));

        let spawned = Arc::clone(&context);
        let handle = tokio::spawn(TaskShardContext::scope(tenant, Environment::Deploy, async move {
            spawned.active_environment()
        }));

        assert_eq!(handle.await.unwrap(), Environment::Deploy);
        assert_eq!(context.active_environment(), Environment::Primary);
    }
}
