use anyhow::Context;
use shard_pool_router::config::Config;
use shard_pool_router::context::TaskShardContext;
use shard_pool_router::driver::MySqlDriver;
use shard_pool_router::environment::Environment;
use shard_pool_router::factory::PoolFactory;
use shard_pool_router::registry::PoolRegistry;
use shard_pool_router::router::ConnectionRouter;
use std::sync::Arc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration first to get the log level
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            // Initialize basic tracing for error reporting
            tracing_subscriber::fmt::init();
            error!("Failed to load configuration: {}", e.user_message());
            error!("Configuration error details: {}", e.detailed_message());
            return Err(e.into());
        }
    };

    // Initialize tracing with the configured log level
    let log_level = match config.router.log_level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .init();

    info!("Starting shard router probe");
    info!("Log level set to: {}", config.router.log_level);
    info!("Connection category: {}", config.router.category);

    let topology = config.topology().context("building shard topology")?;
    info!(
        "Loaded {} shard(s); default shard is {}",
        topology.shards().len(),
        topology.default_shard().id()
    );

    let factory = Arc::new(PoolFactory::new(MySqlDriver));
    let default_pool = Arc::new(
        factory
            .create_default_pool(Arc::clone(topology.default_shard()))
            .context("opening the default pool")?,
    );
    let context = Arc::new(TaskShardContext::new(Arc::clone(topology.default_shard())));

    let router = ConnectionRouter::new(
        &config.router.category,
        Arc::clone(&default_pool),
        Arc::new(PoolRegistry::new()),
        factory,
        context,
    )
    .with_isolated_environment(config.router.isolated);

    let mut failures = 0usize;
    for shard in topology.shards() {
        for environment in Environment::ALL {
            let result =
                TaskShardContext::scope(Arc::clone(shard), environment, router.connection()).await;
            match result {
                Ok(_conn) => info!("Shard {} ({}) {}: ok", shard.id(), shard.name(), environment),
                Err(e) => {
                    failures += 1;
                    warn!(
                        "Shard {} ({}) {}: {}",
                        shard.id(),
                        shard.name(),
                        environment,
                        e.user_message()
                    );
                }
            }
        }
    }

    let reports = router.pool_reports().await;
    println!("{}", serde_json::to_string_pretty(&reports)?);

    if let Err(e) = router.disconnect().await {
        error!("Error during disconnect: {}", e.detailed_message());
    }
    if let Err(e) = default_pool.disconnect().await {
        error!("Error closing the default pool: {}", e.detailed_message());
    }

    info!("Probe complete: {} failed connection(s)", failures);
    if failures > 0 {
        anyhow::bail!("{} shard connection(s) failed", failures);
    }
    Ok(())
}
