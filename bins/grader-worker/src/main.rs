mod engine;
mod evaluator;
mod health;
mod intake;
mod metrics;
mod orchestrator;
mod runtime;
mod store;
#[cfg(test)]
mod test_support;

use anyhow::Context;
use grader_common::keys::QUEUE_KEY;
use grader_common::Config;
use redis::aio::ConnectionManager;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

use crate::engine::SandboxExecutor;
use crate::intake::RedisQueue;
use crate::orchestrator::{EvaluationPool, PoolConfig};
use crate::runtime::DockerRuntime;
use crate::store::RedisStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();
    init_tracing();

    info!("Grader worker booting...");

    let config = Config::from_env();
    metrics::init_metrics().context("Failed to register metrics")?;

    let client = redis::Client::open(config.redis_url.as_str())
        .context("Failed to create Redis client")?;
    let conn = ConnectionManager::new(client)
        .await
        .context("Failed to connect to Redis")?;
    info!(redis_url = %config.redis_url, "Connected to Redis");

    let store = Arc::new(RedisStore::new(conn.clone()));
    let engine = Arc::new(SandboxExecutor::new(
        DockerRuntime::from_config(&config),
        config.staging_dir.clone(),
    ));
    info!(
        staging_dir = %engine.staging_dir().display(),
        timeout_ms = config.execution_timeout_ms,
        "Sandbox executor ready"
    );
    let pool = EvaluationPool::start(PoolConfig::from(&config), store, engine);

    let listener = TcpListener::bind(("0.0.0.0", config.health_port))
        .await
        .with_context(|| format!("Failed to bind health port {}", config.health_port))?;
    info!(port = config.health_port, "Health endpoint listening");
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, health::routes()).await {
            error!(error = %e, "Health endpoint stopped");
        }
    });

    info!(queue = QUEUE_KEY, "Listening for submissions");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                info!("Received shutdown signal, finishing intake");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
        }
    });

    let mut queue = RedisQueue::new(conn);
    intake::run_intake(&mut queue, &pool, shutdown_rx).await;

    info!(in_flight = pool.in_flight(), "Draining in-flight evaluations");
    pool.shutdown().await;
    info!("Grader worker shutdown complete");
    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}
