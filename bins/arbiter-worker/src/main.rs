mod config;
mod evaluator;
mod orchestrator;
mod pool;
mod process;
mod runner;
mod sandbox;

#[cfg(test)]
mod fake;

use arbiter_common::blob::FsBlobStore;
use arbiter_common::languages::LanguageConfigManager;
use arbiter_common::redis::{RedisQueue, RedisRepository};
use arbiter_common::types::GRADE_JOB;
use config::WorkerConfig;
use orchestrator::Grader;
use pool::WorkerPool;
use sandbox::BwrapSandbox;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("Arbiter worker booting...");

    let config = WorkerConfig::from_env()?;

    let languages = LanguageConfigManager::load_or_builtin(&config.common.languages_path)
        .map_err(|e| {
            error!("Failed to load language configurations: {}", e);
            e
        })?;
    info!("Loaded language configurations for: {:?}", languages.list_languages());

    if !config.bwrap_path.exists() {
        warn!(path = %config.bwrap_path.display(), "bubblewrap not found; every pass will end in GRADING_ERROR");
    }

    let client = ::redis::Client::open(config.common.redis_url.as_str())?;
    let store_conn = ::redis::aio::ConnectionManager::new(client.clone()).await?;
    // BLPOP holds its connection, so the queue gets one of its own
    let queue_conn = ::redis::aio::ConnectionManager::new(client).await?;
    info!("Connected to Redis: {}", config.common.redis_url);

    let grader = Grader::new(
        Arc::new(RedisRepository::new(store_conn)),
        Arc::new(FsBlobStore::new(&config.common.blob_root)),
        Arc::new(BwrapSandbox::new(config.sandbox())),
        Arc::new(languages),
        config.grader(),
    );
    let pool = WorkerPool::new(
        Arc::new(RedisQueue::new(queue_conn, GRADE_JOB)),
        Arc::new(grader),
        config.concurrency,
        config.poll_timeout,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
        warn!("Received shutdown signal, finishing in-flight jobs...");
        let _ = shutdown_tx.send(true);
    });

    pool.run(shutdown_rx).await;

    info!("Worker shutdown complete");
    Ok(())
}
