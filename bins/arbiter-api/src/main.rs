mod handlers;
mod metrics;
mod routes;

use anyhow::Context;
use arbiter_common::blob::{BlobStore, FsBlobStore};
use arbiter_common::config::{env_or, Config};
use arbiter_common::languages::LanguageConfigManager;
use arbiter_common::queue::JobQueue;
use arbiter_common::redis::{RedisQueue, RedisRepository};
use arbiter_common::store::Repository;
use arbiter_common::types::GRADE_JOB;
use axum::Router;
use redis::aio::ConnectionManager;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

pub const DEFAULT_API_ADDR: &str = "0.0.0.0:3000";

pub struct AppState {
    pub repo: Arc<dyn Repository>,
    pub blobs: Arc<dyn BlobStore>,
    pub queue: Arc<dyn JobQueue>,
    pub languages: LanguageConfigManager,
    pub bucket: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!("Arbiter API booting...");

    let config = Config::from_env();
    let languages = LanguageConfigManager::load_or_builtin(&config.languages_path)?;
    info!("Accepting languages: {:?}", languages.list_languages());

    let client = redis::Client::open(config.redis_url.as_str())
        .context("Failed to create Redis client")?;
    let redis_conn = ConnectionManager::new(client)
        .await
        .context("Failed to connect to Redis")?;
    info!("Connected to Redis: {}", config.redis_url);

    let state = Arc::new(AppState {
        repo: Arc::new(RedisRepository::new(redis_conn.clone())),
        blobs: Arc::new(FsBlobStore::new(&config.blob_root)),
        queue: Arc::new(RedisQueue::new(redis_conn, GRADE_JOB)),
        languages,
        bucket: config.bucket,
    });

    let app = Router::new().merge(routes::routes()).with_state(state);

    let addr = env_or("API_ADDR", DEFAULT_API_ADDR);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("HTTP server listening on {}", addr);
    info!("Ready to accept solutions");

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
