use std::sync::Arc;

use axum::Router;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use partyshot::config::AppConfig;
use partyshot::infra::cache::{MemoryUrlCache, RedisUrlCache, SignedUrlCache};
use partyshot::infra::db::Db;
use partyshot::infra::repository::PgRepository;
use partyshot::infra::storage::S3ObjectStore;
use partyshot::media::decoder::{DecoderPool, FfmpegDecoder};
use partyshot::media::thumbnail::ThumbnailGenerator;
use partyshot::{http, AppState};

// Request bodies are small JSON documents; media never travels through HTTP.
const MAX_REQUEST_BYTES: usize = 64 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;

    let db = Db::connect(&config).await?;
    db.migrate().await?;
    let store = S3ObjectStore::new(&config).await?;

    let url_cache: Arc<dyn SignedUrlCache> = match config.redis_url.as_deref() {
        Some(redis_url) => {
            tracing::info!("caching signed urls in redis");
            Arc::new(RedisUrlCache::connect(redis_url).await?)
        }
        None => {
            tracing::info!("REDIS_URL not set, caching signed urls in memory");
            Arc::new(MemoryUrlCache::new())
        }
    };

    let decoders = DecoderPool::new(Arc::new(FfmpegDecoder::new()), config.max_open_decoders);
    let thumbnailer = ThumbnailGenerator::new(
        decoders,
        config.pipeline.thumbnail_max_dimension,
        config.pipeline.thumbnail_quality,
    );

    let state = AppState::new(
        Arc::new(PgRepository::new(db)),
        Arc::new(store),
        url_cache,
        Arc::new(thumbnailer),
        config.pipeline.clone(),
    );

    let app: Router = http::router(state)
        .layer(RequestBodyLimitLayer::new(MAX_REQUEST_BYTES))
        .layer(TraceLayer::new_for_http());
    let listener = tokio::net::TcpListener::bind(&config.http_addr).await?;
    tracing::info!("listening on {}", config.http_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
}
