use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use redis::Client;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::domain::storage::Bucket;
use crate::error::{PipelineError, PipelineResult};

/// Path -> signed URL cache. Entries must never be returned past their lifetime.
#[async_trait]
pub trait SignedUrlCache: Send + Sync {
    /// Returns only the paths that have a live entry.
    async fn get_many(&self, bucket: Bucket, paths: &[String]) -> PipelineResult<HashMap<String, String>>;

    /// Stores every entry with the same lifetime. Last writer wins.
    async fn put_many(
        &self,
        bucket: Bucket,
        entries: &HashMap<String, String>,
        lifetime: Duration,
    ) -> PipelineResult<()>;

    async fn invalidate(&self, bucket: Bucket, paths: &[String]) -> PipelineResult<()>;
}

struct CachedUrl {
    url: String,
    expires_at: Instant,
}

#[derive(Default)]
pub struct MemoryUrlCache {
    entries: RwLock<HashMap<(Bucket, String), CachedUrl>>,
}

impl MemoryUrlCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl SignedUrlCache for MemoryUrlCache {
    async fn get_many(&self, bucket: Bucket, paths: &[String]) -> PipelineResult<HashMap<String, String>> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        let hits = paths
            .iter()
            .filter_map(|path| {
                entries
                    .get(&(bucket, path.clone()))
                    .filter(|cached| cached.expires_at > now)
                    .map(|cached| (path.clone(), cached.url.clone()))
            })
            .collect();
        Ok(hits)
    }

    async fn put_many(
        &self,
        bucket: Bucket,
        entries: &HashMap<String, String>,
        lifetime: Duration,
    ) -> PipelineResult<()> {
        let now = Instant::now();
        let expires_at = now + lifetime;
        let mut cache = self.entries.write().await;
        cache.retain(|_, cached| cached.expires_at > now);
        for (path, url) in entries {
            cache.insert(
                (bucket, path.clone()),
                CachedUrl {
                    url: url.clone(),
                    expires_at,
                },
            );
        }
        Ok(())
    }

    async fn invalidate(&self, bucket: Bucket, paths: &[String]) -> PipelineResult<()> {
        let mut cache = self.entries.write().await;
        for path in paths {
            cache.remove(&(bucket, path.clone()));
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct RedisUrlCache {
    client: Client,
}

impl RedisUrlCache {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;
        let mut conn = client.get_multiplexed_async_connection().await?;
        redis::cmd("PING").query_async::<_, String>(&mut conn).await?;
        Ok(Self { client })
    }

    async fn connection(&self) -> PipelineResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|err| PipelineError::transient(format!("redis connect failed: {}", err)))
    }
}

fn cache_key(bucket: Bucket, path: &str) -> String {
    format!("signed:{}:{}", bucket, path)
}

fn redis_error(err: redis::RedisError) -> PipelineError {
    PipelineError::transient(format!("redis command failed: {}", err))
}

#[async_trait]
impl SignedUrlCache for RedisUrlCache {
    async fn get_many(&self, bucket: Bucket, paths: &[String]) -> PipelineResult<HashMap<String, String>> {
        if paths.is_empty() {
            return Ok(HashMap::new());
        }

        let keys: Vec<String> = paths.iter().map(|path| cache_key(bucket, path)).collect();
        let mut conn = self.connection().await?;
        let values: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut conn)
            .await
            .map_err(redis_error)?;

        Ok(paths
            .iter()
            .zip(values)
            .filter_map(|(path, value)| value.map(|url| (path.clone(), url)))
            .collect())
    }

    async fn put_many(
        &self,
        bucket: Bucket,
        entries: &HashMap<String, String>,
        lifetime: Duration,
    ) -> PipelineResult<()> {
        let seconds = lifetime.as_secs();
        if seconds == 0 || entries.is_empty() {
            return Ok(());
        }

        let mut pipe = redis::pipe();
        for (path, url) in entries {
            pipe.cmd("SET")
                .arg(cache_key(bucket, path))
                .arg(url)
                .arg("EX")
                .arg(seconds)
                .ignore();
        }

        let mut conn = self.connection().await?;
        pipe.query_async::<_, ()>(&mut conn).await.map_err(redis_error)
    }

    async fn invalidate(&self, bucket: Bucket, paths: &[String]) -> PipelineResult<()> {
        if paths.is_empty() {
            return Ok(());
        }

        let keys: Vec<String> = paths.iter().map(|path| cache_key(bucket, path)).collect();
        let mut conn = self.connection().await?;
        redis::cmd("DEL")
            .arg(&keys)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(redis_error)
    }
}
