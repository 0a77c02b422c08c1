use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::PipelineSettings;
use crate::domain::storage::Bucket;
use crate::error::{with_timeout, PipelineError, PipelineResult};
use crate::infra::cache::SignedUrlCache;
use crate::infra::storage::ObjectStore;

/// Maps stored paths to fetchable URLs.
///
/// Public buckets get a deterministic URL with no network call. Private
/// buckets get signed URLs minted with one canonical TTL and cached until
/// shortly before they expire; only missing or expired paths are re-minted.
#[derive(Clone)]
pub struct UrlResolver {
    store: Arc<dyn ObjectStore>,
    cache: Arc<dyn SignedUrlCache>,
    ttl: Duration,
    cache_lifetime: Duration,
    timeout: Duration,
}

impl UrlResolver {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        cache: Arc<dyn SignedUrlCache>,
        settings: &PipelineSettings,
    ) -> Self {
        Self {
            store,
            cache,
            ttl: settings.signed_url_ttl,
            cache_lifetime: settings
                .signed_url_ttl
                .saturating_sub(settings.signed_url_safety_margin),
            timeout: settings.network_timeout,
        }
    }

    pub async fn resolve(&self, bucket: Bucket, paths: &[String]) -> PipelineResult<HashMap<String, String>> {
        let mut seen = HashSet::new();
        let unique: Vec<String> = paths
            .iter()
            .filter(|path| seen.insert(path.as_str()))
            .cloned()
            .collect();

        if let Some(empty) = unique.iter().find(|path| path.trim().is_empty()) {
            return Err(PipelineError::validation(format!("invalid object path {:?}", empty)));
        }

        if bucket.is_public() {
            return Ok(unique
                .into_iter()
                .map(|path| {
                    let url = self.store.public_url(bucket, &path);
                    (path, url)
                })
                .collect());
        }

        let mut resolved = match self.cache.get_many(bucket, &unique).await {
            Ok(hits) => hits,
            Err(err) => {
                warn!(error = ?err, %bucket, "signed url cache read failed");
                HashMap::new()
            }
        };

        let missing: Vec<String> = unique
            .into_iter()
            .filter(|path| !resolved.contains_key(path))
            .collect();
        if missing.is_empty() {
            return Ok(resolved);
        }

        debug!(%bucket, count = missing.len(), "minting signed urls");
        let minted = with_timeout(
            "sign urls",
            self.timeout,
            self.store.signed_urls(bucket, &missing, self.ttl),
        )
        .await
        .map_err(|err| {
            warn!(error = ?err, %bucket, count = missing.len(), "signed url minting failed");
            err
        })?;

        if !self.cache_lifetime.is_zero() {
            if let Err(err) = self.cache.put_many(bucket, &minted, self.cache_lifetime).await {
                warn!(error = ?err, %bucket, "signed url cache write failed");
            }
        }

        resolved.extend(minted);
        Ok(resolved)
    }

    pub async fn resolve_one(&self, bucket: Bucket, path: &str) -> PipelineResult<String> {
        let paths = [path.to_string()];
        self.resolve(bucket, &paths)
            .await?
            .remove(path)
            .ok_or_else(|| PipelineError::NotFound(format!("{}/{}", bucket, path)))
    }

    /// Drops cached URLs for objects that no longer exist.
    pub async fn invalidate(&self, bucket: Bucket, paths: &[String]) {
        if bucket.is_public() || paths.is_empty() {
            return;
        }
        if let Err(err) = self.cache.invalidate(bucket, paths).await {
            warn!(error = ?err, %bucket, "signed url cache invalidation failed");
        }
    }
}
