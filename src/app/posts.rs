use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::app::urls::UrlResolver;
use crate::domain::media::MediaAsset;
use crate::domain::post::Post;
use crate::domain::storage::Bucket;
use crate::error::{with_timeout, PipelineResult};
use crate::infra::repository::MediaRepository;
use crate::infra::storage::ObjectStore;

#[derive(Debug, Serialize)]
pub struct MediaWithUrl {
    #[serde(flatten)]
    pub media: MediaAsset,
    pub url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DeletedPost {
    pub post_id: Uuid,
    pub removed_paths: Vec<String>,
    pub objects_removed: usize,
}

#[derive(Clone)]
pub struct PostService {
    repo: Arc<dyn MediaRepository>,
    store: Arc<dyn ObjectStore>,
    resolver: UrlResolver,
    timeout: Duration,
}

impl PostService {
    pub fn new(
        repo: Arc<dyn MediaRepository>,
        store: Arc<dyn ObjectStore>,
        resolver: UrlResolver,
        timeout: Duration,
    ) -> Self {
        Self {
            repo,
            store,
            resolver,
            timeout,
        }
    }

    pub async fn get_post(&self, post_id: Uuid) -> PipelineResult<Option<Post>> {
        self.repo.get_post(post_id).await
    }

    pub async fn list_media(&self, post_id: Uuid) -> PipelineResult<Vec<MediaAsset>> {
        self.repo.list_media(post_id).await
    }

    /// Media rows for a post with signed URLs attached. A signing failure
    /// leaves `url` empty rather than failing the listing.
    pub async fn list_media_with_urls(&self, post_id: Uuid) -> PipelineResult<Vec<MediaWithUrl>> {
        let media = self.repo.list_media(post_id).await?;
        let paths: Vec<String> = media.iter().map(|asset| asset.path.clone()).collect();

        let mut urls = match self.resolver.resolve(Bucket::PostMedia, &paths).await {
            Ok(urls) => urls,
            Err(err) => {
                warn!(error = ?err, %post_id, "failed to resolve media urls");
                Default::default()
            }
        };

        Ok(media
            .into_iter()
            .map(|asset| {
                let url = urls.remove(&asset.path);
                MediaWithUrl { media: asset, url }
            })
            .collect())
    }

    /// Deletes a post with its media rows, then removes exactly those objects.
    /// Object removal is best-effort; the rows are already gone.
    pub async fn delete_post(&self, post_id: Uuid, owner_id: Uuid) -> PipelineResult<Option<DeletedPost>> {
        let deleted = match self.repo.delete_post(post_id, owner_id).await? {
            Some(media) => media,
            None => return Ok(None),
        };

        let bucket = Bucket::PostMedia;
        let paths: Vec<String> = deleted.into_iter().map(|asset| asset.path).collect();

        let objects_removed = if paths.is_empty() {
            0
        } else {
            match with_timeout("remove objects", self.timeout, self.store.remove(bucket, &paths)).await {
                Ok(removed) => removed,
                Err(err) => {
                    warn!(error = ?err, %bucket, %post_id, count = paths.len(), "failed to remove post media objects");
                    0
                }
            }
        };
        self.resolver.invalidate(bucket, &paths).await;

        info!(%post_id, %owner_id, rows = paths.len(), objects_removed, "post deleted");
        Ok(Some(DeletedPost {
            post_id,
            removed_paths: paths,
            objects_removed,
        }))
    }
}
