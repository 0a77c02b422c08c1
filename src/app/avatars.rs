use std::path::Path;
use std::sync::Arc;

use tracing::{error, info};
use uuid::Uuid;

use crate::app::urls::UrlResolver;
use crate::config::PipelineSettings;
use crate::domain::media::{content_type_from_path, MediaKind};
use crate::domain::storage::{avatar_path, Bucket};
use crate::error::{with_timeout, PipelineError, PipelineResult};
use crate::infra::repository::MediaRepository;
use crate::infra::storage::{ObjectStore, UploadOptions};
use crate::media::compress::compress;

pub struct AvatarService {
    repo: Arc<dyn MediaRepository>,
    store: Arc<dyn ObjectStore>,
    resolver: UrlResolver,
    settings: PipelineSettings,
}

impl AvatarService {
    pub fn new(
        repo: Arc<dyn MediaRepository>,
        store: Arc<dyn ObjectStore>,
        resolver: UrlResolver,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            repo,
            store,
            resolver,
            settings,
        }
    }

    /// Compresses a local image into the user's avatar slot and returns its public URL.
    pub async fn set_avatar(&self, user_id: Uuid, local: &Path) -> PipelineResult<String> {
        let content_type = content_type_from_path(local)?;
        if MediaKind::from_content_type(content_type) != Some(MediaKind::Image) {
            return Err(PipelineError::validation("avatars must be images"));
        }

        let encoded = compress(
            local,
            self.settings.avatar_max_dimension,
            self.settings.compress_quality,
        )
        .await?;

        let bucket = Bucket::Avatars;
        let path = avatar_path(user_id);
        let timeout = self.settings.network_timeout;

        with_timeout(
            "upload",
            timeout,
            self.store.upload(
                bucket,
                &path,
                encoded.bytes,
                UploadOptions {
                    content_type: encoded.content_type.to_string(),
                    upsert: bucket.allows_upsert(),
                },
            ),
        )
        .await
        .map_err(|err| {
            error!(error = ?err, %bucket, path = %path, %user_id, "avatar upload failed");
            err
        })?;

        with_timeout("update avatar", timeout, self.repo.update_avatar(user_id, &path)).await?;

        info!(%user_id, path = %path, "avatar updated");
        self.resolver.resolve_one(bucket, &path).await
    }
}
