use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::app::staging::AssetStager;
use crate::config::PipelineSettings;
use crate::domain::media::{extension_from_content_type, MediaKind, NewMediaAsset};
use crate::domain::post::{NewPost, Post};
use crate::domain::publish::{AssetReport, AssetStatus, PublishOutcome, PublishState};
use crate::domain::staged::StagedAsset;
use crate::domain::storage::{media_path, Bucket};
use crate::error::{with_timeout, PipelineError, PipelineResult};
use crate::infra::repository::MediaRepository;
use crate::infra::storage::{ObjectStore, UploadOptions};
use crate::media::compress::{compress, read_local};
use crate::media::thumbnail::Thumbnailer;

/// Bytes ready to upload for one staged asset.
struct PreparedAsset {
    bytes: Bytes,
    content_type: String,
    extension: &'static str,
    kind: MediaKind,
    duration_ms: Option<i64>,
}

/// Drives one staging session into posts: creates the post, then uploads and
/// records each staged asset in order, reporting per-asset success.
pub struct PublishCoordinator {
    repo: Arc<dyn MediaRepository>,
    store: Arc<dyn ObjectStore>,
    thumbnailer: Arc<dyn Thumbnailer>,
    stager: AssetStager,
    settings: PipelineSettings,
    state: watch::Sender<PublishState>,
}

impl PublishCoordinator {
    pub fn new(
        repo: Arc<dyn MediaRepository>,
        store: Arc<dyn ObjectStore>,
        thumbnailer: Arc<dyn Thumbnailer>,
        stager: AssetStager,
        settings: PipelineSettings,
    ) -> Self {
        let (state, _) = watch::channel(PublishState::Idle);
        Self {
            repo,
            store,
            thumbnailer,
            stager,
            settings,
            state,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<PublishState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> PublishState {
        self.state.borrow().clone()
    }

    /// Publishes everything currently staged into a new post.
    ///
    /// Only post creation can fail the whole call; per-asset failures are
    /// reported in the outcome and leave those assets staged. A second publish
    /// on the same stager fails with `InProgress` until this one returns.
    pub async fn publish(
        &self,
        link_id: Uuid,
        owner_id: Uuid,
        cancel: &CancellationToken,
    ) -> PipelineResult<PublishOutcome> {
        let _claim = self.stager.claim_publish()?;
        let staged = self.staged_or_reject().await?;

        self.state.send_replace(PublishState::CreatingPost);
        let post = match with_timeout(
            "create post",
            self.settings.network_timeout,
            self.repo.create_post(NewPost::new(link_id, owner_id)),
        )
        .await
        {
            Ok(post) => post,
            Err(err) => {
                error!(error = ?err, %link_id, %owner_id, "failed to create post");
                self.state.send_replace(PublishState::Failed);
                return Err(err);
            }
        };

        Ok(self.upload_all(post, staged, cancel).await)
    }

    /// Retries whatever is still staged into an existing post owned by `owner_id`.
    pub async fn resume(
        &self,
        post_id: Uuid,
        owner_id: Uuid,
        cancel: &CancellationToken,
    ) -> PipelineResult<PublishOutcome> {
        let _claim = self.stager.claim_publish()?;
        let staged = self.staged_or_reject().await?;

        let post = with_timeout(
            "load post",
            self.settings.network_timeout,
            self.repo.get_post(post_id),
        )
        .await?
        .filter(|post| post.owner_id == owner_id)
        .ok_or_else(|| PipelineError::NotFound(format!("post {}", post_id)))?;

        Ok(self.upload_all(post, staged, cancel).await)
    }

    async fn staged_or_reject(&self) -> PipelineResult<Vec<StagedAsset>> {
        let staged = self.stager.snapshot().await;
        if staged.is_empty() {
            return Err(PipelineError::validation("nothing staged to publish"));
        }
        Ok(staged)
    }

    async fn upload_all(
        &self,
        post: Post,
        staged: Vec<StagedAsset>,
        cancel: &CancellationToken,
    ) -> PublishOutcome {
        let total = staged.len();
        let mut reports = Vec::with_capacity(total);

        for (index, asset) in staged.iter().enumerate() {
            let status = if cancel.is_cancelled() {
                failed_status(&PipelineError::Cancelled)
            } else {
                self.state
                    .send_replace(PublishState::UploadingAssets { index, total });
                match self.publish_one(&post, asset).await {
                    Ok((media_id, path)) => AssetStatus::Published { media_id, path },
                    Err(err) => {
                        warn!(
                            error = ?err,
                            post_id = %post.id,
                            local_id = %asset.local_id,
                            retryable = err.is_retryable(),
                            "asset failed to publish"
                        );
                        failed_status(&err)
                    }
                }
            };

            reports.push(AssetReport {
                local_id: asset.local_id,
                status,
            });
        }

        let outcome = PublishOutcome::from_reports(post, reports);
        let consumed = self.stager.consume(&outcome.published_ids()).await;
        self.state.send_replace(outcome.final_state());

        info!(
            post_id = %outcome.post.id,
            link_id = %outcome.post.link_id,
            total = outcome.total,
            completed = outcome.completed,
            failed = outcome.failed,
            consumed,
            "publish finished"
        );
        outcome
    }

    async fn publish_one(&self, post: &Post, asset: &StagedAsset) -> PipelineResult<(Uuid, String)> {
        let prepared = self.prepare(asset).await?;

        let media_id = Uuid::new_v4();
        let path = media_path(post.link_id, post.id, media_id, prepared.extension);
        let bucket = Bucket::PostMedia;

        with_timeout(
            "upload",
            self.settings.network_timeout,
            self.store.upload(
                bucket,
                &path,
                prepared.bytes,
                UploadOptions {
                    content_type: prepared.content_type.clone(),
                    upsert: bucket.allows_upsert(),
                },
            ),
        )
        .await
        .map_err(|err| {
            error!(error = ?err, %bucket, path = %path, post_id = %post.id, "media upload failed");
            err
        })?;

        let row = NewMediaAsset {
            id: media_id,
            post_id: post.id,
            path: path.clone(),
            mime_type: prepared.content_type,
            kind: prepared.kind,
            duration_ms: prepared.duration_ms,
        };

        match with_timeout(
            "insert media row",
            self.settings.network_timeout,
            self.repo.insert_media_asset(row),
        )
        .await
        {
            Ok(_) => Ok((media_id, path)),
            Err(err @ PipelineError::Timeout { .. }) => {
                self.settle_timed_out_insert(post, media_id, bucket, path, err).await
            }
            Err(err) => {
                error!(error = ?err, %bucket, path = %path, post_id = %post.id, "media row insert failed");
                self.remove_orphan(bucket, &path).await;
                Err(err)
            }
        }
    }

    /// A timed out insert may still have committed, so the object is never
    /// removed here. The asset counts as published only if its row is visible.
    async fn settle_timed_out_insert(
        &self,
        post: &Post,
        media_id: Uuid,
        bucket: Bucket,
        path: String,
        err: PipelineError,
    ) -> PipelineResult<(Uuid, String)> {
        match with_timeout(
            "load media row",
            self.settings.network_timeout,
            self.repo.get_media_asset(media_id),
        )
        .await
        {
            Ok(Some(_)) => {
                warn!(%media_id, post_id = %post.id, path = %path, "media row committed after insert timed out");
                Ok((media_id, path))
            }
            Ok(None) => {
                error!(error = ?err, %bucket, path = %path, %media_id, "media row missing after insert timed out, keeping object");
                Err(err)
            }
            Err(lookup) => {
                error!(error = ?err, lookup_error = ?lookup, %bucket, path = %path, %media_id, "media row state unknown, keeping object");
                Err(err)
            }
        }
    }

    /// Compresses images, passes videos through. Falls back to the original
    /// bytes when compression fails and the original type is allowed.
    async fn prepare(&self, asset: &StagedAsset) -> PipelineResult<PreparedAsset> {
        let source = &asset.source;
        let original_extension = extension_from_content_type(&source.content_type)?;

        match source.kind {
            MediaKind::Image => {
                match compress(
                    &source.path,
                    self.settings.compress_max_dimension,
                    self.settings.compress_quality,
                )
                .await
                {
                    Ok(encoded) => Ok(PreparedAsset {
                        bytes: encoded.bytes,
                        content_type: encoded.content_type.to_string(),
                        extension: encoded.extension,
                        kind: MediaKind::Image,
                        duration_ms: None,
                    }),
                    Err(err) => {
                        warn!(
                            error = ?err,
                            local_id = %asset.local_id,
                            "compression failed, uploading original"
                        );
                        Ok(PreparedAsset {
                            bytes: read_local(&source.path).await?,
                            content_type: source.content_type.clone(),
                            extension: original_extension,
                            kind: MediaKind::Image,
                            duration_ms: None,
                        })
                    }
                }
            }
            MediaKind::Video => {
                let bytes = read_local(&source.path).await?;
                let duration_ms = self
                    .thumbnailer
                    .video_duration(source)
                    .await
                    .map(|duration| duration.as_millis() as i64);
                Ok(PreparedAsset {
                    bytes,
                    content_type: source.content_type.clone(),
                    extension: original_extension,
                    kind: MediaKind::Video,
                    duration_ms,
                })
            }
        }
    }

    async fn remove_orphan(&self, bucket: Bucket, path: &str) {
        let paths = [path.to_string()];
        match with_timeout(
            "remove orphan",
            self.settings.network_timeout,
            self.store.remove(bucket, &paths),
        )
        .await
        {
            Ok(_) => {}
            Err(err) => warn!(error = ?err, %bucket, path, "failed to remove orphaned object"),
        }
    }
}

fn failed_status(err: &PipelineError) -> AssetStatus {
    AssetStatus::Failed {
        error: err.to_string(),
        retryable: err.is_retryable(),
    }
}
