use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use image::GenericImageView;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::urls::UrlResolver;
use crate::config::PipelineSettings;
use crate::domain::party::{BannerCrop, PartyBanner};
use crate::domain::storage::{banner_path, Bucket, ObjectRef};
use crate::error::{with_timeout, PipelineError, PipelineResult};
use crate::infra::repository::MediaRepository;
use crate::infra::storage::{ObjectStore, UploadOptions};
use crate::media::compress::{bound, encode_jpeg, read_local, JPEG_CONTENT_TYPE};

/// Width / height of every banner.
pub const BANNER_ASPECT: f32 = 3.0;
const MAX_ZOOM: f32 = 8.0;

/// Pixel rectangle selected by a crop: `(x, y, width, height)`.
pub fn crop_rect(width: u32, height: u32, crop: BannerCrop) -> PipelineResult<(u32, u32, u32, u32)> {
    validate_crop(crop)?;
    if width == 0 || height == 0 {
        return Err(PipelineError::validation("source image is empty"));
    }

    let (w, h) = (width as f32, height as f32);
    let (base_w, base_h) = if w / h > BANNER_ASPECT {
        (h * BANNER_ASPECT, h)
    } else {
        (w, w / BANNER_ASPECT)
    };

    let crop_w = (base_w / crop.zoom).round().clamp(1.0, w);
    let crop_h = (base_h / crop.zoom).round().clamp(1.0, h);
    let x = ((w - crop_w) * crop.offset_x).round();
    let y = ((h - crop_h) * crop.offset_y).round();

    Ok((x as u32, y as u32, crop_w as u32, crop_h as u32))
}

fn validate_crop(crop: BannerCrop) -> PipelineResult<()> {
    let offsets_ok = [crop.offset_x, crop.offset_y]
        .iter()
        .all(|value| value.is_finite() && (0.0..=1.0).contains(value));
    if !offsets_ok {
        return Err(PipelineError::validation("crop offsets must be within [0, 1]"));
    }
    if !crop.zoom.is_finite() || !(1.0..=MAX_ZOOM).contains(&crop.zoom) {
        return Err(PipelineError::validation(format!(
            "crop zoom must be within [1, {}]",
            MAX_ZOOM
        )));
    }
    Ok(())
}

/// Deletes the scratch copy on every exit path.
struct ScratchFile {
    path: PathBuf,
}

impl ScratchFile {
    async fn write(dir: &Path, bytes: &[u8]) -> PipelineResult<Self> {
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(format!("banner-{}.src", Uuid::new_v4()));
        tokio::fs::write(&path, bytes).await?;
        Ok(Self { path })
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            debug!(error = ?err, path = %self.path.display(), "scratch file already gone");
        }
    }
}

/// Re-crops a stored image into a party banner. The party's banner pointer
/// and the visible banner object change together or not at all.
pub struct BannerCropEditor {
    repo: Arc<dyn MediaRepository>,
    store: Arc<dyn ObjectStore>,
    resolver: UrlResolver,
    settings: PipelineSettings,
}

impl BannerCropEditor {
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

    pub async fn recrop(&self, party_id: Uuid, source: ObjectRef, crop: BannerCrop) -> PipelineResult<PartyBanner> {
        validate_crop(crop)?;
        let timeout = self.settings.network_timeout;

        let current = self
            .repo
            .get_party_banner(party_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("party {}", party_id)))?;

        let source_url = self.resolver.resolve_one(source.bucket, &source.path).await?;
        debug!(%party_id, bucket = %source.bucket, path = %source.path, url = %source_url, "recropping banner");

        let original = with_timeout(
            "download",
            timeout,
            self.store.download(source.bucket, &source.path),
        )
        .await?;
        let scratch = ScratchFile::write(&self.settings.scratch_dir, &original).await?;
        let cropped = self.crop_file(&scratch.path, crop).await?;
        drop(scratch);

        let target = banner_path(party_id);
        let bucket = Bucket::Banners;

        // The upload below overwrites the live object when the pointer already targets it.
        let previous = if current.path.as_deref() == Some(target.as_str()) {
            Some(with_timeout("download", timeout, self.store.download(bucket, &target)).await?)
        } else {
            None
        };

        with_timeout(
            "upload",
            timeout,
            self.store.upload(bucket, &target, cropped, banner_upload(bucket)),
        )
        .await
        .map_err(|err| {
            error!(error = ?err, %bucket, path = %target, %party_id, "banner upload failed");
            err
        })?;

        if let Err(err) = with_timeout(
            "update banner",
            timeout,
            self.repo.update_party_banner(party_id, &target, crop),
        )
        .await
        {
            error!(error = ?err, %party_id, path = %target, "banner pointer update failed, restoring previous banner");
            self.restore(bucket, &target, previous).await;
            return Err(err);
        }

        info!(%party_id, path = %target, "banner replaced");
        Ok(PartyBanner {
            party_id,
            path: Some(target),
            crop,
        })
    }

    async fn crop_file(&self, path: &Path, crop: BannerCrop) -> PipelineResult<Bytes> {
        let data = read_local(path).await?;
        let (max_dimension, quality) = (
            self.settings.compress_max_dimension,
            self.settings.compress_quality,
        );

        tokio::task::spawn_blocking(move || -> PipelineResult<Bytes> {
            let image = image::load_from_memory(&data)?;
            let (width, height) = image.dimensions();
            let (x, y, w, h) = crop_rect(width, height, crop)?;
            let encoded = encode_jpeg(&bound(image.crop_imm(x, y, w, h), max_dimension), quality)?;
            Ok(encoded.bytes)
        })
        .await?
    }

    async fn restore(&self, bucket: Bucket, target: &str, previous: Option<Bytes>) {
        let timeout = self.settings.network_timeout;
        let result = match previous {
            Some(bytes) => {
                with_timeout("restore", timeout, self.store.upload(bucket, target, bytes, banner_upload(bucket))).await
            }
            None => {
                let paths = [target.to_string()];
                with_timeout("restore", timeout, self.store.remove(bucket, &paths))
                    .await
                    .map(|_| ())
            }
        };

        if let Err(err) = result {
            warn!(error = ?err, %bucket, path = target, "failed to restore previous banner object");
        }
    }
}

fn banner_upload(bucket: Bucket) -> UploadOptions {
    UploadOptions {
        content_type: JPEG_CONTENT_TYPE.to_string(),
        upsert: bucket.allows_upsert(),
    }
}
