use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use crate::domain::media::MediaKind;
use crate::domain::staged::{LocalAsset, Thumbnail};
use crate::error::{PipelineError, PipelineResult};
use crate::media::compress::{bound, encode_jpeg, read_local};
use crate::media::decoder::DecoderPool;

/// Produces small previews for staged assets.
#[async_trait]
pub trait Thumbnailer: Send + Sync {
    async fn generate(&self, asset: &LocalAsset) -> PipelineResult<Thumbnail>;

    /// Video duration when it can be determined. Images return `None`.
    async fn video_duration(&self, _asset: &LocalAsset) -> Option<Duration> {
        None
    }
}

#[derive(Clone)]
pub struct ThumbnailGenerator {
    decoders: DecoderPool,
    max_dimension: u32,
    quality: u8,
}

impl ThumbnailGenerator {
    pub fn new(decoders: DecoderPool, max_dimension: u32, quality: u8) -> Self {
        Self {
            decoders,
            max_dimension,
            quality,
        }
    }

    pub async fn image_thumbnail(&self, data: Bytes) -> PipelineResult<Thumbnail> {
        let (max_dimension, quality) = (self.max_dimension, self.quality);
        tokio::task::spawn_blocking(move || -> PipelineResult<Thumbnail> {
            let image = image::load_from_memory(&data)?;
            let encoded = encode_jpeg(&bound(image, max_dimension), quality)?;
            Ok(Thumbnail {
                bytes: encoded.bytes,
                width: encoded.width,
                height: encoded.height,
                content_type: encoded.content_type,
            })
        })
        .await?
    }

    /// Samples the middle frame. The decoder handle is released on every exit path.
    pub async fn video_thumbnail(&self, path: &Path) -> PipelineResult<Thumbnail> {
        let frame = {
            let mut lease = self.decoders.acquire(path).await?;
            let at = lease.duration() / 2;
            lease.frame_at(at).await?
        };

        let (max_dimension, quality) = (self.max_dimension, self.quality);
        tokio::task::spawn_blocking(move || -> PipelineResult<Thumbnail> {
            let encoded = encode_jpeg(&bound(frame, max_dimension), quality)?;
            Ok(Thumbnail {
                bytes: encoded.bytes,
                width: encoded.width,
                height: encoded.height,
                content_type: encoded.content_type,
            })
        })
        .await?
    }
}

#[async_trait]
impl Thumbnailer for ThumbnailGenerator {
    async fn generate(&self, asset: &LocalAsset) -> PipelineResult<Thumbnail> {
        let result = match asset.kind {
            MediaKind::Image => {
                let data = read_local(&asset.path).await?;
                self.image_thumbnail(data).await
            }
            MediaKind::Video => self.video_thumbnail(&asset.path).await,
        };

        result.map_err(|err| match err {
            PipelineError::ResourceExhausted(_) => err,
            other => PipelineError::ResourceExhausted(format!(
                "thumbnail for {} failed: {}",
                asset.path.display(),
                other
            )),
        })
    }

    async fn video_duration(&self, asset: &LocalAsset) -> Option<Duration> {
        if asset.kind != MediaKind::Video {
            return None;
        }

        match self.decoders.acquire(&asset.path).await {
            Ok(lease) => Some(lease.duration()),
            Err(err) => {
                debug!(error = ?err, path = %asset.path.display(), "video duration unavailable");
                None
            }
        }
    }
}
