use std::io::{Cursor, ErrorKind};
use std::path::Path;

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};

use crate::error::{PipelineError, PipelineResult};

pub const JPEG_CONTENT_TYPE: &str = "image/jpeg";
pub const JPEG_EXTENSION: &str = "jpg";

/// Re-encoded image bytes ready for upload.
#[derive(Debug, Clone)]
pub struct EncodedAsset {
    pub bytes: Bytes,
    pub content_type: &'static str,
    pub extension: &'static str,
    pub width: u32,
    pub height: u32,
}

/// Re-encodes a local image as JPEG with its longest edge bounded by `max_dimension`.
pub async fn compress(raw: &Path, max_dimension: u32, quality: u8) -> PipelineResult<EncodedAsset> {
    let data = read_local(raw).await?;
    compress_bytes(data, max_dimension, quality).await
}

pub async fn compress_bytes(data: Bytes, max_dimension: u32, quality: u8) -> PipelineResult<EncodedAsset> {
    tokio::task::spawn_blocking(move || {
        let image = image::load_from_memory(&data)?;
        encode_jpeg(&bound(image, max_dimension), quality)
    })
    .await?
}

pub async fn read_local(path: &Path) -> PipelineResult<Bytes> {
    match tokio::fs::read(path).await {
        Ok(data) => Ok(Bytes::from(data)),
        Err(err) if err.kind() == ErrorKind::NotFound => Err(PipelineError::validation(format!(
            "local file {} no longer exists",
            path.display()
        ))),
        Err(err) => Err(err.into()),
    }
}

/// Shrinks to fit a `max_dimension` square; never upscales.
pub fn bound(image: DynamicImage, max_dimension: u32) -> DynamicImage {
    let (width, height) = image.dimensions();
    if width.max(height) <= max_dimension {
        image
    } else {
        image.resize(max_dimension, max_dimension, FilterType::Lanczos3)
    }
}

pub fn encode_jpeg(image: &DynamicImage, quality: u8) -> PipelineResult<EncodedAsset> {
    let rgb = image.to_rgb8();
    let mut buffer = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100)).encode_image(&rgb)?;

    Ok(EncodedAsset {
        bytes: Bytes::from(buffer.into_inner()),
        content_type: JPEG_CONTENT_TYPE,
        extension: JPEG_EXTENSION,
        width: rgb.width(),
        height: rgb.height(),
    })
}
