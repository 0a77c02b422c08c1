use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use image::DynamicImage;
use tokio::process::Command;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use crate::error::{PipelineError, PipelineResult};

/// Opens video files for frame sampling.
#[async_trait]
pub trait VideoDecoder: Send + Sync {
    async fn open(&self, path: &Path) -> PipelineResult<Box<dyn DecoderHandle>>;
}

/// An open decoder. `release` must be called exactly once; `DecoderLease` does it.
#[async_trait]
pub trait DecoderHandle: Send {
    fn duration(&self) -> Duration;

    async fn frame_at(&mut self, at: Duration) -> PipelineResult<DynamicImage>;

    fn release(&mut self);
}

/// Bounds the number of simultaneously open decoder handles.
#[derive(Clone)]
pub struct DecoderPool {
    decoder: Arc<dyn VideoDecoder>,
    permits: Arc<Semaphore>,
}

impl DecoderPool {
    pub fn new(decoder: Arc<dyn VideoDecoder>, max_open: usize) -> Self {
        Self {
            decoder,
            permits: Arc::new(Semaphore::new(max_open.max(1))),
        }
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    pub async fn acquire(&self, path: &Path) -> PipelineResult<DecoderLease> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| PipelineError::ResourceExhausted("decoder pool closed".to_string()))?;

        let handle = self.decoder.open(path).await?;
        debug!(path = %path.display(), "decoder handle acquired");
        Ok(DecoderLease {
            handle,
            _permit: permit,
        })
    }
}

/// Scoped decoder handle. Dropping the lease releases the handle and then its pool slot.
pub struct DecoderLease {
    handle: Box<dyn DecoderHandle>,
    _permit: OwnedSemaphorePermit,
}

impl Deref for DecoderLease {
    type Target = dyn DecoderHandle;

    fn deref(&self) -> &Self::Target {
        &*self.handle
    }
}

impl DerefMut for DecoderLease {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.handle
    }
}

impl Drop for DecoderLease {
    fn drop(&mut self) {
        self.handle.release();
    }
}

/// Samples frames by shelling out to `ffprobe` and `ffmpeg`.
pub struct FfmpegDecoder {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl FfmpegDecoder {
    pub fn new() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
        }
    }
}

impl Default for FfmpegDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VideoDecoder for FfmpegDecoder {
    async fn open(&self, path: &Path) -> PipelineResult<Box<dyn DecoderHandle>> {
        let output = Command::new(&self.ffprobe)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(path)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| PipelineError::ResourceExhausted(format!("ffprobe unavailable: {}", err)))?;

        if !output.status.success() {
            return Err(PipelineError::ResourceExhausted(format!(
                "ffprobe failed for {}: {}",
                path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let seconds: f64 = String::from_utf8_lossy(&output.stdout)
            .trim()
            .parse()
            .map_err(|err| PipelineError::ResourceExhausted(format!("unreadable video duration: {}", err)))?;

        Ok(Box::new(FfmpegHandle {
            ffmpeg: self.ffmpeg.clone(),
            path: path.to_path_buf(),
            duration: Duration::from_secs_f64(seconds.max(0.0)),
            released: false,
        }))
    }
}

struct FfmpegHandle {
    ffmpeg: PathBuf,
    path: PathBuf,
    duration: Duration,
    released: bool,
}

#[async_trait]
impl DecoderHandle for FfmpegHandle {
    fn duration(&self) -> Duration {
        self.duration
    }

    async fn frame_at(&mut self, at: Duration) -> PipelineResult<DynamicImage> {
        if self.released {
            return Err(PipelineError::ResourceExhausted("decoder already released".to_string()));
        }

        let output = Command::new(&self.ffmpeg)
            .args(["-v", "error", "-ss"])
            .arg(format!("{:.3}", at.as_secs_f64()))
            .arg("-i")
            .arg(&self.path)
            .args(["-frames:v", "1", "-f", "image2pipe", "-vcodec", "png", "-"])
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| PipelineError::ResourceExhausted(format!("ffmpeg unavailable: {}", err)))?;

        if !output.status.success() || output.stdout.is_empty() {
            return Err(PipelineError::ResourceExhausted(format!(
                "frame extraction failed for {}: {}",
                self.path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        image::load_from_memory(&output.stdout)
            .map_err(|err| PipelineError::ResourceExhausted(format!("undecodable frame: {}", err)))
    }

    fn release(&mut self) {
        if self.released {
            warn!(path = %self.path.display(), "decoder handle released twice");
        }
        self.released = true;
    }
}
