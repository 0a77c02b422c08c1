use std::path::PathBuf;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::media::MediaKind;

pub type LocalId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetOrigin {
    Library,
    Camera,
}

/// A locally picked or captured file, before it enters the stager.
#[derive(Debug, Clone)]
pub struct LocalAsset {
    pub path: PathBuf,
    pub kind: MediaKind,
    pub content_type: String,
    pub origin: AssetOrigin,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thumbnail {
    pub bytes: Bytes,
    pub width: u32,
    pub height: u32,
    pub content_type: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThumbnailState {
    Pending,
    Generating,
    Ready(Thumbnail),
    Failed(String),
}

impl ThumbnailState {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Generating => "generating",
            Self::Ready(_) => "ready",
            Self::Failed(_) => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready(_) | Self::Failed(_))
    }
}

/// Process-local entry awaiting publish. Never persisted.
#[derive(Debug, Clone)]
pub struct StagedAsset {
    pub local_id: LocalId,
    pub source: LocalAsset,
    pub thumbnail: ThumbnailState,
    pub staged_at: OffsetDateTime,
}
