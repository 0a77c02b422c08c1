use serde::Serialize;
use uuid::Uuid;

use crate::domain::post::Post;
use crate::domain::staged::LocalId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PublishState {
    Idle,
    CreatingPost,
    UploadingAssets { index: usize, total: usize },
    Completed,
    PartiallyFailed,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AssetStatus {
    Published { media_id: Uuid, path: String },
    Failed { error: String, retryable: bool },
}

#[derive(Debug, Clone, Serialize)]
pub struct AssetReport {
    pub local_id: LocalId,
    #[serde(flatten)]
    pub status: AssetStatus,
}

impl AssetReport {
    pub fn is_published(&self) -> bool {
        matches!(self.status, AssetStatus::Published { .. })
    }
}

/// Per-asset accounting for one publish call. Partial success is not an error.
#[derive(Debug, Clone, Serialize)]
pub struct PublishOutcome {
    pub post: Post,
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub assets: Vec<AssetReport>,
}

impl PublishOutcome {
    pub fn from_reports(post: Post, assets: Vec<AssetReport>) -> Self {
        let completed = assets.iter().filter(|report| report.is_published()).count();
        Self {
            post,
            total: assets.len(),
            completed,
            failed: assets.len() - completed,
            assets,
        }
    }

    pub fn final_state(&self) -> PublishState {
        if self.failed == 0 {
            PublishState::Completed
        } else {
            PublishState::PartiallyFailed
        }
    }

    pub fn published_ids(&self) -> Vec<LocalId> {
        self.assets
            .iter()
            .filter(|report| report.is_published())
            .map(|report| report.local_id)
            .collect()
    }
}
