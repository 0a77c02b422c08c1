use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use time::OffsetDateTime;
use tokio::sync::{watch, Mutex, OwnedMutexGuard};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::media::{content_type_from_path, MediaKind};
use crate::domain::staged::{AssetOrigin, LocalAsset, LocalId, StagedAsset, ThumbnailState};
use crate::error::{PipelineError, PipelineResult};
use crate::media::thumbnail::Thumbnailer;

/// In-memory queue of locally selected assets awaiting publish.
///
/// Each staged asset gets one background thumbnail task. Removing an asset
/// detaches its task; the task's result is applied only while the asset is
/// still staged and still `Generating`.
#[derive(Clone)]
pub struct AssetStager {
    inner: Arc<StagerInner>,
}

struct StagerInner {
    entries: Mutex<Vec<StagedAsset>>,
    thumbnailer: Arc<dyn Thumbnailer>,
    in_flight: watch::Sender<usize>,
    publishing: Arc<Mutex<()>>,
}

/// Exclusive right to publish from one stager. Released on drop.
pub struct PublishClaim {
    _guard: OwnedMutexGuard<()>,
}

impl StagerInner {
    /// Moves an entry to `next` if it is still staged and `allowed` accepts its current state.
    async fn transition(
        &self,
        local_id: LocalId,
        allowed: impl Fn(&ThumbnailState) -> bool,
        next: ThumbnailState,
    ) -> bool {
        let mut entries = self.entries.lock().await;
        match entries.iter_mut().find(|entry| entry.local_id == local_id) {
            Some(entry) if allowed(&entry.thumbnail) => {
                entry.thumbnail = next;
                true
            }
            _ => false,
        }
    }
}

struct InFlightGuard(Arc<StagerInner>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.in_flight.send_modify(|count| *count = count.saturating_sub(1));
    }
}

impl AssetStager {
    pub fn new(thumbnailer: Arc<dyn Thumbnailer>) -> Self {
        let (in_flight, _) = watch::channel(0);
        Self {
            inner: Arc::new(StagerInner {
                entries: Mutex::new(Vec::new()),
                thumbnailer,
                in_flight,
                publishing: Arc::new(Mutex::new(())),
            }),
        }
    }

    /// Appends assets in order and schedules their thumbnails without waiting on them.
    pub async fn stage(&self, assets: Vec<LocalAsset>) -> Vec<LocalId> {
        let staged: Vec<StagedAsset> = assets
            .into_iter()
            .map(|source| StagedAsset {
                local_id: Uuid::new_v4(),
                source,
                thumbnail: ThumbnailState::Pending,
                staged_at: OffsetDateTime::now_utc(),
            })
            .collect();

        let ids = staged.iter().map(|asset| asset.local_id).collect();
        let jobs: Vec<_> = staged
            .iter()
            .map(|asset| (asset.local_id, asset.source.clone()))
            .collect();

        self.inner.entries.lock().await.extend(staged);

        for (local_id, source) in jobs {
            self.spawn_thumbnail(local_id, source);
        }
        ids
    }

    pub async fn stage_from_library(&self, paths: Vec<PathBuf>) -> PipelineResult<Vec<LocalId>> {
        let mut assets = Vec::with_capacity(paths.len());
        for path in paths {
            assets.push(local_asset(path, AssetOrigin::Library).await?);
        }
        Ok(self.stage(assets).await)
    }

    pub async fn stage_from_camera(&self, path: PathBuf) -> PipelineResult<LocalId> {
        let asset = local_asset(path, AssetOrigin::Camera).await?;
        let ids = self.stage(vec![asset]).await;
        ids.into_iter()
            .next()
            .ok_or_else(|| PipelineError::validation("camera capture was not staged"))
    }

    pub async fn remove(&self, local_id: LocalId) -> bool {
        let mut entries = self.inner.entries.lock().await;
        let before = entries.len();
        entries.retain(|entry| entry.local_id != local_id);
        entries.len() != before
    }

    pub async fn clear(&self) -> usize {
        let mut entries = self.inner.entries.lock().await;
        let count = entries.len();
        entries.clear();
        count
    }

    /// Removes exactly the given ids, e.g. after they were published.
    pub async fn consume(&self, local_ids: &[LocalId]) -> usize {
        let mut entries = self.inner.entries.lock().await;
        let before = entries.len();
        entries.retain(|entry| !local_ids.contains(&entry.local_id));
        before - entries.len()
    }

    /// Entries in staging order.
    pub async fn snapshot(&self) -> Vec<StagedAsset> {
        self.inner.entries.lock().await.clone()
    }

    pub async fn get(&self, local_id: LocalId) -> Option<StagedAsset> {
        self.inner
            .entries
            .lock()
            .await
            .iter()
            .find(|entry| entry.local_id == local_id)
            .cloned()
    }

    pub async fn len(&self) -> usize {
        self.inner.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.entries.lock().await.is_empty()
    }

    /// Re-runs generation for a `Failed` thumbnail. Returns false for any other state.
    pub async fn retry_thumbnail(&self, local_id: LocalId) -> bool {
        let source = {
            let mut entries = self.inner.entries.lock().await;
            match entries.iter_mut().find(|entry| entry.local_id == local_id) {
                Some(entry) if matches!(entry.thumbnail, ThumbnailState::Failed(_)) => {
                    entry.thumbnail = ThumbnailState::Pending;
                    entry.source.clone()
                }
                _ => return false,
            }
        };

        self.spawn_thumbnail(local_id, source);
        true
    }

    /// Waits until no thumbnail generation is running, including detached ones.
    pub async fn settled(&self) {
        let mut rx = self.inner.in_flight.subscribe();
        let _ = rx.wait_for(|count| *count == 0).await;
    }

    pub fn in_flight(&self) -> usize {
        *self.inner.in_flight.borrow()
    }

    /// Fails fast while another publish holds this stager.
    pub fn claim_publish(&self) -> PipelineResult<PublishClaim> {
        self.inner
            .publishing
            .clone()
            .try_lock_owned()
            .map(|guard| PublishClaim { _guard: guard })
            .map_err(|_| PipelineError::InProgress("publish".to_string()))
    }

    /// Nothing staged, no thumbnail work, and no other handle to this stager.
    fn is_idle(&self) -> bool {
        Arc::strong_count(&self.inner) == 1
            && self.in_flight() == 0
            && self
                .inner
                .entries
                .try_lock()
                .map(|entries| entries.is_empty())
                .unwrap_or(false)
    }

    fn spawn_thumbnail(&self, local_id: LocalId, source: LocalAsset) {
        let inner = self.inner.clone();
        inner.in_flight.send_modify(|count| *count += 1);

        tokio::spawn(async move {
            let _guard = InFlightGuard(inner.clone());

            let started = inner
                .transition(
                    local_id,
                    |state| matches!(state, ThumbnailState::Pending),
                    ThumbnailState::Generating,
                )
                .await;
            if !started {
                debug!(%local_id, "asset removed before thumbnail started");
                return;
            }

            let next = match inner.thumbnailer.generate(&source).await {
                Ok(thumbnail) => ThumbnailState::Ready(thumbnail),
                Err(err) => {
                    warn!(error = ?err, %local_id, path = %source.path.display(), "thumbnail generation failed");
                    ThumbnailState::Failed(err.to_string())
                }
            };

            let applied = inner
                .transition(
                    local_id,
                    |state| matches!(state, ThumbnailState::Generating),
                    next,
                )
                .await;
            if !applied {
                debug!(%local_id, "discarding thumbnail for asset no longer staged");
            }
        });
    }
}

async fn local_asset(path: PathBuf, origin: AssetOrigin) -> PipelineResult<LocalAsset> {
    let metadata = tokio::fs::metadata(&path)
        .await
        .map_err(|err| PipelineError::validation(format!("cannot stage {}: {}", path.display(), err)))?;
    if !metadata.is_file() {
        return Err(PipelineError::validation(format!(
            "cannot stage {}: not a regular file",
            path.display()
        )));
    }

    let content_type = content_type_from_path(&path)?;
    let kind = MediaKind::from_content_type(content_type)
        .ok_or_else(|| PipelineError::validation(format!("unsupported media type {}", content_type)))?;

    Ok(LocalAsset {
        path,
        kind,
        content_type: content_type.to_string(),
        origin,
    })
}

/// One stager per owner. Nothing here outlives the process.
#[derive(Clone)]
pub struct StagingSessions {
    sessions: Arc<Mutex<HashMap<Uuid, AssetStager>>>,
    thumbnailer: Arc<dyn Thumbnailer>,
}

impl StagingSessions {
    pub fn new(thumbnailer: Arc<dyn Thumbnailer>) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            thumbnailer,
        }
    }

    pub async fn session(&self, owner_id: Uuid) -> AssetStager {
        self.sessions
            .lock()
            .await
            .entry(owner_id)
            .or_insert_with(|| AssetStager::new(self.thumbnailer.clone()))
            .clone()
    }

    pub async fn existing(&self, owner_id: Uuid) -> Option<AssetStager> {
        self.sessions.lock().await.get(&owner_id).cloned()
    }

    /// Forgets the owner's stager once it is idle. Callers must drop their
    /// own handles first.
    pub async fn prune(&self, owner_id: Uuid) -> bool {
        let mut sessions = self.sessions.lock().await;
        let idle = sessions.get(&owner_id).is_some_and(AssetStager::is_idle);
        if idle {
            sessions.remove(&owner_id);
            debug!(%owner_id, "pruned idle staging session");
        }
        idle
    }

    /// Number of owners with a live stager.
    pub async fn active(&self) -> usize {
        self.sessions.lock().await.len()
    }
}
