use std::collections::HashMap;
use std::path::PathBuf;

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::app::posts::{DeletedPost, MediaWithUrl};
use crate::domain::media::MediaKind;
use crate::domain::party::{BannerCrop, PartyBanner};
use crate::domain::publish::PublishOutcome;
use crate::domain::staged::{AssetOrigin, StagedAsset, ThumbnailState};
use crate::domain::storage::{Bucket, ObjectRef};
use crate::http::AppError;
use crate::AppState;

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

// ---------------------------------------------------------------------------
// Staging
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct StagedAssetView {
    pub local_id: Uuid,
    pub path: PathBuf,
    pub kind: MediaKind,
    pub origin: AssetOrigin,
    pub thumbnail: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_error: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub staged_at: OffsetDateTime,
}

impl From<StagedAsset> for StagedAssetView {
    fn from(asset: StagedAsset) -> Self {
        let thumbnail_error = match &asset.thumbnail {
            ThumbnailState::Failed(reason) => Some(reason.clone()),
            _ => None,
        };
        Self {
            local_id: asset.local_id,
            path: asset.source.path,
            kind: asset.source.kind,
            origin: asset.source.origin,
            thumbnail: asset.thumbnail.label(),
            thumbnail_error,
            staged_at: asset.staged_at,
        }
    }
}

#[derive(Deserialize)]
pub struct StageLibraryRequest {
    pub paths: Vec<PathBuf>,
}

#[derive(Deserialize)]
pub struct StageCameraRequest {
    pub path: PathBuf,
}

#[derive(Serialize)]
pub struct StagedResponse {
    pub local_ids: Vec<Uuid>,
}

pub async fn list_staged(
    Path(owner_id): Path<Uuid>,
    State(state): State<AppState>,
) -> Json<Vec<StagedAssetView>> {
    let staged = match state.sessions.existing(owner_id).await {
        Some(stager) => stager.snapshot().await,
        None => Vec::new(),
    };
    Json(staged.into_iter().map(StagedAssetView::from).collect())
}

pub async fn stage_from_library(
    Path(owner_id): Path<Uuid>,
    State(state): State<AppState>,
    Json(payload): Json<StageLibraryRequest>,
) -> Result<Json<StagedResponse>, AppError> {
    if payload.paths.is_empty() {
        return Err(AppError::bad_request("paths must not be empty"));
    }

    let stager = state.sessions.session(owner_id).await;
    let local_ids = stager.stage_from_library(payload.paths).await.map_err(|err| {
        tracing::warn!(error = ?err, %owner_id, "failed to stage library assets");
        AppError::from(err)
    })?;

    Ok(Json(StagedResponse { local_ids }))
}

pub async fn stage_from_camera(
    Path(owner_id): Path<Uuid>,
    State(state): State<AppState>,
    Json(payload): Json<StageCameraRequest>,
) -> Result<Json<StagedResponse>, AppError> {
    let stager = state.sessions.session(owner_id).await;
    let local_id = stager.stage_from_camera(payload.path).await.map_err(|err| {
        tracing::warn!(error = ?err, %owner_id, "failed to stage camera capture");
        AppError::from(err)
    })?;

    Ok(Json(StagedResponse {
        local_ids: vec![local_id],
    }))
}

pub async fn remove_staged(
    Path((owner_id, local_id)): Path<(Uuid, Uuid)>,
    State(state): State<AppState>,
) -> Result<StatusCode, AppError> {
    let removed = match state.sessions.existing(owner_id).await {
        Some(stager) => stager.remove(local_id).await,
        None => false,
    };
    state.sessions.prune(owner_id).await;

    if removed {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found("staged asset not found"))
    }
}

pub async fn clear_staged(
    Path(owner_id): Path<Uuid>,
    State(state): State<AppState>,
) -> Json<Value> {
    let cleared = match state.sessions.existing(owner_id).await {
        Some(stager) => stager.clear().await,
        None => 0,
    };
    state.sessions.prune(owner_id).await;
    Json(json!({ "cleared": cleared }))
}

pub async fn get_thumbnail(
    Path((owner_id, local_id)): Path<(Uuid, Uuid)>,
    State(state): State<AppState>,
) -> Result<Response, AppError> {
    let asset = match state.sessions.existing(owner_id).await {
        Some(stager) => stager.get(local_id).await,
        None => None,
    }
    .ok_or_else(|| AppError::not_found("staged asset not found"))?;

    match asset.thumbnail {
        ThumbnailState::Ready(thumbnail) => {
            Ok(([(header::CONTENT_TYPE, thumbnail.content_type)], thumbnail.bytes).into_response())
        }
        ThumbnailState::Pending | ThumbnailState::Generating => {
            Ok((StatusCode::ACCEPTED, Json(json!({ "thumbnail": "pending" }))).into_response())
        }
        ThumbnailState::Failed(_) => Err(AppError::not_found("thumbnail unavailable")),
    }
}

pub async fn retry_thumbnail(
    Path((owner_id, local_id)): Path<(Uuid, Uuid)>,
    State(state): State<AppState>,
) -> Result<StatusCode, AppError> {
    let stager = state
        .sessions
        .existing(owner_id)
        .await
        .ok_or_else(|| AppError::not_found("staged asset not found"))?;

    if stager.retry_thumbnail(local_id).await {
        Ok(StatusCode::ACCEPTED)
    } else {
        Err(AppError::conflict("thumbnail is not in a failed state"))
    }
}

// ---------------------------------------------------------------------------
// Publish
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct PublishRequest {
    pub owner_id: Uuid,
}

enum PublishTarget {
    NewPost { link_id: Uuid },
    Existing { post_id: Uuid },
}

/// Runs the publish on its own task. If the request is dropped, the token
/// is cancelled so no further assets start, but the current upload finishes.
async fn publish_detached(
    state: &AppState,
    owner_id: Uuid,
    target: PublishTarget,
) -> Result<PublishOutcome, AppError> {
    let stager = state
        .sessions
        .existing(owner_id)
        .await
        .ok_or_else(|| AppError::bad_request("nothing staged to publish"))?;

    let coordinator = state.publisher(stager);
    let cancel = CancellationToken::new();
    let _teardown = cancel.clone().drop_guard();

    let task = tokio::spawn(async move {
        match target {
            PublishTarget::NewPost { link_id } => coordinator.publish(link_id, owner_id, &cancel).await,
            PublishTarget::Existing { post_id } => coordinator.resume(post_id, owner_id, &cancel).await,
        }
    });

    let joined = task.await;
    state.sessions.prune(owner_id).await;

    match joined {
        Ok(result) => result.map_err(|err| {
            tracing::error!(error = ?err, %owner_id, "publish failed");
            AppError::from(err)
        }),
        Err(err) => {
            tracing::error!(error = ?err, %owner_id, "publish task aborted");
            Err(AppError::internal("publish task aborted"))
        }
    }
}

pub async fn publish(
    Path(link_id): Path<Uuid>,
    State(state): State<AppState>,
    Json(payload): Json<PublishRequest>,
) -> Result<Json<PublishOutcome>, AppError> {
    let outcome = publish_detached(&state, payload.owner_id, PublishTarget::NewPost { link_id }).await?;
    Ok(Json(outcome))
}

pub async fn resume_publish(
    Path(post_id): Path<Uuid>,
    State(state): State<AppState>,
    Json(payload): Json<PublishRequest>,
) -> Result<Json<PublishOutcome>, AppError> {
    let outcome = publish_detached(&state, payload.owner_id, PublishTarget::Existing { post_id }).await?;
    Ok(Json(outcome))
}

// ---------------------------------------------------------------------------
// Posts
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct OwnerQuery {
    pub owner_id: Uuid,
}

pub async fn list_post_media(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<Vec<MediaWithUrl>>, AppError> {
    let service = state.posts();
    let post = service.get_post(id).await.map_err(|err| {
        tracing::error!(error = ?err, post_id = %id, "failed to fetch post");
        AppError::from(err)
    })?;
    if post.is_none() {
        return Err(AppError::not_found("post not found"));
    }

    let media = service.list_media_with_urls(id).await.map_err(|err| {
        tracing::error!(error = ?err, post_id = %id, "failed to list post media");
        AppError::from(err)
    })?;
    Ok(Json(media))
}

pub async fn delete_post(
    Path(id): Path<Uuid>,
    Query(query): Query<OwnerQuery>,
    State(state): State<AppState>,
) -> Result<Json<DeletedPost>, AppError> {
    let deleted = state
        .posts()
        .delete_post(id, query.owner_id)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, post_id = %id, "failed to delete post");
            AppError::from(err)
        })?;

    match deleted {
        Some(deleted) => Ok(Json(deleted)),
        None => Err(AppError::not_found("post not found")),
    }
}

// ---------------------------------------------------------------------------
// URLs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct ResolveRequest {
    pub bucket: Bucket,
    pub paths: Vec<String>,
}

pub async fn resolve_urls(
    State(state): State<AppState>,
    Json(payload): Json<ResolveRequest>,
) -> Result<Json<HashMap<String, String>>, AppError> {
    let urls = state
        .resolver()
        .resolve(payload.bucket, &payload.paths)
        .await
        .map_err(|err| {
            tracing::warn!(error = ?err, bucket = %payload.bucket, "failed to resolve urls");
            AppError::from(err)
        })?;
    Ok(Json(urls))
}

// ---------------------------------------------------------------------------
// Banners and avatars
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct BannerCropRequest {
    pub source: ObjectRef,
    #[serde(default)]
    pub crop: BannerCrop,
}

pub async fn recrop_banner(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(payload): Json<BannerCropRequest>,
) -> Result<Json<Value>, AppError> {
    let banner: PartyBanner = state
        .banners()
        .recrop(id, payload.source, payload.crop)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, party_id = %id, "failed to recrop banner");
            AppError::from(err)
        })?;

    let url = match banner.path.as_deref() {
        Some(path) => Some(state.resolver().resolve_one(Bucket::Banners, path).await?),
        None => None,
    };
    Ok(Json(json!({ "banner": banner, "url": url })))
}

#[derive(Deserialize)]
pub struct AvatarRequest {
    pub path: PathBuf,
}

pub async fn set_avatar(
    Path(owner_id): Path<Uuid>,
    State(state): State<AppState>,
    Json(payload): Json<AvatarRequest>,
) -> Result<Json<Value>, AppError> {
    let url = state
        .avatars()
        .set_avatar(owner_id, &payload.path)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, user_id = %owner_id, "failed to set avatar");
            AppError::from(err)
        })?;
    Ok(Json(json!({ "url": url })))
}
