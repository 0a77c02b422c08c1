use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::Row;
use uuid::Uuid;

use crate::domain::media::{MediaAsset, MediaKind, NewMediaAsset};
use crate::domain::party::{BannerCrop, PartyBanner};
use crate::domain::post::{NewPost, Post};
use crate::error::{PipelineError, PipelineResult};
use crate::infra::db::Db;

/// Relational collaborator for posts, media rows, and the profile/party pointers.
#[async_trait]
pub trait MediaRepository: Send + Sync {
    async fn create_post(&self, post: NewPost) -> PipelineResult<Post>;

    async fn get_post(&self, post_id: Uuid) -> PipelineResult<Option<Post>>;

    async fn insert_media_asset(&self, asset: NewMediaAsset) -> PipelineResult<MediaAsset>;

    async fn get_media_asset(&self, media_id: Uuid) -> PipelineResult<Option<MediaAsset>>;

    async fn list_media(&self, post_id: Uuid) -> PipelineResult<Vec<MediaAsset>>;

    /// Deletes the post and its media rows together, returning the deleted rows.
    /// `None` when no post with that id belongs to `owner_id`.
    async fn delete_post(&self, post_id: Uuid, owner_id: Uuid) -> PipelineResult<Option<Vec<MediaAsset>>>;

    async fn get_party_banner(&self, party_id: Uuid) -> PipelineResult<Option<PartyBanner>>;

    /// Replaces the banner path and crop in a single statement.
    async fn update_party_banner(&self, party_id: Uuid, path: &str, crop: BannerCrop) -> PipelineResult<()>;

    async fn update_avatar(&self, user_id: Uuid, path: &str) -> PipelineResult<()>;
}

#[derive(Clone)]
pub struct PgRepository {
    db: Db,
}

impl PgRepository {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

fn post_from_row(row: &PgRow) -> Post {
    Post {
        id: row.get("id"),
        link_id: row.get("link_id"),
        owner_id: row.get("owner_id"),
        created_at: row.get("created_at"),
    }
}

fn media_from_row(row: &PgRow) -> PipelineResult<MediaAsset> {
    let kind: String = row.get("kind");
    let kind = MediaKind::from_db(&kind)
        .ok_or_else(|| PipelineError::Database(format!("unknown media kind: {}", kind)))?;

    Ok(MediaAsset {
        id: row.get("id"),
        post_id: row.get("post_id"),
        path: row.get("path"),
        mime_type: row.get("mime_type"),
        kind,
        duration_ms: row.get("duration_ms"),
        created_at: row.get("created_at"),
    })
}

#[async_trait]
impl MediaRepository for PgRepository {
    async fn create_post(&self, post: NewPost) -> PipelineResult<Post> {
        let row = sqlx::query(
            "INSERT INTO posts (id, link_id, owner_id) \
             VALUES ($1, $2, $3) \
             RETURNING id, link_id, owner_id, created_at",
        )
        .bind(post.id)
        .bind(post.link_id)
        .bind(post.owner_id)
        .fetch_one(self.db.pool())
        .await?;

        Ok(post_from_row(&row))
    }

    async fn get_post(&self, post_id: Uuid) -> PipelineResult<Option<Post>> {
        let row = sqlx::query("SELECT id, link_id, owner_id, created_at FROM posts WHERE id = $1")
            .bind(post_id)
            .fetch_optional(self.db.pool())
            .await?;

        Ok(row.as_ref().map(post_from_row))
    }

    async fn insert_media_asset(&self, asset: NewMediaAsset) -> PipelineResult<MediaAsset> {
        let row = sqlx::query(
            "INSERT INTO media_assets (id, post_id, path, mime_type, kind, duration_ms) \
             VALUES ($1, $2, $3, $4, $5::media_kind, $6) \
             RETURNING id, post_id, path, mime_type, kind::text AS kind, duration_ms, created_at",
        )
        .bind(asset.id)
        .bind(asset.post_id)
        .bind(&asset.path)
        .bind(&asset.mime_type)
        .bind(asset.kind.as_db())
        .bind(asset.duration_ms)
        .fetch_one(self.db.pool())
        .await?;

        media_from_row(&row)
    }

    async fn get_media_asset(&self, media_id: Uuid) -> PipelineResult<Option<MediaAsset>> {
        let row = sqlx::query(
            "SELECT id, post_id, path, mime_type, kind::text AS kind, duration_ms, created_at \
             FROM media_assets WHERE id = $1",
        )
        .bind(media_id)
        .fetch_optional(self.db.pool())
        .await?;

        row.as_ref().map(media_from_row).transpose()
    }

    async fn list_media(&self, post_id: Uuid) -> PipelineResult<Vec<MediaAsset>> {
        let rows = sqlx::query(
            "SELECT id, post_id, path, mime_type, kind::text AS kind, duration_ms, created_at \
             FROM media_assets WHERE post_id = $1 \
             ORDER BY created_at, id",
        )
        .bind(post_id)
        .fetch_all(self.db.pool())
        .await?;

        rows.iter().map(media_from_row).collect()
    }

    async fn delete_post(&self, post_id: Uuid, owner_id: Uuid) -> PipelineResult<Option<Vec<MediaAsset>>> {
        let mut tx = self.db.pool().begin().await?;

        let owned: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM posts WHERE id = $1 AND owner_id = $2 FOR UPDATE")
                .bind(post_id)
                .bind(owner_id)
                .fetch_optional(&mut *tx)
                .await?;
        if owned.is_none() {
            return Ok(None);
        }

        let rows = sqlx::query(
            "DELETE FROM media_assets WHERE post_id = $1 \
             RETURNING id, post_id, path, mime_type, kind::text AS kind, duration_ms, created_at",
        )
        .bind(post_id)
        .fetch_all(&mut *tx)
        .await?;
        let media = rows.iter().map(media_from_row).collect::<PipelineResult<Vec<_>>>()?;

        sqlx::query("DELETE FROM posts WHERE id = $1")
            .bind(post_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(media))
    }

    async fn get_party_banner(&self, party_id: Uuid) -> PipelineResult<Option<PartyBanner>> {
        let row = sqlx::query(
            "SELECT id, banner_path, banner_offset_x, banner_offset_y, banner_zoom \
             FROM parties WHERE id = $1",
        )
        .bind(party_id)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(row.map(|row| PartyBanner {
            party_id: row.get("id"),
            path: row.get("banner_path"),
            crop: BannerCrop {
                offset_x: row.get("banner_offset_x"),
                offset_y: row.get("banner_offset_y"),
                zoom: row.get("banner_zoom"),
            },
        }))
    }

    async fn update_party_banner(&self, party_id: Uuid, path: &str, crop: BannerCrop) -> PipelineResult<()> {
        let result = sqlx::query(
            "UPDATE parties \
             SET banner_path = $2, banner_offset_x = $3, banner_offset_y = $4, banner_zoom = $5 \
             WHERE id = $1",
        )
        .bind(party_id)
        .bind(path)
        .bind(crop.offset_x)
        .bind(crop.offset_y)
        .bind(crop.zoom)
        .execute(self.db.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(PipelineError::NotFound(format!("party {}", party_id)));
        }
        Ok(())
    }

    async fn update_avatar(&self, user_id: Uuid, path: &str) -> PipelineResult<()> {
        sqlx::query(
            "INSERT INTO profiles (id, avatar_path) VALUES ($1, $2) \
             ON CONFLICT (id) DO UPDATE SET avatar_path = EXCLUDED.avatar_path, updated_at = now()",
        )
        .bind(user_id)
        .bind(path)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }
}
