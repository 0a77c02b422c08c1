use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Named partition of the object store. Visibility is fixed per bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    Avatars,
    Banners,
    PostMedia,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Public,
    Private,
}

impl Bucket {
    pub fn visibility(&self) -> Visibility {
        match self {
            Self::Avatars | Self::Banners => Visibility::Public,
            Self::PostMedia => Visibility::Private,
        }
    }

    pub fn is_public(&self) -> bool {
        self.visibility() == Visibility::Public
    }

    /// Avatar and banner objects are overwritten in place; post media never is.
    pub fn allows_upsert(&self) -> bool {
        match self {
            Self::Avatars | Self::Banners => true,
            Self::PostMedia => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Avatars => "avatars",
            Self::Banners => "banners",
            Self::PostMedia => "post_media",
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored object, addressed by bucket and path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    pub bucket: Bucket,
    pub path: String,
}

/// `{link_id}/posts/{post_id}/{media_id}.{ext}`
pub fn media_path(link_id: Uuid, post_id: Uuid, media_id: Uuid, ext: &str) -> String {
    format!("{}/posts/{}/{}.{}", link_id, post_id, media_id, ext)
}

pub fn avatar_path(user_id: Uuid) -> String {
    format!("{}/avatar.jpg", user_id)
}

pub fn banner_path(party_id: Uuid) -> String {
    format!("{}/banner.jpg", party_id)
}

/// Splits a post media path back into `(link_id, post_id, media_id, ext)`.
pub fn parse_media_path(path: &str) -> Option<(Uuid, Uuid, Uuid, &str)> {
    let mut parts = path.split('/');
    let link_id = parts.next()?.parse().ok()?;
    if parts.next()? != "posts" {
        return None;
    }
    let post_id = parts.next()?.parse().ok()?;
    let file = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    let (stem, ext) = file.rsplit_once('.')?;
    if ext.is_empty() {
        return None;
    }
    let media_id = stem.parse().ok()?;
    Some((link_id, post_id, media_id, ext))
}
