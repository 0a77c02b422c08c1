use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Aggregate root for one publish batch within a link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: Uuid,
    pub link_id: Uuid,
    pub owner_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewPost {
    pub id: Uuid,
    pub link_id: Uuid,
    pub owner_id: Uuid,
}

impl NewPost {
    pub fn new(link_id: Uuid, owner_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            link_id,
            owner_id,
        }
    }
}
