use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Normalized crop placement for a banner: offsets in `[0, 1]`, zoom >= 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BannerCrop {
    pub offset_x: f32,
    pub offset_y: f32,
    pub zoom: f32,
}

impl Default for BannerCrop {
    fn default() -> Self {
        Self {
            offset_x: 0.5,
            offset_y: 0.5,
            zoom: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartyBanner {
    pub party_id: Uuid,
    pub path: Option<String>,
    pub crop: BannerCrop,
}
