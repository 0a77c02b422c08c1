//! Storage Layout Tests
//!
//! Covers object path construction, parsing, bucket visibility, and content types.

use std::path::Path;

use partyshot::domain::media::{content_type_from_path, extension_from_content_type, MediaKind};
use partyshot::domain::storage::{avatar_path, banner_path, media_path, parse_media_path, Bucket};
use partyshot::error::PipelineError;
use uuid::Uuid;

// ===========================================================================
// Paths
// ===========================================================================

#[test]
fn media_path_layout() {
    let link = Uuid::new_v4();
    let post = Uuid::new_v4();
    let media = Uuid::new_v4();

    let path = media_path(link, post, media, "jpg");
    assert_eq!(path, format!("{}/posts/{}/{}.jpg", link, post, media));
    assert_eq!(parse_media_path(&path), Some((link, post, media, "jpg")));
}

#[test]
fn parse_media_path_rejects_foreign_layouts() {
    let id = Uuid::new_v4();
    assert_eq!(parse_media_path(&format!("{}/avatar.jpg", id)), None);
    assert_eq!(parse_media_path(&format!("{}/stories/{}/{}.jpg", id, id, id)), None);
    assert_eq!(parse_media_path(&format!("{}/posts/{}/{}", id, id, id)), None);
    assert_eq!(parse_media_path(&format!("{}/posts/{}/{}.jpg/extra", id, id, id)), None);
    assert_eq!(parse_media_path("not-a-uuid/posts/x/y.jpg"), None);
}

#[test]
fn profile_paths_are_fixed_per_owner() {
    let id = Uuid::new_v4();
    assert_eq!(avatar_path(id), format!("{}/avatar.jpg", id));
    assert_eq!(banner_path(id), format!("{}/banner.jpg", id));
}

// ===========================================================================
// Buckets
// ===========================================================================

#[test]
fn bucket_visibility() {
    assert!(Bucket::Avatars.is_public());
    assert!(Bucket::Banners.is_public());
    assert!(!Bucket::PostMedia.is_public());

    assert!(Bucket::Avatars.allows_upsert());
    assert!(Bucket::Banners.allows_upsert());
    assert!(!Bucket::PostMedia.allows_upsert());
}

#[test]
fn bucket_serializes_snake_case() {
    let json = serde_json::to_string(&Bucket::PostMedia).unwrap();
    assert_eq!(json, "\"post_media\"");
    let parsed: Bucket = serde_json::from_str("\"banners\"").unwrap();
    assert_eq!(parsed, Bucket::Banners);
}

// ===========================================================================
// Content types
// ===========================================================================

#[test]
fn content_type_from_extension() {
    assert_eq!(content_type_from_path(Path::new("a/b.JPG")).unwrap(), "image/jpeg");
    assert_eq!(content_type_from_path(Path::new("b.jpeg")).unwrap(), "image/jpeg");
    assert_eq!(content_type_from_path(Path::new("b.png")).unwrap(), "image/png");
    assert_eq!(content_type_from_path(Path::new("clip.mov")).unwrap(), "video/quicktime");
    assert_eq!(content_type_from_path(Path::new("clip.m4v")).unwrap(), "video/mp4");
}

#[test]
fn unsupported_extensions_are_validation_errors() {
    let err = content_type_from_path(Path::new("notes.txt")).unwrap_err();
    assert!(matches!(err, PipelineError::Validation(_)));
    assert!(!err.is_retryable());

    let err = content_type_from_path(Path::new("README")).unwrap_err();
    assert!(matches!(err, PipelineError::Validation(_)));
}

#[test]
fn extension_for_content_type() {
    assert_eq!(extension_from_content_type("image/jpeg").unwrap(), "jpg");
    assert_eq!(extension_from_content_type("video/quicktime").unwrap(), "mov");
    assert!(extension_from_content_type("application/pdf").is_err());
}

#[test]
fn media_kind_from_content_type() {
    assert_eq!(MediaKind::from_content_type("image/webp"), Some(MediaKind::Image));
    assert_eq!(MediaKind::from_content_type("video/mp4"), Some(MediaKind::Video));
    assert_eq!(MediaKind::from_content_type("text/plain"), None);
    assert_eq!(MediaKind::from_db(MediaKind::Video.as_db()), Some(MediaKind::Video));
}
