#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use bytes::Bytes;
use http_body_util::BodyExt;
use image::{DynamicImage, Rgb, RgbImage};
use serde_json::Value;
use time::OffsetDateTime;
use tokio::sync::Semaphore;
use tower::ServiceExt;
use uuid::Uuid;

use partyshot::app::staging::AssetStager;
use partyshot::config::PipelineSettings;
use partyshot::domain::media::{MediaAsset, NewMediaAsset};
use partyshot::domain::party::{BannerCrop, PartyBanner};
use partyshot::domain::post::{NewPost, Post};
use partyshot::domain::staged::{LocalAsset, Thumbnail};
use partyshot::domain::storage::Bucket;
use partyshot::error::{PipelineError, PipelineResult};
use partyshot::infra::cache::MemoryUrlCache;
use partyshot::infra::repository::MediaRepository;
use partyshot::infra::storage::{ObjectStore, UploadOptions};
use partyshot::media::decoder::{DecoderHandle, DecoderPool, VideoDecoder};
use partyshot::media::thumbnail::{ThumbnailGenerator, Thumbnailer};
use partyshot::AppState;

// ---------------------------------------------------------------------------
// Object store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub bytes: Bytes,
    pub content_type: String,
}

#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<(Bucket, String), StoredObject>>,
    uploads: AtomicUsize,
    mints: AtomicUsize,
    sign_calls: Mutex<Vec<Vec<String>>>,
    remove_calls: Mutex<Vec<(Bucket, Vec<String>)>>,
    fail_upload_at: Mutex<Option<usize>>,
    fail_uploads_for: Mutex<Option<Bucket>>,
    hang_uploads: AtomicBool,
    fail_downloads: AtomicBool,
}

impl MemoryObjectStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The n-th upload call (0-based) fails with a transient error.
    pub fn fail_upload_at(&self, index: usize) {
        *self.fail_upload_at.lock().unwrap() = Some(index);
    }

    pub fn fail_uploads_for(&self, bucket: Bucket) {
        *self.fail_uploads_for.lock().unwrap() = Some(bucket);
    }

    pub fn hang_uploads(&self) {
        self.hang_uploads.store(true, Ordering::SeqCst);
    }

    pub fn fail_downloads(&self) {
        self.fail_downloads.store(true, Ordering::SeqCst);
    }

    pub fn put(&self, bucket: Bucket, path: &str, bytes: Bytes, content_type: &str) {
        self.objects.lock().unwrap().insert(
            (bucket, path.to_string()),
            StoredObject {
                bytes,
                content_type: content_type.to_string(),
            },
        );
    }

    pub fn get(&self, bucket: Bucket, path: &str) -> Option<StoredObject> {
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket, path.to_string()))
            .cloned()
    }

    pub fn contains(&self, bucket: Bucket, path: &str) -> bool {
        self.get(bucket, path).is_some()
    }

    pub fn object_count(&self, bucket: Bucket) -> usize {
        self.objects
            .lock()
            .unwrap()
            .keys()
            .filter(|(b, _)| *b == bucket)
            .count()
    }

    pub fn sign_calls(&self) -> Vec<Vec<String>> {
        self.sign_calls.lock().unwrap().clone()
    }

    pub fn remove_calls(&self) -> Vec<(Bucket, Vec<String>)> {
        self.remove_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn upload(
        &self,
        bucket: Bucket,
        path: &str,
        bytes: Bytes,
        options: UploadOptions,
    ) -> PipelineResult<()> {
        let index = self.uploads.fetch_add(1, Ordering::SeqCst);
        if self.hang_uploads.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if *self.fail_upload_at.lock().unwrap() == Some(index) {
            return Err(PipelineError::transient("injected upload failure"));
        }
        if *self.fail_uploads_for.lock().unwrap() == Some(bucket) {
            return Err(PipelineError::transient("injected bucket failure"));
        }

        let mut objects = self.objects.lock().unwrap();
        let key = (bucket, path.to_string());
        if !options.upsert && objects.contains_key(&key) {
            return Err(PipelineError::Conflict {
                bucket,
                path: path.to_string(),
            });
        }
        objects.insert(
            key,
            StoredObject {
                bytes,
                content_type: options.content_type,
            },
        );
        Ok(())
    }

    async fn remove(&self, bucket: Bucket, paths: &[String]) -> PipelineResult<usize> {
        self.remove_calls
            .lock()
            .unwrap()
            .push((bucket, paths.to_vec()));
        let mut objects = self.objects.lock().unwrap();
        Ok(paths
            .iter()
            .filter(|path| objects.remove(&(bucket, path.to_string())).is_some())
            .count())
    }

    fn public_url(&self, bucket: Bucket, path: &str) -> String {
        format!("https://cdn.test/{}/{}", bucket, path)
    }

    async fn signed_urls(
        &self,
        bucket: Bucket,
        paths: &[String],
        _ttl: Duration,
    ) -> PipelineResult<HashMap<String, String>> {
        self.sign_calls.lock().unwrap().push(paths.to_vec());
        Ok(paths
            .iter()
            .map(|path| {
                let n = self.mints.fetch_add(1, Ordering::SeqCst);
                (
                    path.clone(),
                    format!("https://private.test/{}/{}?sig={}", bucket, path, n),
                )
            })
            .collect())
    }

    async fn download(&self, bucket: Bucket, path: &str) -> PipelineResult<Bytes> {
        if self.fail_downloads.load(Ordering::SeqCst) {
            return Err(PipelineError::transient("injected download failure"));
        }
        self.get(bucket, path)
            .map(|object| object.bytes)
            .ok_or_else(|| PipelineError::NotFound(format!("{}/{}", bucket, path)))
    }
}

// ---------------------------------------------------------------------------
// Repository
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryRepository {
    posts: Mutex<Vec<Post>>,
    media: Mutex<Vec<MediaAsset>>,
    parties: Mutex<HashMap<Uuid, PartyBanner>>,
    avatars: Mutex<HashMap<Uuid, String>>,
    fail_create_post: AtomicBool,
    fail_media_insert_at: Mutex<Option<usize>>,
    media_inserts: AtomicUsize,
    stall_before_insert: AtomicBool,
    stall_after_insert: AtomicBool,
    fail_banner_update: AtomicBool,
}

impl MemoryRepository {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_create_post(&self) {
        self.fail_create_post.store(true, Ordering::SeqCst);
    }

    pub fn fail_media_insert_at(&self, index: usize) {
        *self.fail_media_insert_at.lock().unwrap() = Some(index);
    }

    /// Media inserts hang without writing anything.
    pub fn stall_before_insert(&self) {
        self.stall_before_insert.store(true, Ordering::SeqCst);
    }

    /// Media inserts write the row, then hang before acknowledging it.
    pub fn stall_after_insert(&self) {
        self.stall_after_insert.store(true, Ordering::SeqCst);
    }

    pub fn fail_banner_update(&self) {
        self.fail_banner_update.store(true, Ordering::SeqCst);
    }

    pub fn posts(&self) -> Vec<Post> {
        self.posts.lock().unwrap().clone()
    }

    pub fn media(&self) -> Vec<MediaAsset> {
        self.media.lock().unwrap().clone()
    }

    pub fn add_party(&self, party_id: Uuid, banner_path: Option<String>) {
        self.parties.lock().unwrap().insert(
            party_id,
            PartyBanner {
                party_id,
                path: banner_path,
                crop: BannerCrop::default(),
            },
        );
    }

    pub fn party(&self, party_id: Uuid) -> Option<PartyBanner> {
        self.parties.lock().unwrap().get(&party_id).cloned()
    }

    pub fn avatar(&self, user_id: Uuid) -> Option<String> {
        self.avatars.lock().unwrap().get(&user_id).cloned()
    }
}

#[async_trait]
impl MediaRepository for MemoryRepository {
    async fn create_post(&self, post: NewPost) -> PipelineResult<Post> {
        if self.fail_create_post.load(Ordering::SeqCst) {
            return Err(PipelineError::Database("injected post failure".to_string()));
        }
        let post = Post {
            id: post.id,
            link_id: post.link_id,
            owner_id: post.owner_id,
            created_at: OffsetDateTime::now_utc(),
        };
        self.posts.lock().unwrap().push(post.clone());
        Ok(post)
    }

    async fn get_post(&self, post_id: Uuid) -> PipelineResult<Option<Post>> {
        Ok(self
            .posts
            .lock()
            .unwrap()
            .iter()
            .find(|post| post.id == post_id)
            .cloned())
    }

    async fn insert_media_asset(&self, asset: NewMediaAsset) -> PipelineResult<MediaAsset> {
        let index = self.media_inserts.fetch_add(1, Ordering::SeqCst);
        if *self.fail_media_insert_at.lock().unwrap() == Some(index) {
            return Err(PipelineError::Database("injected insert failure".to_string()));
        }
        if self.stall_before_insert.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if !self.posts.lock().unwrap().iter().any(|post| post.id == asset.post_id) {
            return Err(PipelineError::Database("foreign key violation".to_string()));
        }

        let row = {
            let mut media = self.media.lock().unwrap();
            if media.iter().any(|row| row.path == asset.path) {
                return Err(PipelineError::Database("duplicate media path".to_string()));
            }
            let row = MediaAsset {
                id: asset.id,
                post_id: asset.post_id,
                path: asset.path,
                mime_type: asset.mime_type,
                kind: asset.kind,
                duration_ms: asset.duration_ms,
                created_at: OffsetDateTime::now_utc(),
            };
            media.push(row.clone());
            row
        };
        if self.stall_after_insert.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(row)
    }

    async fn get_media_asset(&self, media_id: Uuid) -> PipelineResult<Option<MediaAsset>> {
        Ok(self
            .media
            .lock()
            .unwrap()
            .iter()
            .find(|row| row.id == media_id)
            .cloned())
    }

    async fn list_media(&self, post_id: Uuid) -> PipelineResult<Vec<MediaAsset>> {
        Ok(self
            .media
            .lock()
            .unwrap()
            .iter()
            .filter(|row| row.post_id == post_id)
            .cloned()
            .collect())
    }

    async fn delete_post(&self, post_id: Uuid, owner_id: Uuid) -> PipelineResult<Option<Vec<MediaAsset>>> {
        let mut posts = self.posts.lock().unwrap();
        let Some(position) = posts
            .iter()
            .position(|post| post.id == post_id && post.owner_id == owner_id)
        else {
            return Ok(None);
        };
        posts.remove(position);

        let mut media = self.media.lock().unwrap();
        let (deleted, kept): (Vec<_>, Vec<_>) =
            media.drain(..).partition(|row| row.post_id == post_id);
        *media = kept;
        Ok(Some(deleted))
    }

    async fn get_party_banner(&self, party_id: Uuid) -> PipelineResult<Option<PartyBanner>> {
        Ok(self.party(party_id))
    }

    async fn update_party_banner(&self, party_id: Uuid, path: &str, crop: BannerCrop) -> PipelineResult<()> {
        if self.fail_banner_update.load(Ordering::SeqCst) {
            return Err(PipelineError::Database("injected banner failure".to_string()));
        }
        let mut parties = self.parties.lock().unwrap();
        let banner = parties
            .get_mut(&party_id)
            .ok_or_else(|| PipelineError::NotFound(format!("party {}", party_id)))?;
        banner.path = Some(path.to_string());
        banner.crop = crop;
        Ok(())
    }

    async fn update_avatar(&self, user_id: Uuid, path: &str) -> PipelineResult<()> {
        self.avatars
            .lock()
            .unwrap()
            .insert(user_id, path.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Decoders and thumbnailers
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct DecoderStats {
    pub opened: AtomicUsize,
    pub released: AtomicUsize,
}

impl DecoderStats {
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

/// Decoder that produces a solid frame, or fails when sampling if `fail_frames` is set.
pub struct FakeDecoder {
    pub stats: Arc<DecoderStats>,
    pub fail_frames: bool,
    pub panic_frames: bool,
    pub duration: Duration,
}

impl FakeDecoder {
    pub fn new(fail_frames: bool) -> Self {
        Self {
            stats: Arc::new(DecoderStats::default()),
            fail_frames,
            panic_frames: false,
            duration: Duration::from_secs(8),
        }
    }

    /// Sampling a frame panics, as a crashing native decoder would.
    pub fn panicking() -> Self {
        Self {
            panic_frames: true,
            ..Self::new(false)
        }
    }
}

struct FakeHandle {
    stats: Arc<DecoderStats>,
    fail_frames: bool,
    panic_frames: bool,
    duration: Duration,
}

#[async_trait]
impl VideoDecoder for FakeDecoder {
    async fn open(&self, _path: &Path) -> PipelineResult<Box<dyn DecoderHandle>> {
        self.stats.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeHandle {
            stats: self.stats.clone(),
            fail_frames: self.fail_frames,
            panic_frames: self.panic_frames,
            duration: self.duration,
        }))
    }
}

#[async_trait]
impl DecoderHandle for FakeHandle {
    fn duration(&self) -> Duration {
        self.duration
    }

    async fn frame_at(&mut self, at: Duration) -> PipelineResult<DynamicImage> {
        if self.panic_frames {
            panic!("decoder crashed at {:?}", at);
        }
        if self.fail_frames {
            return Err(PipelineError::ResourceExhausted("corrupt stream".to_string()));
        }
        assert_eq!(at, self.duration / 2);
        Ok(DynamicImage::ImageRgb8(RgbImage::from_pixel(640, 360, Rgb([10, 20, 30]))))
    }

    fn release(&mut self) {
        self.stats.released.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn generator(decoder: FakeDecoder) -> (ThumbnailGenerator, Arc<DecoderStats>) {
    let stats = decoder.stats.clone();
    let pool = DecoderPool::new(Arc::new(decoder), 2);
    (ThumbnailGenerator::new(pool, 320, 50), stats)
}

/// Thumbnailer that blocks every generation until `release` is called.
pub struct GatedThumbnailer {
    gate: Semaphore,
    pub calls: AtomicUsize,
    pub fail: bool,
}

impl GatedThumbnailer {
    pub fn new(fail: bool) -> Arc<Self> {
        Arc::new(Self {
            gate: Semaphore::new(0),
            calls: AtomicUsize::new(0),
            fail,
        })
    }

    pub fn release(&self, count: usize) {
        self.gate.add_permits(count);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Thumbnailer for GatedThumbnailer {
    async fn generate(&self, _asset: &LocalAsset) -> PipelineResult<Thumbnail> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| PipelineError::ResourceExhausted("gate closed".to_string()))?;
        permit.forget();

        if self.fail {
            return Err(PipelineError::ResourceExhausted("decoder busy".to_string()));
        }
        Ok(Thumbnail {
            bytes: Bytes::from_static(b"thumb"),
            width: 1,
            height: 1,
            content_type: "image/jpeg",
        })
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn write_jpeg(dir: &Path, name: &str, width: u32, height: u32) -> PathBuf {
    let path = dir.join(name);
    let image = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    });
    image.save(&path).expect("write jpeg fixture");
    path
}

pub fn write_bytes(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, bytes).expect("write fixture");
    path
}

pub fn encode_jpeg(width: u32, height: u32) -> Bytes {
    let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([200, 40, 40])));
    let mut buffer = std::io::Cursor::new(Vec::new());
    image
        .write_to(&mut buffer, image::ImageFormat::Jpeg)
        .expect("encode jpeg");
    Bytes::from(buffer.into_inner())
}

pub fn test_settings(scratch: &Path) -> PipelineSettings {
    PipelineSettings {
        scratch_dir: scratch.to_path_buf(),
        ..PipelineSettings::default()
    }
}

/// Everything a pipeline test needs, wired to in-memory collaborators.
pub struct Harness {
    pub store: Arc<MemoryObjectStore>,
    pub repo: Arc<MemoryRepository>,
    pub cache: Arc<MemoryUrlCache>,
    pub state: AppState,
    pub decoder_stats: Arc<DecoderStats>,
    pub dir: tempfile::TempDir,
}

impl Harness {
    pub fn new() -> Self {
        let (thumbnailer, decoder_stats) = generator(FakeDecoder::new(false));
        Self::with_thumbnailer(Arc::new(thumbnailer), decoder_stats)
    }

    pub fn with_thumbnailer(thumbnailer: Arc<dyn Thumbnailer>, decoder_stats: Arc<DecoderStats>) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = MemoryObjectStore::new();
        let repo = MemoryRepository::new();
        let cache = Arc::new(MemoryUrlCache::new());
        let state = AppState::new(
            repo.clone(),
            store.clone(),
            cache.clone(),
            thumbnailer,
            test_settings(&dir.path().join("scratch")),
        );

        Self {
            store,
            repo,
            cache,
            state,
            decoder_stats,
            dir,
        }
    }

    pub fn stager(&self) -> AssetStager {
        AssetStager::new(self.state.thumbnailer.clone())
    }

    pub fn jpeg(&self, name: &str) -> PathBuf {
        write_jpeg(self.dir.path(), name, 64, 48)
    }

    pub fn jpegs(&self, count: usize) -> Vec<PathBuf> {
        (0..count).map(|i| self.jpeg(&format!("photo-{}.jpg", i))).collect()
    }
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

pub struct TestResponse {
    pub status: StatusCode,
    body_bytes: Bytes,
}

impl TestResponse {
    pub fn bytes(&self) -> &Bytes {
        &self.body_bytes
    }

    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body_bytes).unwrap_or(Value::Null)
    }

    pub fn error_message(&self) -> String {
        self.json()["error"].as_str().unwrap_or("").to_string()
    }
}

impl Harness {
    pub fn router(&self) -> Router {
        partyshot::http::router(self.state.clone())
    }

    pub async fn get(&self, path: &str) -> TestResponse {
        request(&self.router(), Method::GET, path, None).await
    }

    pub async fn post_json(&self, path: &str, body: Value) -> TestResponse {
        request(&self.router(), Method::POST, path, Some(body)).await
    }

    pub async fn post_empty(&self, path: &str) -> TestResponse {
        request(&self.router(), Method::POST, path, None).await
    }

    pub async fn delete(&self, path: &str) -> TestResponse {
        request(&self.router(), Method::DELETE, path, None).await
    }
}

async fn request(router: &Router, method: Method, path: &str, body: Option<Value>) -> TestResponse {
    let builder = Request::builder()
        .method(method)
        .uri(path)
        .header("host", "localhost");

    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_string(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body_bytes = response.into_body().collect().await.unwrap().to_bytes();

    TestResponse { status, body_bytes }
}
